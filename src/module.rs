// ABOUTME: Module contract plus the startup-time table of listeners and commands
// ABOUTME: Modules are built by name from a factory table and register through a Registrar

use anyhow::Result;
use async_trait::async_trait;
use burrow_core::{Permission, ShutdownHooks};
use burrow_onebot::EventKind;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::context::Ctx;
use crate::gateway::BotRegistry;
use crate::store::Store;

/// Receives every event of the kinds it was registered for.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, ctx: Arc<Ctx>);
}

#[async_trait]
impl<F, Fut> EventListener for F
where
    F: Fn(Arc<Ctx>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_event(&self, ctx: Arc<Ctx>) {
        (self)(ctx).await
    }
}

/// Runs one command label. `args` excludes the label itself.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn on_command(&self, ctx: Arc<Ctx>, args: Vec<String>);
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(Arc<Ctx>, Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_command(&self, ctx: Arc<Ctx>, args: Vec<String>) {
        (self)(ctx, args).await
    }
}

#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &'static str;

    /// Registers listeners and commands. An error skips the module entirely.
    async fn init(&self, registrar: &mut Registrar) -> Result<()>;

    /// Runs as a shutdown hook; must not block for long.
    fn stop(&self) {}

    async fn reload(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct CommandEntry {
    pub module: &'static str,
    pub permission: Permission,
    pub handler: Arc<dyn CommandHandler>,
}

/// What one module asked for during `init`.
#[derive(Default)]
pub struct Registrar {
    module: &'static str,
    listeners: Vec<(EventKind, Arc<dyn EventListener>)>,
    commands: Vec<(String, CommandEntry)>,
}

impl Registrar {
    pub fn new(module: &'static str) -> Self {
        Self {
            module,
            ..Self::default()
        }
    }

    pub fn on_event(&mut self, kind: EventKind, listener: impl EventListener + 'static) {
        self.listeners.push((kind, Arc::new(listener)));
    }

    pub fn command(
        &mut self,
        label: impl Into<String>,
        permission: Permission,
        handler: impl CommandHandler + 'static,
    ) {
        self.commands.push((
            label.into(),
            CommandEntry {
                module: self.module,
                permission,
                handler: Arc::new(handler),
            },
        ));
    }
}

#[derive(Default)]
pub struct ListenerTable {
    by_kind: HashMap<EventKind, Vec<Arc<dyn EventListener>>>,
}

impl ListenerTable {
    pub fn get(&self, kind: EventKind) -> &[Arc<dyn EventListener>] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct CommandTable {
    by_label: HashMap<String, CommandEntry>,
}

impl CommandTable {
    pub fn get(&self, label: &str) -> Option<&CommandEntry> {
        self.by_label.get(label)
    }

    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.by_label.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }

    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }

    /// First registration of a label wins.
    fn insert(&mut self, label: String, entry: CommandEntry) -> bool {
        if let Some(existing) = self.by_label.get(&label) {
            tracing::warn!(
                label = %label,
                module = entry.module,
                registered_by = existing.module,
                "Duplicate command label ignored"
            );
            return false;
        }
        self.by_label.insert(label, entry);
        true
    }
}

/// Shared handles a module may need when it is built.
#[derive(Clone)]
pub struct ModuleContext {
    pub config: Arc<Config>,
    pub bots: Arc<BotRegistry>,
    pub store: Store,
    pub data_dir: PathBuf,
    pub tz: Tz,
}

pub type ModuleFactory = Box<dyn Fn(&ModuleContext) -> Result<Arc<dyn Module>> + Send + Sync>;

/// Modules that can be enabled by name in `bot.modules`.
#[derive(Default)]
pub struct ModuleTable {
    factories: HashMap<&'static str, ModuleFactory>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything shipped with the binary.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        table.insert(crate::schedule::MODULE_NAME, |ctx| {
            Ok(Arc::new(crate::schedule::ScheduleModule::new(ctx)?) as Arc<dyn Module>)
        });
        table
    }

    pub fn insert<F>(&mut self, name: &'static str, factory: F)
    where
        F: Fn(&ModuleContext) -> Result<Arc<dyn Module>> + Send + Sync + 'static,
    {
        self.factories.insert(name, Box::new(factory));
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }

    fn build(&self, name: &str, ctx: &ModuleContext) -> Option<Result<Arc<dyn Module>>> {
        self.factories.get(name).map(|factory| factory(ctx))
    }
}

/// Bot-admin command that reloads every loaded module.
pub const RELOAD_COMMAND: &str = "Reload";

pub struct ModuleManager {
    modules: Arc<Vec<Arc<dyn Module>>>,
    listeners: Arc<ListenerTable>,
    commands: Arc<CommandTable>,
}

impl ModuleManager {
    /// Builds and initialises the named modules in order. Unknown names and
    /// modules that fail to build or init are logged and skipped.
    pub async fn load(table: &ModuleTable, names: &[String], ctx: &ModuleContext) -> Self {
        let mut modules = Vec::new();
        for name in names {
            match table.build(name, ctx) {
                None => tracing::warn!(module = %name, "Unknown module, skipping"),
                Some(Err(e)) => {
                    tracing::error!(module = %name, error = %e, "Failed to build module")
                }
                Some(Ok(module)) => modules.push(module),
            }
        }
        Self::from_modules(modules).await
    }

    pub async fn from_modules(candidates: Vec<Arc<dyn Module>>) -> Self {
        let mut modules = Vec::with_capacity(candidates.len());
        let mut listeners = ListenerTable::default();
        let mut commands = CommandTable::default();

        for module in candidates {
            let mut registrar = Registrar::new(module.name());
            if let Err(e) = module.init(&mut registrar).await {
                tracing::error!(module = module.name(), error = %e, "Module init failed, skipping");
                continue;
            }
            let listener_count = registrar.listeners.len();
            for (kind, listener) in registrar.listeners {
                listeners.by_kind.entry(kind).or_default().push(listener);
            }
            let mut command_count = 0;
            for (label, entry) in registrar.commands {
                if commands.insert(label, entry) {
                    command_count += 1;
                }
            }
            tracing::info!(
                module = module.name(),
                listeners = listener_count,
                commands = command_count,
                "Module loaded"
            );
            modules.push(module);
        }

        let modules = Arc::new(modules);
        let loaded = Arc::clone(&modules);
        commands.insert(
            RELOAD_COMMAND.to_string(),
            CommandEntry {
                module: "core",
                permission: Permission::BotAdmin,
                handler: Arc::new(move |ctx: Arc<Ctx>, _args: Vec<String>| {
                    let loaded = Arc::clone(&loaded);
                    async move {
                        let failed = reload_modules(&loaded).await;
                        let notice = if failed == 0 {
                            format!("Reloaded {} module(s).", loaded.len())
                        } else {
                            format!("{} of {} module(s) failed to reload.", failed, loaded.len())
                        };
                        if let Err(e) = ctx.reply(notice).await {
                            tracing::warn!(error = %e, "Failed to answer reload command");
                        }
                    }
                }),
            },
        );

        Self {
            modules,
            listeners: Arc::new(listeners),
            commands: Arc::new(commands),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    pub fn listeners(&self) -> Arc<ListenerTable> {
        Arc::clone(&self.listeners)
    }

    pub fn commands(&self) -> Arc<CommandTable> {
        Arc::clone(&self.commands)
    }

    pub fn register_shutdown(&self, hooks: &ShutdownHooks) {
        for module in self.modules.iter() {
            let module = Arc::clone(module);
            hooks.register(format!("module:{}", module.name()), move || module.stop());
        }
    }

    /// Reloads every module; returns how many failed.
    pub async fn reload_all(&self) -> usize {
        reload_modules(&self.modules).await
    }
}

async fn reload_modules(modules: &[Arc<dyn Module>]) -> usize {
    let mut failed = 0;
    for module in modules {
        match module.reload().await {
            Ok(()) => tracing::info!(module = module.name(), "Module reloaded"),
            Err(e) => {
                failed += 1;
                tracing::warn!(module = module.name(), error = %e, "Module reload failed");
            }
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Greeter;

    #[async_trait]
    impl Module for Greeter {
        fn name(&self) -> &'static str {
            "greeter"
        }

        async fn init(&self, registrar: &mut Registrar) -> Result<()> {
            registrar.on_event(EventKind::GroupJoin, |_ctx: Arc<Ctx>| async {});
            registrar.command(
                "hello",
                Permission::Member,
                |_ctx: Arc<Ctx>, _args: Vec<String>| async {},
            );
            Ok(())
        }
    }

    struct Shadow;

    #[async_trait]
    impl Module for Shadow {
        fn name(&self) -> &'static str {
            "shadow"
        }

        async fn init(&self, registrar: &mut Registrar) -> Result<()> {
            registrar.command(
                "hello",
                Permission::BotAdmin,
                |_ctx: Arc<Ctx>, _args: Vec<String>| async {},
            );
            registrar.command(
                "bye",
                Permission::Member,
                |_ctx: Arc<Ctx>, _args: Vec<String>| async {},
            );
            Ok(())
        }
    }

    struct Broken {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Module for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn init(&self, registrar: &mut Registrar) -> Result<()> {
            registrar.command(
                "never",
                Permission::Member,
                |_ctx: Arc<Ctx>, _args: Vec<String>| async {},
            );
            anyhow::bail!("missing credentials")
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    struct Flaky {
        reloads: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Module for Flaky {
        fn name(&self) -> &'static str {
            if self.fail {
                "flaky"
            } else {
                "steady"
            }
        }

        async fn init(&self, _registrar: &mut Registrar) -> Result<()> {
            Ok(())
        }

        async fn reload(&self) -> Result<()> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("state file unreadable");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reload_all_counts_failures_and_keeps_going() {
        let reloads = Arc::new(AtomicUsize::new(0));
        let manager = ModuleManager::from_modules(vec![
            Arc::new(Flaky {
                reloads: Arc::clone(&reloads),
                fail: true,
            }),
            Arc::new(Flaky {
                reloads: Arc::clone(&reloads),
                fail: false,
            }),
        ])
        .await;

        assert_eq!(manager.reload_all().await, 1);
        assert_eq!(reloads.load(Ordering::SeqCst), 2);

        let reload = manager.commands().get(RELOAD_COMMAND).cloned().unwrap();
        assert_eq!(reload.module, "core");
        assert_eq!(reload.permission, Permission::BotAdmin);
    }

    #[tokio::test]
    async fn test_first_label_registration_wins() {
        let manager = ModuleManager::from_modules(vec![Arc::new(Greeter), Arc::new(Shadow)]).await;
        let commands = manager.commands();
        assert_eq!(commands.labels(), vec!["Reload", "bye", "hello"]);
        let hello = commands.get("hello").unwrap();
        assert_eq!(hello.module, "greeter");
        assert_eq!(hello.permission, Permission::Member);
        assert_eq!(manager.listeners().get(EventKind::GroupJoin).len(), 1);
        assert!(manager.listeners().get(EventKind::GroupQuit).is_empty());
    }

    #[tokio::test]
    async fn test_failed_init_discards_registrations() {
        let stopped = Arc::new(AtomicBool::new(false));
        let manager = ModuleManager::from_modules(vec![
            Arc::new(Broken {
                stopped: Arc::clone(&stopped),
            }),
            Arc::new(Greeter),
        ])
        .await;
        assert_eq!(manager.names(), vec!["greeter"]);
        assert!(manager.commands().get("never").is_none());

        let hooks = ShutdownHooks::new();
        manager.register_shutdown(&hooks);
        assert_eq!(hooks.len(), 1);
        hooks.run_all();
        assert!(!stopped.load(Ordering::SeqCst));
    }
}
