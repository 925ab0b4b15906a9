// ABOUTME: Builds the whole engine from config and runs it until a shutdown signal
// ABOUTME: Owns the gateway, module manager, background loops and shutdown hooks

use anyhow::{Context, Result};
use burrow_core::{CommandQueue, ShutdownHooks};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::commands::CommandRouter;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::gateway::{BotRegistry, ConnectHook, GatewayServer, GatewaySettings};
use crate::ingress::EventIngress;
use crate::module::{ModuleContext, ModuleManager, ModuleTable};
use crate::store::Store;

pub struct Runtime {
    gateway: GatewayServer,
    modules: ModuleManager,
    hooks: ShutdownHooks,
    background: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Wires every component. Failing to open the store or a bad timezone is fatal.
    pub async fn build(config: Config, table: ModuleTable) -> Result<Self> {
        let config = Arc::new(config);
        let tz = config.scheduler.tz()?;

        let data_dir = config.storage.data_path();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        let db_path = config.storage.database_path();
        let store = Store::open(&db_path, config.storage.queue_size).with_context(|| {
            format!("Failed to open persistence store {}", db_path.display())
        })?;

        let bots = Arc::new(BotRegistry::new());
        let module_ctx = ModuleContext {
            config: Arc::clone(&config),
            bots: Arc::clone(&bots),
            store: store.clone(),
            data_dir,
            tz,
        };
        let modules = ModuleManager::load(&table, &config.bot.modules, &module_ctx).await;
        tracing::info!(
            modules = ?modules.names(),
            commands = modules.commands().len(),
            listeners = modules.listeners().len(),
            "Modules ready"
        );

        let router = Arc::new(CommandRouter::new(
            config.bot.command_prefix.clone(),
            modules.commands(),
            config.bot.admins.iter().copied(),
        ));
        let (queue, queue_worker) = CommandQueue::start(
            config.bot.command_queue_size,
            config.bot.cooldown(),
            router,
        );
        let dispatcher = Arc::new(Dispatcher::new(
            config.bot.nicknames.clone(),
            config.bot.command_prefix.clone(),
            modules.listeners(),
            queue,
            config.events.max_process_time(),
        ));
        let (ingress, drain) = EventIngress::start(
            config.events.ring_len,
            config.events.latency(),
            dispatcher,
        );

        let settings = GatewaySettings {
            listen_addr: config.gateway.listen_addr()?,
            access_token: config.gateway.access_token.clone(),
            api_timeout: config.gateway.api_timeout(),
            retry_delay: config.gateway.retry_delay(),
        };
        let on_connect: ConnectHook = Arc::new(|self_id: i64| {
            tracing::info!(self_id, "Bot online");
        });
        let mut gateway = GatewayServer::new(settings, bots, Arc::new(ingress), on_connect);
        if config.gateway.metrics {
            let handle = burrow_core::metrics::init_metrics()?;
            gateway = gateway.with_metrics(handle);
        }

        let hooks = ShutdownHooks::new();
        modules.register_shutdown(&hooks);
        hooks.register("store", move || store.close());

        let mut background = vec![queue_worker];
        background.extend(drain);

        Ok(Self {
            gateway,
            modules,
            hooks,
            background,
        })
    }

    pub fn gateway(&self) -> &GatewayServer {
        &self.gateway
    }

    pub fn modules(&self) -> &ModuleManager {
        &self.modules
    }

    /// Serves until a shutdown signal arrives, then runs the shutdown hooks.
    pub async fn run(self) -> Result<()> {
        tokio::select! {
            _ = self.gateway.run() => {}
            signal = shutdown_signal() => {
                let signal = signal?;
                tracing::info!(signal, "Shutting down");
            }
        }

        for task in &self.background {
            task.abort();
        }
        let failed = self.hooks.run_all();
        if failed > 0 {
            tracing::warn!(failed, "Some shutdown hooks panicked");
        }
        tracing::info!("Shutdown complete");
        Ok(())
    }
}

/// Resolves with the name of the first termination signal received.
#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt =
        signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut quit = signal(SignalKind::quit()).context("Failed to install SIGQUIT handler")?;
    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
        _ = hangup.recv() => "SIGHUP",
    };
    Ok(name)
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl+C handler")?;
    Ok("ctrl-c")
}
