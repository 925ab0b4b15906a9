// ABOUTME: Root library module for the burrow bot runtime
// ABOUTME: Gateway, dispatch, modules and the built-in scheduler live here; primitives are in burrow-core

pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod gateway;
pub mod ingress;
pub mod logging;
pub mod module;
pub mod paths;
pub mod runtime;
pub mod schedule;
pub mod store;

pub use context::{Ctx, Target};
pub use module::{CommandHandler, EventListener, Module, ModuleContext, ModuleTable, Registrar};
pub use runtime::Runtime;

// Re-export the protocol and engine crates for module authors
pub use burrow_core;
pub use burrow_onebot;
