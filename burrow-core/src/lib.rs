// ABOUTME: Protocol-agnostic engine primitives for the burrow bot runtime
// ABOUTME: Registry, event ring, command intake, scheduler, shutdown hooks and metrics

pub mod command;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod ring;
pub mod scheduler;
pub mod shutdown;
pub mod task;

pub use command::{parse_command_line, CommandLine, Permission};
pub use queue::{CallSink, CommandQueue, CooldownTracker, QueueError, QueuedCall};
pub use registry::ConcurrentRegistry;
pub use ring::{EventRing, RingDrain};
pub use scheduler::{Scheduler, ScheduledTask, TaskAction};
pub use shutdown::ShutdownHooks;
