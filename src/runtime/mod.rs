//! Runtime execution engine
//!
//! Runs flows and schedules them:
//! - topological ordering of the flow DAG with petgraph
//! - sequential, best-effort command execution
//! - debounced natural-language scheduling with one deferred fire per flow
//! - completion notifications

// Topological ordering and sequential execution
pub mod engine;

// Per-node execution and the shell command runner
pub mod executor;

// Natural-language time expressions
pub mod timeparse;

// Per-flow debounce and fire timers
pub mod scheduler;

// Run completion notifications
pub mod notifier;

// One open flow: graph, run gate and schedule
pub mod session;

pub use engine::{ExecutionEngine, RunReport};
pub use executor::{CommandOutcome, CommandRunner, NodeExecutor, ShellCommandRunner};
pub use notifier::{LogSink, NotificationSink, ResultNotifier, WebhookSink};
pub use scheduler::{ScheduleController, ScheduleError, ScheduleStatus};
pub use session::{FlowSession, RunError, SessionDeps};
pub use timeparse::{DateParser, NaturalDateParser};
