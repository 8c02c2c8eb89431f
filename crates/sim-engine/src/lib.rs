#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! The simulation control plane: the shared context, the server orchestrator, the EDC link, job
//! execution, power-state transitions, the submitter and waiter tasks, and trace/CSV export.
//!
//! Everything here is driven by an `edcsim-kernel::Kernel`; this crate owns no virtual-time
//! primitives of its own.

pub mod context;
pub mod counters;
pub mod edc;
pub mod executor;
pub mod export;
pub mod machines;
pub mod orchestrator;
pub mod power;
pub mod submitter;
pub mod waiter;

pub use context::{SimContext, SimOptions};
pub use counters::ServerCounters;
pub use edc::{run_request_reply, BatchEvent, EdcLink, PROTOCOL_VERSION};
pub use executor::run_job;
pub use export::{export_run, RunSummary};
pub use machines::Machines;
pub use orchestrator::run_orchestrator;
pub use power::PendingSwitches;
pub use submitter::run_submitter;
pub use waiter::run_waiter;
