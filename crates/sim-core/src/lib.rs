#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Shared data model for the batch-scheduler simulator: jobs, profiles, machines, machine
//! ranges, inter-process messages, and the JSON workload/platform loaders.

pub mod error;
pub mod ipp;
pub mod job;
pub mod machine;
pub mod machine_range;
pub mod platform;
pub mod profile;
pub mod workload;

pub use error::SimError;
pub use ipp::{IppMessage, JobOutcome, SchedulingAllocation, SERVER_MAILBOX};
pub use job::{Job, JobState, Jobs};
pub use machine::{Machine, MachineState, PstateKind, SleepPstate};
pub use machine_range::MachineRange;
pub use platform::{load_platform, parse_platform, Platform};
pub use profile::{Profile, Profiles};
pub use workload::{load_workload, parse_workload, Workload};
