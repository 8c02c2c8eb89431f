#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Virtual-time, single-threaded cooperative task runtime: the event kernel the rest of the
//! simulator is built on.

mod clock;
mod parallel_task;

pub use clock::{Kernel, Mailbox};
pub use parallel_task::{
    compute_duration, ExecOutcome, ParallelTaskHandle, DEFAULT_HOST_SPEED_FLOPS,
    LINK_BANDWIDTH_BYTES_PER_SEC,
};
