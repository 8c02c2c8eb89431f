//! Parallel-task execution: the primitive job execution races against a walltime timer.
//!
//! A real batch simulator delegates task timing to SimGrid's linear-program flow solver; that
//! solver is out of scope here. This module uses a deliberately simple stand-in so `execute`
//! always terminates: the slowest host dominates compute time, the slowest pair dominates
//! communication time, and the two are summed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::clock::Kernel;

pub use edcsim_core::platform::DEFAULT_HOST_SPEED_FLOPS;

/// Bytes/sec assumed for every link between two hosts in the simplified timing model.
pub const LINK_BANDWIDTH_BYTES_PER_SEC: f64 = 1.25e8;

/// Computes the simplified duration of a parallel task: the slowest host's compute time plus the
/// slowest pair's communication time.
pub fn compute_duration(host_speeds: &[f64], cpu: &[f64], com: &[f64]) -> f64 {
    let compute_time = cpu
        .iter()
        .zip(host_speeds.iter())
        .map(|(&flops, &speed)| if speed > 0.0 { flops / speed } else { 0.0 })
        .fold(0.0_f64, f64::max);
    let comm_time = com.iter().copied().fold(0.0_f64, f64::max) / LINK_BANDWIDTH_BYTES_PER_SEC;
    compute_time + comm_time
}

/// The outcome of [`Kernel::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The task ran to completion.
    Finished,
    /// The task was cancelled before it finished.
    Cancelled,
}

/// A handle to a started (but not yet executed) parallel task.
pub struct ParallelTaskHandle {
    duration: f64,
    cancel: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
}

impl ParallelTaskHandle {
    /// The task's total duration, in virtual seconds, computed up front from its host/cpu/com
    /// description. Known without awaiting anything, which is what lets a walltime race against
    /// this handle fold into a single timer instead of two independently-parked sleeps.
    pub fn duration(&self) -> f64 {
        self.duration
    }
}

impl Kernel {
    /// Describes a parallel task over `host_speeds` (one entry per allocated host) with the given
    /// per-host flop counts and per-pair byte counts. Does not itself consume any virtual time;
    /// call [`Kernel::execute`] to run it.
    pub fn parallel_task(&self, host_speeds: &[f64], cpu: &[f64], com: &[f64]) -> ParallelTaskHandle {
        ParallelTaskHandle {
            duration: compute_duration(host_speeds, cpu, com),
            cancel: Arc::new(Notify::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A convenience one-host, one-flop task used to charge the cost of a power-state
    /// transition.
    pub fn one_flop_task(&self, host_speed: f64) -> ParallelTaskHandle {
        self.parallel_task(&[host_speed], &[1.0], &[0.0])
    }

    /// Runs `handle` to completion, unless it is cancelled first.
    pub async fn execute(&self, handle: &ParallelTaskHandle) -> ExecOutcome {
        if handle.cancelled.load(Ordering::SeqCst) {
            return ExecOutcome::Cancelled;
        }
        tokio::select! {
            _ = self.sleep(handle.duration) => ExecOutcome::Finished,
            _ = handle.cancel.notified() => ExecOutcome::Cancelled,
        }
    }

    /// Cancels `handle`. Safe to call after it has already finished executing.
    pub fn cancel(&self, handle: &ParallelTaskHandle) {
        handle.cancelled.store(true, Ordering::SeqCst);
        handle.cancel.notify_waiters();
    }

    /// Immediate, zero-cost change of a host's declared power state. The authoritative pstate
    /// bookkeeping lives on `Machine` in `edcsim-engine`; this primitive exists so callers follow
    /// the same shape as every other kernel operation and so a future energy-metering hook has
    /// somewhere to attach.
    pub fn host_set_pstate(&self, host: u32, pstate: u32) {
        let _ = (host, pstate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_ignores_zero_speed_without_dividing_by_zero() {
        let d = compute_duration(&[0.0], &[10.0], &[0.0]);
        assert_eq!(d, 0.0);
    }

    #[test]
    fn duration_is_dominated_by_the_slowest_host() {
        let d = compute_duration(&[1.0, 2.0], &[10.0, 10.0], &[0.0, 0.0, 0.0, 0.0]);
        assert_eq!(d, 10.0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancellation_wins_the_race_when_requested_first() {
        let kernel = Kernel::new();
        let driver_handle = tokio::task::spawn(kernel.clone().run_driver());
        let task = kernel.parallel_task(&[DEFAULT_HOST_SPEED_FLOPS], &[1.0e18], &[0.0]);
        kernel.cancel(&task);
        let executor = kernel.clone();
        let join_handle = kernel.spawn(async move {
            let outcome = executor.execute(&task).await;
            assert_eq!(outcome, ExecOutcome::Cancelled);
        });
        join_handle.await.unwrap();
        driver_handle.await.unwrap();
    }
}
