//! The shared simulation context passed explicitly to every kernel task.
//!
//! Replaces the original tool's ambient/global `BatsimContext*`: every component receives an
//! `Arc<SimContext>` and mutates only the fields its contract says it may (`SPEC_FULL.md` §9).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use edcsim_core::{Jobs, Profiles, SimError};
use edcsim_kernel::Kernel;
use tokio::sync::Notify;

use crate::counters::ServerCounters;
use crate::machines::Machines;
use crate::power::PendingSwitches;

/// Run-wide configuration that does not change once the simulation starts.
#[derive(Debug, Clone, Copy)]
pub struct SimOptions {
    /// Whether more than one job may compute on the same machine at once.
    pub allow_space_sharing: bool,
    /// Whether `SCHED_TELL_ME_ENERGY` and pstate-aware allocation checks are active.
    pub energy_plugin: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        SimOptions { allow_space_sharing: false, energy_plugin: false }
    }
}

/// Everything a kernel task needs to participate in the simulation.
pub struct SimContext {
    /// The virtual-time kernel.
    pub kernel: Kernel,
    /// Registered jobs, mutated by the orchestrator as they progress through their lifecycle.
    pub jobs: Mutex<Jobs>,
    /// Registered profiles, immutable once loaded.
    pub profiles: Profiles,
    /// Cluster machines and the master machine id.
    pub machines: Mutex<Machines>,
    /// Running counters the orchestrator uses to decide when to talk to the EDC and when to stop.
    pub counters: Mutex<ServerCounters>,
    /// Outstanding coalesced power-state transitions.
    pub pending_switches: Mutex<PendingSwitches>,
    /// Run-wide configuration.
    pub options: SimOptions,
    /// Line-oriented record of every batch event sent to or received from the EDC, for
    /// `<prefix>_schedule.trace` (`SPEC_FULL.md` §4.11).
    pub trace: Mutex<Vec<String>>,
    /// Real (wall-clock) microseconds spent blocked on the EDC socket read, accumulated across
    /// every request/reply round trip. Feeds `RunSummary::scheduler_microseconds`.
    pub scheduler_wall_micros: AtomicU64,
    /// The first fatal error reported by any task, if one has occurred. Once set, the
    /// orchestrator's run loop stops and `main` reports it.
    fatal: Mutex<Option<SimError>>,
    /// Signalled exactly once, the moment `fatal` transitions from `None` to `Some`.
    pub fatal_notify: Notify,
}

impl SimContext {
    /// Builds a fresh context from a loaded workload and platform.
    pub fn new(
        kernel: Kernel,
        jobs: Jobs,
        profiles: Profiles,
        machines: Machines,
        options: SimOptions,
    ) -> Self {
        SimContext {
            kernel,
            jobs: Mutex::new(jobs),
            profiles,
            machines: Mutex::new(machines),
            counters: Mutex::new(ServerCounters::default()),
            pending_switches: Mutex::new(PendingSwitches::new()),
            options,
            trace: Mutex::new(Vec::new()),
            scheduler_wall_micros: AtomicU64::new(0),
            fatal: Mutex::new(None),
            fatal_notify: Notify::new(),
        }
    }

    /// Records `line`, prefixed with the current virtual clock, in the EDC trace log.
    pub fn record_trace(&self, line: impl std::fmt::Display) {
        let now = self.kernel.clock();
        self.trace.lock().unwrap().push(format!("{now:.6} {line}"));
    }

    /// Adds `micros` of wall-clock time to the scheduler's accumulated thinking time.
    pub fn accrue_scheduler_wall_micros(&self, micros: u64) {
        self.scheduler_wall_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Reports a fatal error. Only the first call has any effect; later calls are no-ops so the
    /// earliest failure is the one the run is diagnosed by.
    pub fn fail(&self, err: SimError) {
        let mut guard = self.fatal.lock().unwrap();
        if guard.is_none() {
            *guard = Some(err);
            drop(guard);
            self.fatal_notify.notify_waiters();
        }
    }

    /// Takes the recorded fatal error, if any, leaving `None` behind.
    pub fn take_fatal(&self) -> Option<SimError> {
        self.fatal.lock().unwrap().take()
    }

    /// Whether a fatal error has already been reported.
    pub fn has_failed(&self) -> bool {
        self.fatal.lock().unwrap().is_some()
    }

    /// As [`SimContext::fail`], but for a task whose error type is `anyhow::Error`. Recovers the
    /// underlying [`SimError`] when the chain carries one (the common case, since every fallible
    /// call in this crate ultimately bottoms out in one), falling back to wrapping the message in
    /// [`SimError::Transport`] otherwise.
    pub fn fail_anyhow(&self, err: anyhow::Error) {
        let sim_err = err.downcast::<SimError>().unwrap_or_else(|err| SimError::transport(err.to_string()));
        self.fail(sim_err);
    }
}
