//! Server counters (`SPEC_FULL.md` §3) and the termination condition they drive.

/// The orchestrator's running tallies. Mutated only by the orchestrator loop.
#[derive(Debug, Clone, Copy)]
pub struct ServerCounters {
    /// Number of submitter processes that have said hello.
    pub nb_submitters: u32,
    /// Number of submitter processes that have said bye.
    pub nb_submitters_finished: u32,
    /// Number of jobs submitted so far.
    pub nb_submitted: u32,
    /// Number of jobs the EDC has scheduled (allocated) so far.
    pub nb_scheduled: u32,
    /// Number of jobs currently running.
    pub nb_running: u32,
    /// Number of jobs that have reached a terminal state (success, killed, or rejected).
    pub nb_completed: u32,
    /// Number of machines currently mid power-state transition.
    pub nb_switching: u32,
    /// Number of outstanding waiter tasks.
    pub nb_waiters: u32,
    /// Whether the EDC has said it is ready to receive the next request.
    pub sched_ready: bool,
}

impl Default for ServerCounters {
    /// Starts `sched_ready` true: the EDC has not sent anything yet, so nothing has made it
    /// unready, and the very first batch must still be able to trigger the opening request (the
    /// authoritative original sets `sched_ready = true` at startup, not false).
    fn default() -> Self {
        ServerCounters {
            nb_submitters: 0,
            nb_submitters_finished: 0,
            nb_submitted: 0,
            nb_scheduled: 0,
            nb_running: 0,
            nb_completed: 0,
            nb_switching: 0,
            nb_waiters: 0,
            sched_ready: true,
        }
    }
}

impl ServerCounters {
    /// Whether the orchestrator loop should terminate.
    pub fn is_terminated(&self) -> bool {
        self.nb_submitters > 0
            && self.nb_submitters_finished == self.nb_submitters
            && self.nb_completed == self.nb_submitted
            && self.sched_ready
            && self.nb_switching == 0
            && self.nb_waiters == 0
    }

    /// Whether every job is either running or finished with nothing left to schedule, suggesting
    /// a `SCHED_NOP` might indicate the EDC has stalled (a non-fatal diagnostic, not an error).
    pub fn looks_deadlocked(&self) -> bool {
        self.nb_running == 0
            && self.nb_scheduled < self.nb_submitted
            && self.nb_switching == 0
            && self.nb_waiters == 0
    }
}
