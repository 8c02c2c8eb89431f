//! Inter-process messages (IPP): the typed payloads every kernel task exchanges through named
//! mailboxes. All variants here are addressed to the well-known mailbox `"server"`.

use crate::machine_range::MachineRange;

/// The well-known mailbox name the orchestrator listens on.
pub const SERVER_MAILBOX: &str = "server";

/// An outcome a finished job execution can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job ran to completion within its walltime.
    Finished,
    /// The job was killed because it exceeded its walltime.
    Killed,
}

/// A single job's placement inside a `SCHED_ALLOCATION` message.
#[derive(Debug, Clone)]
pub struct SchedulingAllocation {
    /// The job being allocated.
    pub job_id: u32,
    /// The machines it is allocated to.
    pub machine_ids: MachineRange,
}

/// Every message a kernel task may send to the orchestrator's mailbox.
#[derive(Debug, Clone)]
pub enum IppMessage {
    /// A submitter has started submitting jobs.
    SubmitterHello,
    /// A submitter has submitted every job it had.
    SubmitterBye,
    /// A job has been announced.
    JobSubmitted {
        /// The submitted job's id.
        job_id: u32,
    },
    /// A job execution has finished, one way or another.
    JobCompleted {
        /// The job that finished.
        job_id: u32,
        /// How it finished.
        outcome: JobOutcome,
    },
    /// The EDC decided to place one or more jobs.
    SchedAllocation {
        /// The allocations to apply.
        allocations: Vec<SchedulingAllocation>,
    },
    /// The EDC decided to reject a job outright.
    SchedRejection {
        /// The rejected job's id.
        job_id: u32,
    },
    /// The EDC had nothing to decide this round.
    SchedNop,
    /// The EDC asked to be woken again once virtual time reaches `target_time`.
    SchedNopMeLater {
        /// The virtual time to wake the EDC at; must be in the future.
        target_time: f64,
    },
    /// The EDC asked for a reading of total consumed energy.
    SchedTellMeEnergy,
    /// The EDC finished processing a reply and can receive the next request.
    SchedReady,
    /// A waiter's target time has been reached.
    WaitingDone,
    /// The EDC requested a pstate change on a set of machines.
    PstateModification {
        /// The machines to change.
        machine_ids: MachineRange,
        /// The pstate to move them to.
        new_pstate: u32,
    },
    /// A machine finished transitioning into a computation pstate.
    SwitchedOn {
        /// The machine that finished switching on.
        machine_id: u32,
        /// The pstate it is now in.
        new_pstate: u32,
    },
    /// A machine finished transitioning into a sleep pstate.
    SwitchedOff {
        /// The machine that finished switching off.
        machine_id: u32,
        /// The pstate it is now in.
        new_pstate: u32,
    },
}
