//! Machine state machine and power-state (pstate) classification.

use std::collections::BTreeSet;

/// A machine's coarse execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    /// In a sleep pstate, not usable for computation.
    Sleeping,
    /// In a computation pstate, no job currently running on it.
    Idle,
    /// In a computation pstate, at least one job currently running on it.
    Computing,
    /// Mid-transition from a sleep pstate to a computation pstate.
    TransitingFromSleepingToComputing,
    /// Mid-transition from a computation pstate to a sleep pstate.
    TransitingFromComputingToSleeping,
}

/// The kind of a pstate: whether it represents real computation capability, a sleep state, or a
/// virtual bookkeeping state used only to charge the cost of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PstateKind {
    /// A pstate in which the host can run jobs.
    Computation,
    /// A pstate in which the host is asleep and cannot run jobs.
    Sleep,
    /// A virtual pstate occupied only while transitioning between computation and sleep.
    TransitionVirtual,
}

/// A sleep pstate's associated transition pstates.
#[derive(Debug, Clone, Copy)]
pub struct SleepPstate {
    /// Virtual pstate id entered while waking up, before reaching a computation pstate.
    pub switch_on_virtual: u32,
    /// Virtual pstate id entered while falling asleep, before reaching this sleep pstate.
    pub switch_off_virtual: u32,
}

/// A compute machine.
#[derive(Debug, Clone)]
pub struct Machine {
    /// Dense id, `0..machines.len()`.
    pub id: u32,
    /// Human-readable name, as given by the platform file.
    pub name: String,
    /// Flops per second this machine executes at.
    pub speed_flops_per_sec: f64,
    /// Current execution state.
    pub state: MachineState,
    /// Ids of jobs currently computing on this machine.
    pub jobs_being_computed: BTreeSet<u32>,
    /// Currently active pstate id.
    pub current_pstate: u32,
    /// Pstate id → kind, for every pstate this machine supports.
    pub pstates: Vec<(u32, PstateKind)>,
    /// Sleep pstate id → its switch_on/switch_off virtual pstates.
    pub sleep_transitions: Vec<(u32, SleepPstate)>,
}

impl Machine {
    /// The kind of the machine's current pstate.
    ///
    /// # Panics
    ///
    /// Panics if `current_pstate` is not one of `pstates` — this would mean the machine was
    /// constructed inconsistently.
    pub fn current_pstate_kind(&self) -> PstateKind {
        self.pstates
            .iter()
            .find(|(id, _)| *id == self.current_pstate)
            .map(|(_, kind)| *kind)
            .expect("current pstate must be one of the machine's declared pstates")
    }

    /// The sleep-pstate transition pair for `pstate`, if it is a sleep pstate.
    pub fn sleep_transition(&self, pstate: u32) -> Option<SleepPstate> {
        self.sleep_transitions
            .iter()
            .find(|(id, _)| *id == pstate)
            .map(|(_, t)| *t)
    }

    /// Whether this machine can accept a new job allocation (computing-capable, not sleeping or
    /// transitioning).
    pub fn is_allocatable(&self) -> bool {
        matches!(self.state, MachineState::Idle | MachineState::Computing)
            && self.current_pstate_kind() == PstateKind::Computation
    }

    /// Marks `job_id` as computing on this machine, updating `state` accordingly.
    pub fn on_job_start(&mut self, job_id: u32) {
        self.jobs_being_computed.insert(job_id);
        self.state = MachineState::Computing;
    }

    /// Marks `job_id` as finished on this machine, updating `state` accordingly.
    pub fn on_job_end(&mut self, job_id: u32) {
        self.jobs_being_computed.remove(&job_id);
        if self.jobs_being_computed.is_empty() {
            self.state = MachineState::Idle;
        }
    }
}
