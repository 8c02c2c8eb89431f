//! Machines registry: owns every [`Machine`], the designated master machine, and the simplified
//! energy-accounting model backing `SCHED_TELL_ME_ENERGY` (`SPEC_FULL.md` §4.3).

use edcsim_core::{Machine, MachineRange, MachineState};

/// Nominal power draw, in watts, assumed for a machine in each coarse state. A deliberately
/// simple, documented stand-in for a real wattage model, in the same spirit as the parallel-task
/// timing model of `edcsim-kernel` (`SPEC_FULL.md` §4.5a) — this crate does not carry a
/// per-platform wattage table, only the handful of states the energy-readout protocol needs.
const IDLE_WATTS: f64 = 95.0;
const COMPUTING_WATTS: f64 = 190.0;
const SLEEP_WATTS: f64 = 9.0;
const TRANSITION_WATTS: f64 = 9.0;

fn watts_for(state: MachineState) -> f64 {
    match state {
        MachineState::Idle => IDLE_WATTS,
        MachineState::Computing => COMPUTING_WATTS,
        MachineState::Sleeping => SLEEP_WATTS,
        MachineState::TransitingFromSleepingToComputing
        | MachineState::TransitingFromComputingToSleeping => TRANSITION_WATTS,
    }
}

struct EnergyAccrual {
    last_update: f64,
    accumulated_joules: f64,
}

/// Owns every machine in the cluster plus the designated master machine's id.
pub struct Machines {
    machines: Vec<Machine>,
    master_id: u32,
    energy: Vec<EnergyAccrual>,
}

impl Machines {
    /// Builds a registry from a loaded platform's machines, at virtual time `now` (normally `0`).
    pub fn new(machines: Vec<Machine>, master_id: u32, now: f64) -> Self {
        let energy = machines
            .iter()
            .map(|_| EnergyAccrual { last_update: now, accumulated_joules: 0.0 })
            .collect();
        Machines { machines, master_id, energy }
    }

    /// The id of the master machine. Never appears in a job allocation.
    pub fn master_id(&self) -> u32 {
        self.master_id
    }

    /// Number of machines, including the master.
    pub fn len(&self) -> usize {
        self.machines.len()
    }

    /// Whether the registry has no machines (never true once loaded from a valid platform file).
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Borrows a machine by id.
    pub fn get(&self, id: u32) -> &Machine {
        &self.machines[id as usize]
    }

    /// Borrows a machine by id, mutably.
    pub fn get_mut(&mut self, id: u32) -> &mut Machine {
        &mut self.machines[id as usize]
    }

    /// Computation speeds, in flops/sec, for the given ordered list of machine ids. Used to size
    /// a parallel task's duration.
    pub fn speeds_of(&self, ids: &[u32]) -> Vec<f64> {
        ids.iter().map(|&id| self.get(id).speed_flops_per_sec).collect()
    }

    /// Marks every machine in `ids` as now computing `job_id`.
    pub fn on_job_start(&mut self, job_id: u32, ids: &MachineRange, now: f64) {
        for id in ids.elements() {
            self.accrue(id, now);
            self.get_mut(id).on_job_start(job_id);
        }
    }

    /// Marks every machine in `ids` as no longer computing `job_id`.
    pub fn on_job_end(&mut self, job_id: u32, ids: &MachineRange, now: f64) {
        for id in ids.elements() {
            self.accrue(id, now);
            self.get_mut(id).on_job_end(job_id);
        }
    }

    /// Sets a machine's current pstate and state, accruing energy for the time spent in the
    /// outgoing state first.
    pub fn set_pstate(&mut self, id: u32, new_pstate: u32, new_state: MachineState, now: f64) {
        self.accrue(id, now);
        let machine = self.get_mut(id);
        machine.current_pstate = new_pstate;
        machine.state = new_state;
    }

    /// Total energy consumed by the whole cluster up to virtual time `now`, in joules.
    pub fn total_energy_joules(&mut self, now: f64) -> f64 {
        for id in 0..self.machines.len() as u32 {
            self.accrue(id, now);
        }
        self.energy.iter().map(|e| e.accumulated_joules).sum()
    }

    fn accrue(&mut self, id: u32, now: f64) {
        let watts = watts_for(self.get(id).state);
        let entry = &mut self.energy[id as usize];
        let elapsed = (now - entry.last_update).max(0.0);
        entry.accumulated_joules += elapsed * watts;
        entry.last_update = now;
    }
}
