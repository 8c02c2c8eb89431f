//! Power-state transitioners and the coalesced-acknowledgment bookkeeping they feed
//! (`SPEC_FULL.md` §4.6, §9).

use std::sync::Arc;

use edcsim_core::{ipp::IppMessage, MachineRange, MachineState};

use crate::context::SimContext;

struct Group {
    new_pstate: u32,
    original: MachineRange,
    remaining: MachineRange,
}

/// Tracks outstanding groups of machines mid-transition to the same pstate, so that once the
/// whole group finishes the orchestrator emits a single coalesced `p:<range>=<pstate>` event
/// instead of one per machine.
#[derive(Default)]
pub struct PendingSwitches {
    groups: Vec<Group>,
}

impl PendingSwitches {
    /// An empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new group of machines transitioning to `new_pstate`.
    pub fn add(&mut self, ids: MachineRange, new_pstate: u32) {
        self.groups.push(Group { new_pstate, original: ids.clone(), remaining: ids });
    }

    /// Marks `machine_id` as having finished its transition to `new_pstate`. Returns the full
    /// original machine range once every machine in its group has finished.
    pub fn mark_done(&mut self, machine_id: u32, new_pstate: u32) -> Option<MachineRange> {
        let idx = self
            .groups
            .iter()
            .position(|g| g.new_pstate == new_pstate && g.original.contains(machine_id))?;
        let single = MachineRange::singleton(machine_id);
        self.groups[idx].remaining.remove(&single);
        if self.groups[idx].remaining.is_empty() {
            let group = self.groups.remove(idx);
            Some(group.original)
        } else {
            None
        }
    }

    /// Whether any group is still mid-transition.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Switches `machine_id` from a sleep pstate into `new_pstate` (a computation pstate), charging
/// the switch-on cost as a 1-flop parallel task on the transition pstate.
pub async fn switch_on_machine(ctx: Arc<SimContext>, machine_id: u32, new_pstate: u32) {
    let (transition_pstate, host_speed) = {
        let machines = ctx.machines.lock().unwrap();
        let machine = machines.get(machine_id);
        assert_eq!(
            machine.state,
            MachineState::TransitingFromSleepingToComputing,
            "switch_on_machine called on machine {machine_id} not mid-wakeup"
        );
        assert!(machine.jobs_being_computed.is_empty());
        let current = machine
            .sleep_transition(machine.current_pstate)
            .expect("machine must be in a sleep pstate to switch on")
            .switch_on_virtual;
        (current, machine.speed_flops_per_sec)
    };

    let now = ctx.kernel.clock();
    {
        let mut machines = ctx.machines.lock().unwrap();
        machines.set_pstate(
            machine_id,
            transition_pstate,
            MachineState::TransitingFromSleepingToComputing,
            now,
        );
    }

    let task = ctx.kernel.one_flop_task(host_speed);
    ctx.kernel.execute(&task).await;

    let now = ctx.kernel.clock();
    {
        let mut machines = ctx.machines.lock().unwrap();
        machines.set_pstate(machine_id, new_pstate, MachineState::Idle, now);
    }

    ctx.kernel.send(
        edcsim_core::ipp::SERVER_MAILBOX,
        IppMessage::SwitchedOn { machine_id, new_pstate },
    );
}

/// Switches `machine_id` from a computation pstate into `new_pstate` (a sleep pstate), charging
/// the switch-off cost as a 1-flop parallel task on the transition pstate.
pub async fn switch_off_machine(ctx: Arc<SimContext>, machine_id: u32, new_pstate: u32) {
    let host_speed;
    let transition_pstate;
    {
        let machines = ctx.machines.lock().unwrap();
        let machine = machines.get(machine_id);
        assert_eq!(
            machine.state,
            MachineState::TransitingFromComputingToSleeping,
            "switch_off_machine called on machine {machine_id} not mid-shutdown"
        );
        assert!(machine.jobs_being_computed.is_empty());
        transition_pstate = machine
            .sleep_transition(new_pstate)
            .expect("new_pstate must be a declared sleep pstate")
            .switch_off_virtual;
        host_speed = machine.speed_flops_per_sec;
    }

    let now = ctx.kernel.clock();
    {
        let mut machines = ctx.machines.lock().unwrap();
        machines.set_pstate(
            machine_id,
            transition_pstate,
            MachineState::TransitingFromComputingToSleeping,
            now,
        );
    }

    let task = ctx.kernel.one_flop_task(host_speed);
    ctx.kernel.execute(&task).await;

    let now = ctx.kernel.clock();
    {
        let mut machines = ctx.machines.lock().unwrap();
        machines.set_pstate(machine_id, new_pstate, MachineState::Sleeping, now);
    }

    ctx.kernel.send(
        edcsim_core::ipp::SERVER_MAILBOX,
        IppMessage::SwitchedOff { machine_id, new_pstate },
    );
}
