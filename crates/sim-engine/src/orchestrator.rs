//! The server orchestrator: the central process that consumes every inter-process message,
//! updates simulation state, and drives the EDC request/reply cycle.

use std::sync::Arc;

use anyhow::Context;
use edcsim_core::ipp::{IppMessage, SERVER_MAILBOX};
use edcsim_core::job::JobState;
use edcsim_core::machine::MachineState;
use edcsim_core::{MachineRange, SimError};

use crate::edc::{run_request_reply, BatchEvent, EdcLink};
use crate::executor::run_job;
use crate::power::{switch_off_machine, switch_on_machine};
use crate::waiter::run_waiter;
use crate::context::SimContext;

/// Runs the orchestrator loop until the simulation's termination condition holds or a fatal
/// error is reported. Owns the link to the EDC and spawns exactly one request/reply task at a
/// time.
pub async fn run_orchestrator(ctx: Arc<SimContext>, edc: EdcLink) -> anyhow::Result<()> {
    let mut mailbox = ctx.kernel.mailbox(SERVER_MAILBOX);
    let mut batch: Vec<BatchEvent> = Vec::new();

    loop {
        let message = tokio::select! {
            msg = mailbox.recv() => msg,
            _ = ctx.fatal_notify.notified() => {
                return Err(unreported_fatal(&ctx).into());
            }
        };

        handle_message(&ctx, message, &mut batch).context("handling an inter-process message")?;

        if ctx.has_failed() {
            return Err(unreported_fatal(&ctx).into());
        }

        maybe_dispatch_to_edc(&ctx, &edc, &mut batch);

        if ctx.counters.lock().unwrap().is_terminated() {
            return Ok(());
        }
    }
}

fn unreported_fatal(ctx: &Arc<SimContext>) -> SimError {
    ctx.take_fatal().unwrap_or_else(|| SimError::protocol("unreported fatal error"))
}

fn maybe_dispatch_to_edc(ctx: &Arc<SimContext>, edc: &EdcLink, batch: &mut Vec<BatchEvent>) {
    let ready = {
        let mut counters = ctx.counters.lock().unwrap();
        if counters.sched_ready && !batch.is_empty() {
            counters.sched_ready = false;
            true
        } else {
            false
        }
    };
    if !ready {
        return;
    }
    let now = ctx.kernel.clock();
    let drained = std::mem::take(batch);
    let task_ctx = ctx.clone();
    let task_edc = edc.clone();
    ctx.kernel.spawn(async move {
        run_request_reply(task_ctx, task_edc, now, drained).await;
    });
}

fn handle_message(
    ctx: &Arc<SimContext>,
    message: IppMessage,
    batch: &mut Vec<BatchEvent>,
) -> Result<(), SimError> {
    let now = ctx.kernel.clock();
    match message {
        IppMessage::SubmitterHello => {
            ctx.counters.lock().unwrap().nb_submitters += 1;
        }
        IppMessage::SubmitterBye => {
            ctx.counters.lock().unwrap().nb_submitters_finished += 1;
        }
        IppMessage::JobSubmitted { job_id } => {
            {
                let mut jobs = ctx.jobs.lock().unwrap();
                let job = jobs
                    .get_mut(job_id)
                    .ok_or_else(|| SimError::protocol(format!("JOB_SUBMITTED for unknown job {job_id}")))?;
                job.transition(JobState::Submitted);
            }
            ctx.counters.lock().unwrap().nb_submitted += 1;
            push_event(ctx, batch, now, 'S', Some(job_id.to_string()));
        }
        IppMessage::JobCompleted { job_id, .. } => {
            {
                let mut counters = ctx.counters.lock().unwrap();
                counters.nb_running -= 1;
                counters.nb_completed += 1;
            }
            push_event(ctx, batch, now, 'C', Some(job_id.to_string()));
        }
        IppMessage::SchedRejection { job_id } => {
            {
                let mut jobs = ctx.jobs.lock().unwrap();
                let job = jobs
                    .get_mut(job_id)
                    .ok_or_else(|| SimError::protocol(format!("SCHED_REJECTION for unknown job {job_id}")))?;
                if job.state != JobState::Submitted {
                    return Err(SimError::protocol(format!(
                        "SCHED_REJECTION for job {job_id} not in SUBMITTED state"
                    )));
                }
                job.transition(JobState::Rejected);
            }
            ctx.counters.lock().unwrap().nb_completed += 1;
        }
        IppMessage::SchedAllocation { allocations } => {
            for allocation in allocations {
                apply_allocation(ctx, allocation.job_id, allocation.machine_ids)?;
            }
        }
        IppMessage::SchedNop => {
            let counters = *ctx.counters.lock().unwrap();
            if counters.looks_deadlocked() {
                eprintln!(
                    "warning: SCHED_NOP with nb_running=0, nb_scheduled={} < nb_submitted={}: possible deadlock",
                    counters.nb_scheduled, counters.nb_submitted
                );
            }
        }
        IppMessage::SchedNopMeLater { target_time } => {
            if target_time <= now {
                return Err(SimError::protocol(format!(
                    "SCHED_NOP_ME_LATER target_time {target_time} is not in the future (now={now})"
                )));
            }
            ctx.counters.lock().unwrap().nb_waiters += 1;
            ctx.kernel.spawn(run_waiter(ctx.clone(), target_time));
        }
        IppMessage::WaitingDone => {
            ctx.counters.lock().unwrap().nb_waiters -= 1;
            push_event(ctx, batch, now, 'N', None);
        }
        IppMessage::PstateModification { machine_ids, new_pstate } => {
            apply_pstate_modification(ctx, batch, now, machine_ids, new_pstate)?;
        }
        IppMessage::SwitchedOn { machine_id, new_pstate } => {
            complete_switch(ctx, batch, now, machine_id, new_pstate);
        }
        IppMessage::SwitchedOff { machine_id, new_pstate } => {
            complete_switch(ctx, batch, now, machine_id, new_pstate);
        }
        IppMessage::SchedTellMeEnergy => {
            let joules = ctx.machines.lock().unwrap().total_energy_joules(now);
            push_event(ctx, batch, now, 'e', Some(format!("{joules:.3}")));
        }
        IppMessage::SchedReady => {
            ctx.counters.lock().unwrap().sched_ready = true;
        }
    }
    Ok(())
}

fn push_event(ctx: &Arc<SimContext>, batch: &mut Vec<BatchEvent>, now: f64, stamp: char, content: Option<String>) {
    batch.push(BatchEvent { timestamp: now, stamp, content: content.clone() });
    ctx.record_trace(format!(
        "queued {stamp}{}",
        content.map(|c| format!(":{c}")).unwrap_or_default()
    ));
}

fn apply_allocation(ctx: &Arc<SimContext>, job_id: u32, machine_ids: MachineRange) -> Result<(), SimError> {
    let required = {
        let jobs = ctx.jobs.lock().unwrap();
        let job = jobs
            .get(job_id)
            .ok_or_else(|| SimError::protocol(format!("SCHED_ALLOCATION for unknown job {job_id}")))?;
        if job.state != JobState::Submitted {
            return Err(SimError::protocol(format!(
                "SCHED_ALLOCATION for job {job_id} not in SUBMITTED state"
            )));
        }
        job.required_resource_count
    };

    if machine_ids.size() != required {
        return Err(SimError::protocol(format!(
            "SCHED_ALLOCATION for job {job_id} names {} machines, job requires {required}",
            machine_ids.size()
        )));
    }

    {
        let machines = ctx.machines.lock().unwrap();
        for id in machine_ids.elements() {
            if id as usize >= machines.len() {
                return Err(SimError::protocol(format!("SCHED_ALLOCATION names unknown machine {id}")));
            }
            let machine = machines.get(id);
            if !ctx.options.allow_space_sharing && !machine.jobs_being_computed.is_empty() {
                return Err(SimError::invariant(format!(
                    "machine {id} already has a job computing on it and space-sharing is disabled"
                )));
            }
            if ctx.options.energy_plugin && !machine.is_allocatable() {
                return Err(SimError::invariant(format!(
                    "machine {id} is not in an allocatable state/pstate"
                )));
            }
        }
    }

    {
        let mut jobs = ctx.jobs.lock().unwrap();
        let job = jobs.get_mut(job_id).expect("checked above");
        job.allocation = machine_ids;
        job.transition(JobState::Running);
    }

    {
        let mut counters = ctx.counters.lock().unwrap();
        counters.nb_running += 1;
        counters.nb_scheduled += 1;
    }

    ctx.kernel.spawn(run_job(ctx.clone(), job_id));
    Ok(())
}

fn apply_pstate_modification(
    ctx: &Arc<SimContext>,
    batch: &mut Vec<BatchEvent>,
    now: f64,
    machine_ids: MachineRange,
    new_pstate: u32,
) -> Result<(), SimError> {
    // Group by outgoing-state kind so each machine's branch is decided independently, but a
    // single coalesced pending-switch group is registered per (outgoing kind, target) pair —
    // matching the original's "one ack per coalesced request" behavior even when the EDC names
    // mixed-state machines in one request.
    let mut computation_to_computation = MachineRange::new();
    let mut computation_to_sleep = MachineRange::new();
    let mut sleep_to_computation = MachineRange::new();

    {
        let machines = ctx.machines.lock().unwrap();
        for id in machine_ids.elements() {
            if id as usize >= machines.len() {
                return Err(SimError::protocol(format!("PSTATE_MODIFICATION names unknown machine {id}")));
            }
            let machine = machines.get(id);
            let new_kind = machine
                .pstates
                .iter()
                .find(|(pid, _)| *pid == new_pstate)
                .map(|(_, kind)| *kind)
                .ok_or_else(|| {
                    SimError::protocol(format!("machine {id} has no declared pstate {new_pstate}"))
                })?;
            let current_kind = machine.current_pstate_kind();
            use edcsim_core::machine::PstateKind;
            match (current_kind, new_kind) {
                (PstateKind::Computation, PstateKind::Computation) => {
                    computation_to_computation.insert_value(id);
                }
                (PstateKind::Computation, PstateKind::Sleep) => {
                    if !machine.jobs_being_computed.is_empty() {
                        return Err(SimError::invariant(format!(
                            "machine {id} cannot switch to sleep while running a job"
                        )));
                    }
                    computation_to_sleep.insert_value(id);
                }
                (PstateKind::Sleep, PstateKind::Computation) => {
                    sleep_to_computation.insert_value(id);
                }
                (from, to) => {
                    return Err(SimError::invariant(format!(
                        "machine {id} cannot transition from {from:?} to {to:?} pstate kind"
                    )));
                }
            }
        }
    }

    if !computation_to_computation.is_empty() {
        let mut machines = ctx.machines.lock().unwrap();
        for id in computation_to_computation.elements() {
            machines.set_pstate(id, new_pstate, MachineState::Idle, now);
        }
        drop(machines);
        push_event(
            ctx,
            batch,
            now,
            'p',
            Some(format!("{}={}", computation_to_computation.to_hyphen_string(), new_pstate)),
        );
    }

    if !computation_to_sleep.is_empty() {
        {
            let mut machines = ctx.machines.lock().unwrap();
            for id in computation_to_sleep.elements() {
                let current = machines.get(id).current_pstate;
                machines.set_pstate(id, current, MachineState::TransitingFromComputingToSleeping, now);
            }
        }
        ctx.pending_switches.lock().unwrap().add(computation_to_sleep.clone(), new_pstate);
        ctx.counters.lock().unwrap().nb_switching += computation_to_sleep.size();
        for id in computation_to_sleep.elements() {
            ctx.kernel.spawn(switch_off_machine(ctx.clone(), id, new_pstate));
        }
    }

    if !sleep_to_computation.is_empty() {
        {
            let mut machines = ctx.machines.lock().unwrap();
            for id in sleep_to_computation.elements() {
                let current = machines.get(id).current_pstate;
                machines.set_pstate(id, current, MachineState::TransitingFromSleepingToComputing, now);
            }
        }
        ctx.pending_switches.lock().unwrap().add(sleep_to_computation.clone(), new_pstate);
        ctx.counters.lock().unwrap().nb_switching += sleep_to_computation.size();
        for id in sleep_to_computation.elements() {
            ctx.kernel.spawn(switch_on_machine(ctx.clone(), id, new_pstate));
        }
    }

    Ok(())
}

fn complete_switch(ctx: &Arc<SimContext>, batch: &mut Vec<BatchEvent>, now: f64, machine_id: u32, new_pstate: u32) {
    let done_group = ctx.pending_switches.lock().unwrap().mark_done(machine_id, new_pstate);
    ctx.counters.lock().unwrap().nb_switching -= 1;
    if let Some(group) = done_group {
        push_event(ctx, batch, now, 'p', Some(format!("{}={}", group.to_hyphen_string(), new_pstate)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edcsim_core::job::Job;
    use edcsim_core::machine::{Machine, MachineState as MS, PstateKind};
    use edcsim_core::{Jobs, Profiles};
    use edcsim_kernel::Kernel;

    use crate::context::SimOptions;
    use crate::machines::Machines;

    fn two_machines() -> Vec<Machine> {
        (0..2)
            .map(|id| Machine {
                id,
                name: format!("node-{id}"),
                speed_flops_per_sec: 1.0e9,
                state: MS::Idle,
                jobs_being_computed: Default::default(),
                current_pstate: 0,
                pstates: vec![(0, PstateKind::Computation)],
                sleep_transitions: vec![],
            })
            .collect()
    }

    #[test]
    fn rejects_allocation_with_wrong_cardinality() {
        let kernel = Kernel::new();
        let mut jobs = Jobs::new();
        let mut job = Job::new(1, "p", 0.0, None, 2);
        job.state = JobState::Submitted;
        jobs.insert(job);
        let ctx = Arc::new(SimContext::new(
            kernel,
            jobs,
            Profiles::new(),
            Machines::new(two_machines(), 1, 0.0),
            SimOptions::default(),
        ));
        let err = apply_allocation(&ctx, 1, MachineRange::singleton(0)).unwrap_err();
        assert!(matches!(err, SimError::Protocol(_)));
    }

    #[test]
    fn rejects_allocation_for_job_not_submitted() {
        let kernel = Kernel::new();
        let mut jobs = Jobs::new();
        jobs.insert(Job::new(1, "p", 0.0, None, 1));
        let ctx = Arc::new(SimContext::new(
            kernel,
            jobs,
            Profiles::new(),
            Machines::new(two_machines(), 1, 0.0),
            SimOptions::default(),
        ));
        let err = apply_allocation(&ctx, 1, MachineRange::singleton(0)).unwrap_err();
        assert!(matches!(err, SimError::Protocol(_)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn accepting_an_allocation_marks_the_job_running() {
        let kernel = Kernel::new();
        let mut jobs = Jobs::new();
        let mut job = Job::new(1, "p", 0.0, None, 1);
        job.state = JobState::Submitted;
        jobs.insert(job);
        let mut profiles = Profiles::new();
        profiles.insert("p", edcsim_core::profile::Profile::Delay { seconds: 1.0 });
        let ctx = Arc::new(SimContext::new(
            kernel,
            jobs,
            profiles,
            Machines::new(two_machines(), 1, 0.0),
            SimOptions::default(),
        ));
        apply_allocation(&ctx, 1, MachineRange::singleton(0)).unwrap();
        let jobs = ctx.jobs.lock().unwrap();
        assert_eq!(jobs.get(1).unwrap().state, JobState::Running);
    }
}
