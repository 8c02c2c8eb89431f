//! Job descriptors and the job-state machine.

use crate::machine_range::MachineRange;
use std::collections::BTreeMap;

/// A job's lifecycle state. States only ever advance, enforced by [`Job::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Not yet announced to the orchestrator.
    NotSubmitted,
    /// Announced; waiting for an EDC decision.
    Submitted,
    /// Allocated and currently executing.
    Running,
    /// Finished executing within its walltime.
    CompletedSuccessfully,
    /// Killed because it exceeded its walltime.
    CompletedKilled,
    /// Never run; the EDC rejected it.
    Rejected,
}

impl JobState {
    /// Whether this state is terminal (no further transition is possible).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::CompletedSuccessfully | JobState::CompletedKilled | JobState::Rejected
        )
    }
}

/// A single job in the workload.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique id within the workload.
    pub id: u32,
    /// Name of the profile this job executes.
    pub profile: String,
    /// Virtual time at which the job is submitted.
    pub submission_time: f64,
    /// Maximum virtual run duration before the job is killed. `None` means unbounded.
    pub walltime: Option<f64>,
    /// Number of machines this job requires.
    pub required_resource_count: u32,
    /// Current lifecycle state.
    pub state: JobState,
    /// Virtual time the job started running, once known.
    pub starting_time: Option<f64>,
    /// Observed run duration, once the job has finished or been killed.
    pub runtime: Option<f64>,
    /// Machines the job is/was allocated to, in allocation order.
    pub allocation: MachineRange,
}

impl Job {
    /// Creates a freshly-loaded job, not yet submitted.
    pub fn new(
        id: u32,
        profile: impl Into<String>,
        submission_time: f64,
        walltime: Option<f64>,
        required_resource_count: u32,
    ) -> Self {
        Self {
            id,
            profile: profile.into(),
            submission_time,
            walltime,
            required_resource_count,
            state: JobState::NotSubmitted,
            starting_time: None,
            runtime: None,
            allocation: MachineRange::new(),
        }
    }

    /// Transitions this job to `next`, asserting the state machine only ever advances.
    ///
    /// # Panics
    ///
    /// Panics if `next` would move the job backwards or restart a terminal job; this would be a
    /// bug in the orchestrator, not a recoverable runtime condition.
    pub fn transition(&mut self, next: JobState) {
        assert!(!self.state.is_terminal(), "job {} is already terminal", self.id);
        self.state = next;
    }
}

/// Registry of jobs loaded from a workload, keyed by job id.
#[derive(Debug, Clone, Default)]
pub struct Jobs {
    by_id: BTreeMap<u32, Job>,
}

impl Jobs {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a job, overwriting any previous job with the same id.
    pub fn insert(&mut self, job: Job) {
        self.by_id.insert(job.id, job);
    }

    /// Returns a job by id, if it exists.
    pub fn get(&self, id: u32) -> Option<&Job> {
        self.by_id.get(&id)
    }

    /// Returns a mutable job by id, if it exists.
    pub fn get_mut(&mut self, id: u32) -> Option<&mut Job> {
        self.by_id.get_mut(&id)
    }

    /// Whether a job with this id is registered.
    pub fn exists(&self, id: u32) -> bool {
        self.by_id.contains_key(&id)
    }

    /// All jobs, in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.by_id.values()
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the registry has no jobs.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
