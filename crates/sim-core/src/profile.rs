//! Job profiles: the internal computation/communication pattern a job executes.

use crate::error::SimError;
use std::collections::{BTreeMap, HashSet};

/// A job profile, as loaded from the workload file.
#[derive(Debug, Clone)]
pub enum Profile {
    /// Sleeps for a fixed number of virtual seconds, then finishes.
    Delay {
        /// Duration in virtual seconds.
        seconds: f64,
    },
    /// Identical computation on every allocated host, identical communication between every pair.
    HomogeneousParallel {
        /// Flops executed on each host.
        cpu_per_host: f64,
        /// Bytes exchanged between every ordered pair of hosts.
        com_per_pair: f64,
    },
    /// Explicit per-host computation and per-pair communication matrices.
    HeterogeneousParallel {
        /// Number of hosts this profile expects to run on.
        nb_res: u32,
        /// Flops per host, length `nb_res`.
        cpu: Vec<f64>,
        /// Bytes per ordered host pair, length `nb_res * nb_res`, row-major.
        com: Vec<f64>,
    },
    /// Executes a named sequence of sub-profiles, `repeat` times.
    ComposedSequence {
        /// Number of times the sequence is replayed.
        repeat: u32,
        /// Names of the sub-profiles, resolved at execution time.
        sequence: Vec<String>,
    },
    /// Accepted by the grammar, rejected at validation: MPI trace replay is out of scope.
    Smpi,
}

/// Registry of profiles loaded from a workload, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Profiles {
    by_name: BTreeMap<String, Profile>,
}

impl Profiles {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a profile under `name`, overwriting any previous entry.
    pub fn insert(&mut self, name: impl Into<String>, profile: Profile) {
        self.by_name.insert(name.into(), profile);
    }

    /// Looks up a profile by name.
    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.by_name.get(name)
    }

    /// Whether a profile with this name is registered.
    pub fn exists(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Validates that every composed profile's sequence resolves to registered profiles with no
    /// reference cycle (a cycle would make execution non-terminating).
    pub fn check_composed_acyclic(&self) -> Result<(), SimError> {
        for name in self.by_name.keys() {
            let mut visiting = HashSet::new();
            self.visit_for_cycle(name, &mut visiting)?;
        }
        Ok(())
    }

    fn visit_for_cycle(&self, name: &str, visiting: &mut HashSet<String>) -> Result<(), SimError> {
        let Some(profile) = self.by_name.get(name) else {
            return Err(SimError::workload(format!("profile {name:?} is not registered")));
        };
        let Profile::ComposedSequence { sequence, .. } = profile else {
            return Ok(());
        };
        if !visiting.insert(name.to_string()) {
            return Err(SimError::workload(format!(
                "composed profile cycle detected through {name:?}"
            )));
        }
        for successor in sequence {
            if !self.by_name.contains_key(successor) {
                return Err(SimError::workload(format!(
                    "composed profile {name:?} references unknown profile {successor:?}"
                )));
            }
            self.visit_for_cycle(successor, visiting)?;
        }
        visiting.remove(name);
        Ok(())
    }
}
