//! JSON workload loading: parses the workload document grammar and builds validated
//! [`Jobs`](crate::job::Jobs) / [`Profiles`](crate::profile::Profiles) registries.
//!
//! The core protocol and orchestration logic only need the registries, not any particular file
//! format, but a runnable binary needs a loader, so this crate carries one matching the original
//! tool's JSON grammar.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::SimError;
use crate::job::{Job, Jobs};
use crate::profile::{Profile, Profiles};

#[derive(Debug, Deserialize)]
struct WorkloadDocument {
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
    jobs: Vec<JobDocument>,
    profiles: BTreeMap<String, ProfileDocument>,
}

#[derive(Debug, Deserialize)]
struct JobDocument {
    id: u32,
    subtime: f64,
    /// Non-positive means unbounded, matching the original tool's convention.
    walltime: f64,
    res: u32,
    profile: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ProfileDocument {
    Delay { delay: f64 },
    MsgPar { cpu: Vec<f64>, com: Vec<f64> },
    MsgParHg { cpu: f64, com: f64 },
    Composed { nb: u32, seq: Vec<String> },
    Smpi {
        #[serde(default)]
        #[allow(dead_code)]
        trace: Option<String>,
    },
}

/// The result of loading and validating a workload file.
#[derive(Debug, Clone, Default)]
pub struct Workload {
    /// Loaded jobs, keyed by id.
    pub jobs: Jobs,
    /// Loaded profiles, keyed by name.
    pub profiles: Profiles,
}

/// Loads and validates a workload JSON document from `path`.
///
/// Validation rejects: a job referencing an unknown profile, a composed profile referencing an
/// unknown or cyclic successor, an `msg_par` profile whose `cpu` length disagrees with any job
/// that requests it, and any reference to an `smpi` profile (accepted by the grammar, rejected
/// here — trace replay is out of scope).
pub fn load_workload(path: &Path) -> Result<Workload, SimError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SimError::configuration(format!("cannot read workload file {path:?}: {e}")))?;
    parse_workload(&text)
}

/// As [`load_workload`], but from an already-read JSON string (used directly by tests).
pub fn parse_workload(text: &str) -> Result<Workload, SimError> {
    let doc: WorkloadDocument = serde_json::from_str(text)
        .map_err(|e| SimError::configuration(format!("malformed workload document: {e}")))?;

    let mut profiles = Profiles::new();
    for (name, profile_doc) in &doc.profiles {
        let profile = match profile_doc {
            ProfileDocument::Delay { delay } => Profile::Delay { seconds: *delay },
            ProfileDocument::MsgPar { cpu, com } => {
                let nb_res = cpu.len() as u32;
                if com.len() as u32 != nb_res * nb_res {
                    return Err(SimError::workload(format!(
                        "profile {name:?}: com matrix length {} does not match nb_res^2 ({})",
                        com.len(),
                        nb_res * nb_res
                    )));
                }
                Profile::HeterogeneousParallel {
                    nb_res,
                    cpu: cpu.clone(),
                    com: com.clone(),
                }
            }
            ProfileDocument::MsgParHg { cpu, com } => Profile::HomogeneousParallel {
                cpu_per_host: *cpu,
                com_per_pair: *com,
            },
            ProfileDocument::Composed { nb, seq } => Profile::ComposedSequence {
                repeat: *nb,
                sequence: seq.clone(),
            },
            ProfileDocument::Smpi { .. } => Profile::Smpi,
        };
        profiles.insert(name.clone(), profile);
    }
    profiles.check_composed_acyclic()?;

    let mut jobs = Jobs::new();
    for job_doc in &doc.jobs {
        let Some(profile) = profiles.get(&job_doc.profile) else {
            return Err(SimError::workload(format!(
                "job {} references unknown profile {:?}",
                job_doc.id, job_doc.profile
            )));
        };
        if let Profile::Smpi = profile {
            return Err(SimError::workload(format!(
                "job {} uses an smpi profile; trace replay is not supported",
                job_doc.id
            )));
        }
        if let Profile::HeterogeneousParallel { nb_res, .. } = profile {
            if *nb_res != job_doc.res {
                return Err(SimError::workload(format!(
                    "job {} requests {} resources but profile {:?} expects {}",
                    job_doc.id, job_doc.res, job_doc.profile, nb_res
                )));
            }
        }
        let walltime = if job_doc.walltime > 0.0 {
            Some(job_doc.walltime)
        } else {
            None
        };
        jobs.insert(Job::new(
            job_doc.id,
            job_doc.profile.clone(),
            job_doc.subtime,
            walltime,
            job_doc.res,
        ));
    }

    Ok(Workload { jobs, profiles })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_simple_workload() {
        let text = r#"{
            "jobs": [{"id": 1, "subtime": 0, "walltime": 100, "res": 2, "profile": "p1"}],
            "profiles": {"p1": {"type": "delay", "delay": 5}}
        }"#;
        let workload = parse_workload(text).unwrap();
        assert_eq!(workload.jobs.len(), 1);
        let job = workload.jobs.get(1).unwrap();
        assert_eq!(job.walltime, Some(100.0));
    }

    #[test]
    fn non_positive_walltime_is_unbounded() {
        let text = r#"{
            "jobs": [{"id": 1, "subtime": 0, "walltime": -1, "res": 1, "profile": "p1"}],
            "profiles": {"p1": {"type": "delay", "delay": 1}}
        }"#;
        let workload = parse_workload(text).unwrap();
        assert_eq!(workload.jobs.get(1).unwrap().walltime, None);
    }

    #[test]
    fn rejects_unknown_profile_reference() {
        let text = r#"{
            "jobs": [{"id": 1, "subtime": 0, "walltime": 10, "res": 1, "profile": "missing"}],
            "profiles": {}
        }"#;
        assert!(parse_workload(text).is_err());
    }

    #[test]
    fn rejects_composed_profile_cycle() {
        let text = r#"{
            "jobs": [],
            "profiles": {
                "a": {"type": "composed", "nb": 1, "seq": ["b"]},
                "b": {"type": "composed", "nb": 1, "seq": ["a"]}
            }
        }"#;
        assert!(parse_workload(text).is_err());
    }

    #[test]
    fn rejects_resource_count_mismatch() {
        let text = r#"{
            "jobs": [{"id": 1, "subtime": 0, "walltime": 10, "res": 3, "profile": "p1"}],
            "profiles": {"p1": {"type": "msg_par", "cpu": [1.0, 2.0], "com": [0.0, 0.0, 0.0, 0.0]}}
        }"#;
        assert!(parse_workload(text).is_err());
    }

    #[test]
    fn rejects_smpi_profile() {
        let text = r#"{
            "jobs": [{"id": 1, "subtime": 0, "walltime": 10, "res": 1, "profile": "p1"}],
            "profiles": {"p1": {"type": "smpi"}}
        }"#;
        assert!(parse_workload(text).is_err());
    }
}
