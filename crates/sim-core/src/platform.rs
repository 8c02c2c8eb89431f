//! JSON platform loading: describes the cluster's hosts, their speeds, and their pstate tables.
//!
//! A simplified, crate-native substitute for a SimGrid XML platform description: no dependency
//! here parses SimGrid's platform XML, and the core only needs the handful of fields below.

use serde::Deserialize;
use std::path::Path;

use crate::error::SimError;
use crate::machine::{Machine, MachineState, PstateKind, SleepPstate};

/// Flops/sec assumed for a host whose platform entry does not specify `speed_flops`.
pub const DEFAULT_HOST_SPEED_FLOPS: f64 = 1.0e9;

#[derive(Debug, Deserialize)]
struct PlatformDocument {
    master_host: String,
    hosts: Vec<HostDocument>,
}

#[derive(Debug, Deserialize)]
struct HostDocument {
    name: String,
    #[serde(default)]
    speed_flops: Option<f64>,
    #[serde(default)]
    pstates: Vec<PstateDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum PstateDocument {
    Computation { id: u32 },
    Sleep {
        id: u32,
        switch_on_virtual: u32,
        switch_off_virtual: u32,
    },
    TransitionVirtual { id: u32 },
}

/// A loaded platform: every compute machine plus the id of the designated master machine.
#[derive(Debug, Clone)]
pub struct Platform {
    /// Every machine, dense-indexed by [`Machine::id`].
    pub machines: Vec<Machine>,
    /// The id of the host designated as master; it never appears in a job allocation.
    pub master_machine_id: u32,
}

/// Loads and validates a platform JSON document from `path`, requiring its `master_host` to equal
/// `expected_master_host`.
pub fn load_platform(path: &Path, expected_master_host: &str) -> Result<Platform, SimError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SimError::configuration(format!("cannot read platform file {path:?}: {e}")))?;
    parse_platform(&text, expected_master_host)
}

/// As [`load_platform`], but from an already-read JSON string (used directly by tests).
pub fn parse_platform(text: &str, expected_master_host: &str) -> Result<Platform, SimError> {
    let doc: PlatformDocument = serde_json::from_str(text)
        .map_err(|e| SimError::configuration(format!("malformed platform document: {e}")))?;

    if doc.hosts.is_empty() {
        return Err(SimError::configuration("platform file declares no hosts"));
    }
    if doc.master_host != expected_master_host {
        return Err(SimError::configuration(format!(
            "platform file's master_host {:?} does not match configured master host {:?}",
            doc.master_host, expected_master_host
        )));
    }

    let mut names = std::collections::HashSet::new();
    let mut machines = Vec::with_capacity(doc.hosts.len());
    let mut master_machine_id = None;

    for (idx, host) in doc.hosts.iter().enumerate() {
        if !names.insert(host.name.clone()) {
            return Err(SimError::configuration(format!("duplicate host name {:?}", host.name)));
        }
        let id = idx as u32;
        if host.name == expected_master_host {
            master_machine_id = Some(id);
        }

        let pstates_docs = if host.pstates.is_empty() {
            vec![PstateDocument::Computation { id: 0 }]
        } else {
            // serde_json::from_str already produced owned documents; cheaply clone the small vec.
            host.pstates.iter().map(clone_pstate_document).collect()
        };

        let mut pstates = Vec::new();
        let mut sleep_transitions = Vec::new();
        for pstate in &pstates_docs {
            match pstate {
                PstateDocument::Computation { id } => pstates.push((*id, PstateKind::Computation)),
                PstateDocument::Sleep {
                    id,
                    switch_on_virtual,
                    switch_off_virtual,
                } => {
                    pstates.push((*id, PstateKind::Sleep));
                    sleep_transitions.push((
                        *id,
                        SleepPstate {
                            switch_on_virtual: *switch_on_virtual,
                            switch_off_virtual: *switch_off_virtual,
                        },
                    ));
                }
                PstateDocument::TransitionVirtual { id } => {
                    pstates.push((*id, PstateKind::TransitionVirtual))
                }
            }
        }
        if !pstates.iter().any(|(_, kind)| *kind == PstateKind::Computation) {
            return Err(SimError::configuration(format!(
                "host {:?} declares no computation pstate",
                host.name
            )));
        }
        for (sleep_id, transition) in &sleep_transitions {
            let has = |wanted: u32| pstates.iter().any(|(id, _)| *id == wanted);
            if !has(transition.switch_on_virtual) || !has(transition.switch_off_virtual) {
                return Err(SimError::configuration(format!(
                    "host {:?} sleep pstate {} names a transition pstate that does not exist",
                    host.name, sleep_id
                )));
            }
        }

        let current_pstate = pstates
            .iter()
            .find(|(_, kind)| *kind == PstateKind::Computation)
            .map(|(id, _)| *id)
            .expect("checked above");

        machines.push(Machine {
            id,
            name: host.name.clone(),
            speed_flops_per_sec: host.speed_flops.unwrap_or(DEFAULT_HOST_SPEED_FLOPS),
            state: MachineState::Idle,
            jobs_being_computed: Default::default(),
            current_pstate,
            pstates,
            sleep_transitions,
        });
    }

    let master_machine_id = master_machine_id.ok_or_else(|| {
        SimError::configuration(format!(
            "no host named {:?} (the configured master host) in the platform file",
            expected_master_host
        ))
    })?;

    Ok(Platform { machines, master_machine_id })
}

fn clone_pstate_document(doc: &PstateDocument) -> PstateDocument {
    match doc {
        PstateDocument::Computation { id } => PstateDocument::Computation { id: *id },
        PstateDocument::Sleep {
            id,
            switch_on_virtual,
            switch_off_virtual,
        } => PstateDocument::Sleep {
            id: *id,
            switch_on_virtual: *switch_on_virtual,
            switch_off_virtual: *switch_off_virtual,
        },
        PstateDocument::TransitionVirtual { id } => PstateDocument::TransitionVirtual { id: *id },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_simple_platform() {
        let text = r#"{
            "master_host": "master",
            "hosts": [
                {"name": "master"},
                {"name": "node0", "speed_flops": 2.0e9},
                {"name": "node1"}
            ]
        }"#;
        let platform = parse_platform(text, "master").unwrap();
        assert_eq!(platform.machines.len(), 3);
        assert_eq!(platform.master_machine_id, 0);
        assert_eq!(platform.machines[1].speed_flops_per_sec, 2.0e9);
        assert_eq!(platform.machines[2].speed_flops_per_sec, DEFAULT_HOST_SPEED_FLOPS);
    }

    #[test]
    fn rejects_missing_master_host() {
        let text = r#"{"master_host": "master", "hosts": [{"name": "other"}]}"#;
        assert!(parse_platform(text, "master").is_err());
    }

    #[test]
    fn rejects_sleep_pstate_with_dangling_transition() {
        let text = r#"{
            "master_host": "master",
            "hosts": [{
                "name": "master",
                "pstates": [
                    {"kind": "computation", "id": 0},
                    {"kind": "sleep", "id": 1, "switch_on_virtual": 9, "switch_off_virtual": 2}
                ]
            }]
        }"#;
        assert!(parse_platform(text, "master").is_err());
    }
}
