//! Command-line surface for the `edcsim` binary (`SPEC_FULL.md` §6a).
//!
//! Grounded on the teacher's `clap`-derive `Cli` struct (`crates/client/src/cli.rs`): one field
//! per documented option, `env` fallbacks for the two values a run is most likely to want to
//! parameterize from its environment, and a `ValueEnum` for verbosity.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// How chatty the binary is about its own progress, independent of the `RunSummary` it prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Verbosity {
    /// Print nothing but the final summary.
    Quiet,
    /// Also print one line per EDC request/reply round trip.
    NetworkOnly,
    /// Also print one line per job submission and completion.
    Information,
    /// Print every batch event as it is queued or applied.
    Debug,
}

impl Cli {
    /// The local TCP address the EDC socket listens on by default.
    pub const DEFAULT_SOCKET_ADDR: &'static str = "127.0.0.1:28000";
    /// The platform host name expected to be the master machine by default.
    pub const DEFAULT_MASTER_HOST: &'static str = "master_host";
    /// The output-file prefix used when `--export` is not given.
    pub const DEFAULT_EXPORT_PREFIX: &'static str = "out";
}

/// `edcsim PLATFORM_FILE WORKLOAD_FILE [options]`
#[derive(Debug, Clone, Parser)]
#[command(name = "edcsim", version, about = "Batch-scheduler simulator with a pluggable external decision component")]
pub struct Cli {
    /// JSON platform description (hosts, speeds, pstate tables).
    pub platform_file: PathBuf,

    /// JSON workload description (jobs and profiles).
    pub workload_file: PathBuf,

    /// Local address to listen for the EDC connection on.
    #[arg(long, env = "EDCSIM_SOCKET", default_value = Cli::DEFAULT_SOCKET_ADDR)]
    pub socket: String,

    /// Platform host name expected to be the master machine.
    #[arg(long, env = "EDCSIM_MASTER_HOST", default_value = Cli::DEFAULT_MASTER_HOST)]
    pub master_host: String,

    /// Prefix for the three output files (`<prefix>_jobs.csv`, `_schedule.csv`, `_schedule.trace`).
    #[arg(long, default_value = Cli::DEFAULT_EXPORT_PREFIX)]
    pub export: String,

    /// Enable pstate-aware energy accounting and allocation checks.
    #[arg(long, default_value_t = false)]
    pub energy_plugin: bool,

    /// Allow more than one job to compute on the same machine at once.
    #[arg(long, default_value_t = false)]
    pub allow_space_sharing: bool,

    /// How much progress output to print while the simulation runs.
    #[arg(long, value_enum, default_value_t = Verbosity::Information)]
    pub verbosity: Verbosity,

    /// Shorthand for `--verbosity quiet`.
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

impl Cli {
    /// The effective verbosity after applying the `--quiet` shorthand.
    pub fn effective_verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            self.verbosity
        }
    }
}
