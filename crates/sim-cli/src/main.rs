mod cli;
mod shutdown;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use edcsim_core::{load_platform, load_workload};
use edcsim_engine::{export_run, run_orchestrator, run_submitter, EdcLink, SimContext, SimOptions};
use edcsim_kernel::Kernel;

use crate::cli::{Cli, Verbosity};
use crate::shutdown::spawn_ctrl_c_handler;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let verbosity = cli.effective_verbosity();

    let platform = load_platform(&cli.platform_file, &cli.master_host)
        .with_context(|| format!("loading platform file {:?}", cli.platform_file))?;
    let workload = load_workload(&cli.workload_file)
        .with_context(|| format!("loading workload file {:?}", cli.workload_file))?;

    if verbosity != Verbosity::Quiet {
        println!(
            "edcsim {}: {} machines, {} jobs, listening for the EDC on {}",
            env!("CARGO_PKG_VERSION"),
            platform.machines.len(),
            workload.jobs.len(),
            cli.socket
        );
    }

    // The EDC connection is real, non-virtual I/O (SPEC_FULL.md §4.1a) and must be established
    // before the kernel's virtual clock ever starts running.
    let edc = EdcLink::accept(&cli.socket)
        .await
        .with_context(|| format!("waiting for the EDC to connect on {}", cli.socket))?;

    let options = SimOptions {
        allow_space_sharing: cli.allow_space_sharing,
        energy_plugin: cli.energy_plugin,
    };

    let kernel = Kernel::new();
    let machines = edcsim_engine::Machines::new(platform.machines, platform.master_machine_id, 0.0);
    let ctx = Arc::new(SimContext::new(kernel.clone(), workload.jobs, workload.profiles, machines, options));

    let interrupted = Arc::new(tokio::sync::Notify::new());
    spawn_ctrl_c_handler(interrupted.clone());

    kernel.spawn(run_submitter(ctx.clone()));
    {
        let ctx = ctx.clone();
        kernel.spawn(async move {
            if let Err(err) = run_orchestrator(ctx.clone(), edc).await {
                ctx.fail_anyhow(err);
            }
        });
    }

    tokio::select! {
        _ = kernel.clone().run_driver() => {}
        _ = interrupted.notified() => {
            eprintln!("interrupted: aborting simulation immediately");
            std::process::exit(130);
        }
    }

    if let Some(err) = ctx.take_fatal() {
        return Err(anyhow::Error::new(err).context("simulation aborted"));
    }

    if verbosity == Verbosity::Debug {
        for line in ctx.trace.lock().unwrap().iter() {
            println!("{line}");
        }
    } else if matches!(verbosity, Verbosity::Information | Verbosity::NetworkOnly) {
        let wanted_prefixes: &[&str] = match verbosity {
            Verbosity::Information => &["queued S", "queued C"],
            Verbosity::NetworkOnly => &["-> EDC", "<- EDC"],
            _ => &[],
        };
        for line in ctx.trace.lock().unwrap().iter() {
            if wanted_prefixes.iter().any(|prefix| line.contains(prefix)) {
                println!("{line}");
            }
        }
    }

    let summary = export_run(&ctx, &cli.export).context("writing trace/CSV output")?;
    println!(
        "{} submitted, {} completed ({} successful, {} killed), makespan={:.6}, max_turnaround={:.6}, scheduler_us={}",
        summary.nb_jobs_submitted,
        summary.nb_jobs_completed,
        summary.nb_jobs_successful,
        summary.nb_jobs_killed,
        summary.makespan,
        summary.max_turnaround,
        summary.scheduler_microseconds,
    );

    Ok(())
}
