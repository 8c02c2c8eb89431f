//! End-to-end scenarios: a real submitter + orchestrator + kernel driver, talking to a stub EDC
//! over an actual TCP socket, exercising the wire protocol exactly as `edcsim-cli`'s `main` wires
//! it up (`SPEC_FULL.md` §8 scenario 1, plus a finite-walltime `msg_par_hg` kill).

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use edcsim_core::{parse_platform, parse_workload};
use edcsim_engine::{export_run, run_orchestrator, run_submitter, EdcLink, SimContext, SimOptions};
use edcsim_kernel::Kernel;

async fn write_frame(stream: &mut TcpStream, text: &str) {
    let bytes = text.as_bytes();
    stream.write_all(&(bytes.len() as u32).to_le_bytes()).await.unwrap();
    stream.write_all(bytes).await.unwrap();
}

async fn read_frame(stream: &mut TcpStream) -> String {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.unwrap();
    String::from_utf8(body).unwrap()
}

/// Builds a `SimContext` from JSON platform/workload text and binds its EDC listener on an
/// OS-assigned port, returning the context, the link, and the address a stub EDC should connect
/// to.
async fn build(platform_json: &str, workload_json: &str, master_host: &str) -> (Arc<SimContext>, EdcLink) {
    let platform = parse_platform(platform_json, master_host).unwrap();
    let workload = parse_workload(workload_json).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let client = tokio::net::TcpStream::connect(addr);
    let accepted = EdcLink::accept_on(&listener);
    let (client, accepted) = tokio::join!(client, accepted);
    let stub_stream = client.unwrap();
    let edc = accepted.unwrap();

    let kernel = Kernel::new();
    let machines = edcsim_engine::Machines::new(platform.machines, platform.master_machine_id, 0.0);
    let ctx = Arc::new(SimContext::new(kernel, workload.jobs, workload.profiles, machines, SimOptions::default()));

    // Hand the stub's end of the socket back out via a one-shot channel so each test can drive
    // its own scripted reply sequence; `build` only owns wiring the harness up to the point the
    // TCP handshake has completed.
    STUB_STREAM.with(|cell| *cell.borrow_mut() = Some(stub_stream));

    (ctx, edc)
}

thread_local! {
    static STUB_STREAM: std::cell::RefCell<Option<TcpStream>> = std::cell::RefCell::new(None);
}

fn take_stub_stream() -> TcpStream {
    STUB_STREAM.with(|cell| cell.borrow_mut().take().expect("build() must run before take_stub_stream()"))
}

async fn run_to_completion(ctx: Arc<SimContext>, edc: EdcLink) -> Arc<SimContext> {
    let driver_handle = tokio::task::spawn(ctx.kernel.clone().run_driver());
    {
        let ctx = ctx.clone();
        ctx.kernel.clone().spawn(run_submitter(ctx.clone()));
        let orch_ctx = ctx.clone();
        ctx.kernel.clone().spawn(async move {
            if let Err(err) = run_orchestrator(orch_ctx.clone(), edc).await {
                orch_ctx.fail_anyhow(err);
            }
        });
    }
    tokio::time::timeout(Duration::from_secs(5), driver_handle)
        .await
        .expect("scenario deadlocked: the kernel driver never quiesced")
        .unwrap();
    if let Some(err) = ctx.take_fatal() {
        panic!("simulation reported a fatal error: {err}");
    }
    ctx
}

const SINGLE_DELAY_JOB_PLATFORM: &str = r#"{
    "master_host": "master_host",
    "hosts": [{"name": "node0"}, {"name": "node1"}, {"name": "master_host"}]
}"#;

const SINGLE_DELAY_JOB_WORKLOAD: &str = r#"{
    "jobs": [{"id": 1, "subtime": 0, "walltime": 100, "res": 2, "profile": "d"}],
    "profiles": {"d": {"type": "delay", "delay": 5}}
}"#;

/// `SPEC_FULL.md` §8 scenario 1: a single two-host delay job, allocated by the EDC's very first
/// reply. Also exercises the startup handshake: `sched_ready` must already be `true` before any
/// `SCHED_READY` has ever arrived, or the core never sends this opening request at all and the
/// stub below blocks forever on its first `read_frame`.
#[tokio::test(flavor = "current_thread")]
async fn single_delay_job_runs_end_to_end_over_the_wire() {
    let (ctx, edc) = build(SINGLE_DELAY_JOB_PLATFORM, SINGLE_DELAY_JOB_WORKLOAD, "master_host").await;
    let mut stub = take_stub_stream();

    let stub_task = tokio::task::spawn(async move {
        let request = read_frame(&mut stub).await;
        assert!(request.contains(":S:1"), "expected the opening batch to carry S:1, got {request:?}");
        write_frame(&mut stub, "1:0.000000|0.000000:J:1=0,1").await;

        let request = read_frame(&mut stub).await;
        assert!(request.contains(":C:1"), "expected the second batch to carry C:1, got {request:?}");
        write_frame(&mut stub, "1:5.000000").await;
    });

    let ctx = run_to_completion(ctx, edc).await;
    stub_task.await.unwrap();

    let jobs = ctx.jobs.lock().unwrap();
    let job = jobs.get(1).unwrap();
    assert_eq!(job.state, edcsim_core::JobState::CompletedSuccessfully);
    assert_eq!(job.starting_time, Some(0.0));
    assert_eq!(job.runtime, Some(5.0));
    drop(jobs);

    let summary = export_run(&ctx, "/tmp/edcsim_test_scenario1").unwrap();
    assert_eq!(summary.makespan, 5.0);
}

const WALLTIME_KILL_PLATFORM: &str = r#"{
    "master_host": "master_host",
    "hosts": [{"name": "node0"}, {"name": "master_host"}]
}"#;

const WALLTIME_KILL_WORKLOAD: &str = r#"{
    "jobs": [{"id": 1, "subtime": 0, "walltime": 2, "res": 1, "profile": "heavy"}],
    "profiles": {"heavy": {"type": "msg_par_hg", "cpu": 1e19, "com": 0}}
}"#;

/// A `msg_par_hg` job whose computation vastly exceeds its walltime. Before the walltime race was
/// folded into a single timer, this deadlocked the kernel driver (the bounded `execute_heterogeneous`
/// branch parked twice for one `alive` task), so this test's `tokio::time::timeout` is the
/// regression guard, not a formality.
#[tokio::test(flavor = "current_thread")]
async fn heterogeneous_job_is_killed_by_its_walltime_over_the_wire() {
    let (ctx, edc) = build(WALLTIME_KILL_PLATFORM, WALLTIME_KILL_WORKLOAD, "master_host").await;
    let mut stub = take_stub_stream();

    let stub_task = tokio::task::spawn(async move {
        let request = read_frame(&mut stub).await;
        assert!(request.contains(":S:1"), "expected the opening batch to carry S:1, got {request:?}");
        write_frame(&mut stub, "1:0.000000|0.000000:J:1=0").await;

        let request = read_frame(&mut stub).await;
        assert!(request.contains(":C:1"), "expected the second batch to carry C:1, got {request:?}");
        write_frame(&mut stub, "1:2.000000").await;
    });

    let ctx = run_to_completion(ctx, edc).await;
    stub_task.await.unwrap();

    let jobs = ctx.jobs.lock().unwrap();
    let job = jobs.get(1).unwrap();
    assert_eq!(job.state, edcsim_core::JobState::CompletedKilled);
    assert_eq!(job.runtime, Some(2.0));
}
