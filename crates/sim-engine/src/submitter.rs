//! The job submitter: announces jobs to the orchestrator in submission-time order
//! (`SPEC_FULL.md` §4.9).

use std::sync::Arc;

use edcsim_core::ipp::{IppMessage, SERVER_MAILBOX};

use crate::context::SimContext;

/// Sends `SUBMITTER_HELLO`, then one `JOB_SUBMITTED` per job at its submission time (sleeping in
/// between to let virtual time catch up), then `SUBMITTER_BYE`.
///
/// Jobs are hard-sorted by ascending `submission_time` here rather than trusted to already be in
/// that order in the workload file.
pub async fn run_submitter(ctx: Arc<SimContext>) {
    let mut ordered: Vec<(u32, f64)> = {
        let jobs = ctx.jobs.lock().unwrap();
        jobs.iter().map(|job| (job.id, job.submission_time)).collect()
    };
    ordered.sort_by(|a, b| a.1.total_cmp(&b.1));

    ctx.kernel.send(SERVER_MAILBOX, IppMessage::SubmitterHello);

    for (job_id, submission_time) in ordered {
        let now = ctx.kernel.clock();
        let delay = (submission_time - now).max(0.0);
        ctx.kernel.sleep(delay).await;
        ctx.kernel.send(SERVER_MAILBOX, IppMessage::JobSubmitted { job_id });
    }

    ctx.kernel.send(SERVER_MAILBOX, IppMessage::SubmitterBye);
}
