//! Waiter tasks: the `SCHED_NOP_ME_LATER` mechanism (`SPEC_FULL.md` §4.7).

use std::sync::Arc;

use edcsim_core::ipp::{IppMessage, SERVER_MAILBOX};

use crate::context::SimContext;

/// Sleeps until virtual time `target_time`, then posts `WAITING_DONE`.
///
/// # Panics
///
/// Panics if `target_time` is not strictly in the future at the moment this task starts running;
/// the orchestrator is responsible for enforcing that precondition before spawning a waiter.
pub async fn run_waiter(ctx: Arc<SimContext>, target_time: f64) {
    let now = ctx.kernel.clock();
    assert!(target_time > now, "waiter spawned for a non-future target_time ({target_time} <= {now})");
    ctx.kernel.sleep(target_time - now).await;
    ctx.kernel.send(SERVER_MAILBOX, IppMessage::WaitingDone);
}

#[cfg(test)]
mod tests {
    use super::*;
    use edcsim_core::{Jobs, Profiles};
    use edcsim_kernel::Kernel;

    use crate::context::{SimContext, SimOptions};
    use crate::machines::Machines;

    #[tokio::test(flavor = "current_thread")]
    async fn waiter_fires_waiting_done_at_the_target_time() {
        let kernel = Kernel::new();
        let ctx = Arc::new(SimContext::new(
            kernel.clone(),
            Jobs::new(),
            Profiles::new(),
            Machines::new(vec![], 0, 0.0),
            SimOptions::default(),
        ));
        let mut mailbox = kernel.mailbox(SERVER_MAILBOX);

        let driver_handle = tokio::task::spawn(kernel.clone().run_driver());
        kernel.spawn(run_waiter(ctx.clone(), 7.0));

        assert!(matches!(mailbox.recv().await, IppMessage::WaitingDone));
        assert_eq!(ctx.kernel.clock(), 7.0);
        drop(mailbox);
        driver_handle.await.unwrap();
    }
}
