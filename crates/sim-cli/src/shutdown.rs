//! Ctrl-C handling: a `SIGINT` aborts the simulation immediately (`SPEC_FULL.md` §5's shutdown
//! note). Simpler than, but grounded in, the teacher's two-stage `ShutdownController` /
//! `spawn_ctrl_c_handler` pair (`crates/client/src/shutdown.rs`) — a simulator has no in-flight
//! real-world work a graceful first stage would let finish.

use tokio::sync::Notify;

/// Spawns a task that waits for `SIGINT` and wakes every waiter on `interrupted` exactly once.
pub fn spawn_ctrl_c_handler(interrupted: std::sync::Arc<Notify>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted.notify_waiters();
        }
    });
}
