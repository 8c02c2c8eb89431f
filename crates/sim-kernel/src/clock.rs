//! The virtual clock: a cooperative, single-threaded discrete-event driver.
//!
//! All suspension in the simulated world reduces to [`Kernel::sleep`] or a mailbox
//! [`Mailbox::recv`]; the driver advances the clock only once every live task is parked in one of
//! those two places. A task blocked on genuinely external I/O (the EDC socket read) is
//! deliberately *not* parked, which freezes the whole simulation while it is outstanding. This
//! matches the original tool's single-process blocking-`read()` semantics.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

use edcsim_core::ipp::IppMessage;

struct TimerEntry {
    wake_at: f64,
    seq: u64,
    waker: oneshot::Sender<()>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.wake_at == other.wake_at && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    /// Reversed so that `BinaryHeap` (a max-heap) pops the earliest, then oldest, timer first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .wake_at
            .total_cmp(&self.wake_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct ClockState {
    now: f64,
    timers: BinaryHeap<TimerEntry>,
    next_seq: u64,
    alive: usize,
    parked: usize,
}

struct MailboxEntry {
    sender: mpsc::UnboundedSender<IppMessage>,
    receiver: Option<mpsc::UnboundedReceiver<IppMessage>>,
}

struct KernelInner {
    state: Mutex<ClockState>,
    progress: Notify,
    mailboxes: Mutex<std::collections::HashMap<String, MailboxEntry>>,
}

/// Handle to the virtual-time kernel. Cheaply cloneable; every clone shares the same clock,
/// timer heap, and mailbox registry.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    /// Creates a fresh kernel with its clock at `t = 0`.
    pub fn new() -> Self {
        Kernel {
            inner: Arc::new(KernelInner {
                state: Mutex::new(ClockState {
                    now: 0.0,
                    timers: BinaryHeap::new(),
                    next_seq: 0,
                    alive: 0,
                    parked: 0,
                }),
                progress: Notify::new(),
                mailboxes: Mutex::new(std::collections::HashMap::new()),
            }),
        }
    }

    /// Current virtual time, in seconds.
    pub fn clock(&self) -> f64 {
        self.inner.state.lock().unwrap().now
    }

    /// Spawns `fut` as a tracked kernel task. The kernel counts it as "alive" until it completes,
    /// which is what lets the driver recognise quiescence.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.alive += 1;
        }
        self.notify_progress();
        let kernel = self.clone();
        tokio::task::spawn(async move {
            fut.await;
            {
                let mut state = kernel.inner.state.lock().unwrap();
                state.alive -= 1;
            }
            kernel.notify_progress();
        })
    }

    /// Suspends the caller until the virtual clock has advanced by `seconds`. A non-positive
    /// duration resolves immediately without registering a timer.
    ///
    /// If the returned future is dropped before it resolves (e.g. the walltime race in job
    /// execution cancels the loser), `parked` is still released — the timer entry stays in the
    /// heap and fires into a disconnected channel, but the release happens via [`ParkGuard`] on
    /// drop, not on delivery, so a discarded sleep never leaves the clock permanently stuck.
    pub async fn sleep(&self, seconds: f64) {
        if seconds <= 0.0 {
            return;
        }
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock().unwrap();
            let wake_at = state.now + seconds;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.timers.push(TimerEntry { wake_at, seq, waker: tx });
            state.parked += 1;
        }
        self.notify_progress();
        let _guard = ParkGuard(self);
        let _ = rx.await;
    }

    /// Sends `msg` to the named mailbox, creating it if this is the first send.
    pub fn send(&self, mailbox: &str, msg: IppMessage) {
        let sender = {
            let mut mailboxes = self.inner.mailboxes.lock().unwrap();
            mailboxes
                .entry(mailbox.to_string())
                .or_insert_with(|| {
                    let (sender, receiver) = mpsc::unbounded_channel();
                    MailboxEntry { sender, receiver: Some(receiver) }
                })
                .sender
                .clone()
        };
        let _ = sender.send(msg);
    }

    /// Takes ownership of the named mailbox's receiving end.
    ///
    /// # Panics
    ///
    /// Panics if this mailbox's receiver has already been taken. At most one task may ever
    /// consume a given mailbox.
    pub fn mailbox(&self, name: &str) -> Mailbox {
        let receiver = {
            let mut mailboxes = self.inner.mailboxes.lock().unwrap();
            let entry = mailboxes.entry(name.to_string()).or_insert_with(|| {
                let (sender, receiver) = mpsc::unbounded_channel();
                MailboxEntry { sender, receiver: Some(receiver) }
            });
            entry
                .receiver
                .take()
                .unwrap_or_else(|| panic!("mailbox {name:?} already has a consumer"))
        };
        Mailbox { kernel: self.clone(), receiver }
    }

    /// Runs the clock-advancement driver until every kernel task has finished. Spawn this once,
    /// alongside the simulation's tasks, and await the returned handle at shutdown.
    pub async fn run_driver(self) {
        loop {
            enum Step {
                Stop,
                Fired,
                Wait,
            }
            let step = {
                let mut state = self.inner.state.lock().unwrap();
                if state.alive == 0 {
                    Step::Stop
                } else if state.parked == state.alive {
                    match state.timers.peek() {
                        Some(top) => {
                            let wake_at = top.wake_at;
                            state.now = wake_at;
                            let mut fired = Vec::new();
                            while matches!(state.timers.peek(), Some(t) if t.wake_at == wake_at) {
                                fired.push(state.timers.pop().unwrap());
                            }
                            drop(state);
                            for entry in fired {
                                // A failed send means the sleeper was already dropped (e.g. lost
                                // a walltime race); its ParkGuard released `parked` on drop, so
                                // there is nothing left to do here.
                                let _ = entry.waker.send(());
                            }
                            Step::Fired
                        }
                        None => {
                            eprintln!(
                                "warning: kernel deadlock: every task is parked and no timer is pending"
                            );
                            Step::Stop
                        }
                    }
                } else {
                    Step::Wait
                }
            };
            match step {
                Step::Stop => return,
                Step::Fired => {
                    self.notify_progress();
                    continue;
                }
                Step::Wait => self.inner.progress.notified().await,
            }
        }
    }

    fn notify_progress(&self) {
        self.inner.progress.notify_waiters();
    }

    fn enter_parked(&self) {
        self.inner.state.lock().unwrap().parked += 1;
        self.notify_progress();
    }

    fn exit_parked(&self) {
        self.inner.state.lock().unwrap().parked -= 1;
        self.notify_progress();
    }
}

/// Releases one unit of `parked` on drop. Used by [`Kernel::sleep`] so that a sleep future
/// dropped before it resolves (cancelled out of a `tokio::select!`) still releases its park
/// exactly once, instead of relying on the timer actually firing.
struct ParkGuard<'a>(&'a Kernel);

impl Drop for ParkGuard<'_> {
    fn drop(&mut self) {
        self.0.exit_parked();
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::new()
    }
}

/// The consuming end of a named mailbox, obtained via [`Kernel::mailbox`].
pub struct Mailbox {
    kernel: Kernel,
    receiver: mpsc::UnboundedReceiver<IppMessage>,
}

impl Mailbox {
    /// Blocks until a message is available.
    pub async fn recv(&mut self) -> IppMessage {
        self.kernel.enter_parked();
        let msg = self
            .receiver
            .recv()
            .await
            .expect("mailbox has no remaining senders");
        self.kernel.exit_parked();
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn sleep_advances_the_clock() {
        let kernel = Kernel::new();
        let driver = kernel.clone();
        let sleeper = kernel.clone();
        let driver_handle = tokio::task::spawn(driver.run_driver());
        kernel
            .spawn(async move {
                sleeper.sleep(5.0).await;
            })
            .await
            .unwrap();
        driver_handle.await.unwrap();
        assert_eq!(kernel.clock(), 5.0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn mailbox_delivers_in_send_order() {
        let kernel = Kernel::new();
        let driver_handle = tokio::task::spawn(kernel.clone().run_driver());
        let mut mailbox = kernel.mailbox("server");
        kernel.send("server", IppMessage::SubmitterHello);
        kernel.send("server", IppMessage::SubmitterBye);
        assert!(matches!(mailbox.recv().await, IppMessage::SubmitterHello));
        assert!(matches!(mailbox.recv().await, IppMessage::SubmitterBye));
        drop(mailbox);
        driver_handle.await.unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn two_sleepers_wake_in_time_order() {
        let kernel = Kernel::new();
        let driver_handle = tokio::task::spawn(kernel.clone().run_driver());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let k1 = kernel.clone();
        let tx1 = tx.clone();
        kernel.spawn(async move {
            k1.sleep(3.0).await;
            tx1.send("short").unwrap();
        });
        let k2 = kernel.clone();
        kernel.spawn(async move {
            k2.sleep(1.0).await;
            tx.send("long").unwrap();
        });

        assert_eq!(rx.recv().await.unwrap(), "long");
        assert_eq!(rx.recv().await.unwrap(), "short");
        driver_handle.await.unwrap();
        assert_eq!(kernel.clock(), 3.0);
    }
}
