use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::{Instant, sleep_until};

use super::Task;

enum TimerType {
    Once,
    Repeat,
}

/// A cancellable timer. Dropping the handle cancels it; `refresh` pushes
/// the deadline out by the full interval. Expiry runs the callback, which
/// posts an event to its owner's queue; a fire that raced with cancel is
/// absorbed by the event validator at dequeue time.
pub struct Timer {
    refresh_tx: UnboundedSender<()>,
    _task: Task<()>,
}

impl Timer {
    pub fn once<F, Fut>(secs: u64, cb: F) -> Timer
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        Self::new(Duration::from_secs(secs), TimerType::Once, cb)
    }

    pub fn once_ms<F, Fut>(millis: u64, cb: F) -> Timer
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        Self::new(Duration::from_millis(millis), TimerType::Once, cb)
    }

    pub fn repeat<F, Fut>(secs: u64, cb: F) -> Timer
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        Self::new(Duration::from_secs(secs), TimerType::Repeat, cb)
    }

    fn new<F, Fut>(interval: Duration, typ: TimerType, mut cb: F) -> Timer
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (refresh_tx, mut refresh_rx) = mpsc::unbounded_channel::<()>();
        let task = Task::spawn(async move {
            let mut deadline = Instant::now() + interval;
            loop {
                tokio::select! {
                    _ = sleep_until(deadline) => {
                        cb().await;
                        match typ {
                            TimerType::Once => break,
                            TimerType::Repeat => {
                                deadline = Instant::now() + interval;
                            }
                        }
                    }
                    msg = refresh_rx.recv() => {
                        match msg {
                            Some(()) => {
                                deadline = Instant::now() + interval;
                            }
                            None => break,
                        }
                    }
                }
            }
        });
        Timer {
            refresh_tx,
            _task: task,
        }
    }

    pub fn refresh(&self) {
        let _ = self.refresh_tx.send(());
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timer")
    }
}
