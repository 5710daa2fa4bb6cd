use std::fmt;
use std::future::Future;

use tokio::task::JoinHandle;

/// A spawned task that is aborted when the handle is dropped. Session
/// readers, writers and connect attempts all hang off their owner through
/// this, so teardown is just a drop.
pub struct Task<T> {
    join_handle: JoinHandle<T>,
}

impl<T> Task<T>
where
    T: Send + 'static,
{
    pub fn spawn<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        Self {
            join_handle: tokio::spawn(future),
        }
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        self.join_handle.abort();
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task")
    }
}
