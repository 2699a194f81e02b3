use super::Connection;
use parking_lot::Mutex;
use std::sync::Arc;

/// Request-scoped "current connection" slot.
///
/// A coordinator owns one of these and hands it to whatever code needs to
/// discover the active shard. [`SharedConnection::scope`] installs a
/// connection and returns a guard that restores the previous one when it is
/// dropped, so the slot is restored on success, on `?` early returns and on
/// panics alike.
#[derive(Debug, Clone, Default)]
pub struct SharedConnection {
    current: Arc<Mutex<Option<Arc<dyn Connection>>>>,
}

impl SharedConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection installed by the innermost active scope
    pub fn current(&self) -> Option<Arc<dyn Connection>> {
        self.current.lock().clone()
    }

    /// Install `connection` until the returned guard is dropped
    #[must_use = "the connection is restored as soon as the guard is dropped"]
    pub fn scope(&self, connection: Arc<dyn Connection>) -> SharedConnectionGuard {
        let previous = self.current.lock().replace(connection);
        SharedConnectionGuard {
            slot: self.current.clone(),
            previous,
        }
    }
}

/// Restores the previously installed connection on drop
pub struct SharedConnectionGuard {
    slot: Arc<Mutex<Option<Arc<dyn Connection>>>>,
    previous: Option<Arc<dyn Connection>>,
}

impl Drop for SharedConnectionGuard {
    fn drop(&mut self) {
        *self.slot.lock() = self.previous.take();
    }
}
