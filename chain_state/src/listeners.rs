use core::panic::AssertUnwindSafe;
use std::{panic, sync::Arc};

use anyhow::Result;
use logging::warn_with_slot;
use parking_lot::RwLock;
use supervisor::payload_into_error;

pub type Listener<E> = Arc<dyn Fn(&E) -> Result<()> + Send + Sync>;

/// Callbacks invoked in registration order for every event of one kind.
///
/// A listener that fails or panics is logged and skipped. It does not affect the listeners after
/// it or the task delivering the event.
pub struct Listeners<E> {
    kind: &'static str,
    listeners: RwLock<Vec<Listener<E>>>,
}

impl<E> Listeners<E> {
    #[must_use]
    pub const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, listener: impl Fn(&E) -> Result<()> + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Returns the number of listeners that failed.
    pub fn notify(&self, event: &E) -> usize {
        // Listeners may register other listeners.
        let listeners = self.listeners.read().clone();
        let mut failures = 0;

        for (position, listener) in listeners.iter().enumerate() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener(event)))
                .map_err(payload_into_error);

            match result {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    failures += 1;
                    warn_with_slot!("{} listener {position} failed: {error:?}", self.kind);
                }
                Err(error) => {
                    failures += 1;
                    warn_with_slot!("{} listener {position} panicked: {error:?}", self.kind);
                }
            }
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn failing_listeners_do_not_stop_later_ones() {
        let listeners = Listeners::<u64>::new("test");
        let seen = Arc::new(Mutex::new(vec![]));

        listeners.register({
            let seen = Arc::clone(&seen);
            move |event| {
                seen.lock().push(("first", *event));
                Ok(())
            }
        });

        listeners.register(|_| bail!("listener error"));
        listeners.register(|_| panic!("listener panic"));

        listeners.register({
            let seen = Arc::clone(&seen);
            move |event| {
                seen.lock().push(("last", *event));
                Ok(())
            }
        });

        assert_eq!(listeners.notify(&7), 2);
        assert_eq!(listeners.notify(&8), 2);

        assert_eq!(
            *seen.lock(),
            [("first", 7), ("last", 7), ("first", 8), ("last", 8)],
        );
    }

    #[test]
    fn listeners_can_register_listeners() {
        let listeners = Arc::new(Listeners::<()>::new("test"));

        listeners.register({
            let listeners = Arc::downgrade(&listeners);
            move |_| {
                if let Some(listeners) = listeners.upgrade() {
                    listeners.register(|_| Ok(()));
                }
                Ok(())
            }
        });

        assert_eq!(listeners.notify(&()), 0);
        assert_eq!(listeners.len(), 2);
    }
}
