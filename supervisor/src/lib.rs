//! Restarting long-running tasks.
//!
//! Tasks that are meant to run forever return `Result<Infallible>`, so the only way they can end
//! is by failing or panicking. [`supervise`] restarts them after a fixed backoff.

use core::{
    any::Any, convert::Infallible, future::Future, mem, panic::AssertUnwindSafe, time::Duration,
};

use anyhow::{Error, Result};
use futures::FutureExt as _;
use logging::{error_with_slot, warn_with_slot};
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug)]
pub struct RestartPolicy {
    pub backoff: Duration,
}

impl RestartPolicy {
    #[must_use]
    pub const fn fixed(backoff: Duration) -> Self {
        Self { backoff }
    }
}

pub async fn supervise<F, Fut>(
    name: &'static str,
    policy: RestartPolicy,
    mut task: F,
) -> Infallible
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Infallible>> + Send,
{
    loop {
        let result = AssertUnwindSafe(task())
            .catch_unwind()
            .await
            .map_err(payload_into_error);

        match result {
            Ok(Ok(never)) => match never {},
            Ok(Err(error)) => warn_with_slot!(
                "{name} failed, restarting in {:?}: {error:?}",
                policy.backoff,
            ),
            Err(error) => error_with_slot!(
                "{name} panicked, restarting in {:?}: {error:?}",
                policy.backoff,
            ),
        }

        tokio::time::sleep(policy.backoff).await;
    }
}

/// Supervised tasks spawned on the Tokio runtime.
///
/// Dropping the value aborts the tasks. [`BackgroundTasks::shutdown`] additionally waits for them
/// to stop, which guarantees any connections they hold are closed.
#[derive(Default)]
pub struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<Infallible>)>,
}

impl BackgroundTasks {
    pub fn spawn<F, Fut>(&mut self, name: &'static str, policy: RestartPolicy, task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Infallible>> + Send + 'static,
    {
        let handle = tokio::spawn(supervise(name, policy, task));
        self.handles.push((name, handle));
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.handles.iter().map(|(name, _)| *name).collect()
    }

    pub async fn shutdown(mut self) {
        for (name, handle) in mem::take(&mut self.handles) {
            handle.abort();

            if let Err(error) = handle.await {
                if !error.is_cancelled() {
                    warn_with_slot!("{name} did not stop cleanly: {error}");
                }
            }
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for (_, handle) in &self.handles {
            handle.abort();
        }
    }
}

#[must_use]
pub fn payload_into_error(payload: Box<dyn Any + Send + 'static>) -> Error {
    let payload = match payload.downcast::<String>() {
        Ok(string) => return Error::msg(*string),
        Err(other) => other,
    };

    if let Ok(string) = payload.downcast::<&str>() {
        return Error::msg(*string);
    }

    Error::msg("panic with payload of unknown type")
}
