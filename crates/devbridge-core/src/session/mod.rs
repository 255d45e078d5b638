//! Attaching the instrumentation script to target processes.
//!
//! The [`Orchestrator`] drives an [`InstrumentationEngine`] over the pids a
//! [`ProcessLocator`] reports, tolerating per-target failures.

mod engine;
mod frida;
mod locator;
#[cfg(test)]
pub(crate) mod mock;
mod orchestrator;

use std::future::Future;
use std::time::Duration;

pub use engine::*;
pub use frida::*;
pub use locator::*;
pub use orchestrator::*;

use crate::error::{Error, Result};

/// Run one teardown or attach step, failing with [`Error::Timeout`] if it
/// does not finish within `timeout`.
pub(crate) async fn bounded<T>(
    timeout: Duration,
    step: impl FnOnce() -> String,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            step: step(),
            timeout,
        }),
    }
}
