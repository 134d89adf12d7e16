// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Supervised periodic background tasks.
//!
//! Each tick runs inside its own error boundary: an `Err` or a panic is
//! logged and the loop carries on with the next tick.

use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Run `tick` every `period` until `shutdown` is cancelled. The first tick
/// fires one period after spawning.
pub fn spawn_periodic<F, Fut, E>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display,
{
    let period = period.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::debug!(task = name, "periodic task stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match AssertUnwindSafe(tick()).catch_unwind().await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::warn!(task = name, error = %e, "periodic task failed")
                        }
                        Err(panic) => tracing::error!(
                            task = name,
                            panic = panic_message(&*panic),
                            "periodic task panicked"
                        ),
                    }
                }
            }
        }
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
