//! The scheduling loops behind a running observer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::emitter::Emitter;
use super::ObserverState;
use crate::error::ObserverError;
use crate::sources::{SnapshotSource, SnapshotStream, SnapshotSubscription};

/// Exponential delay: `base * 2^attempt`, capped at `max`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Poll `source` every `period` until cancelled.
///
/// Ticks never overlap: a tick that overruns the period pushes the next one back instead of
/// queueing a burst.
pub(crate) async fn run_poll(
    source: Arc<dyn SnapshotSource>,
    mut emitter: Emitter,
    period: Duration,
    mut backoff: Backoff,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = source.fetch(emitter.pool()) => result,
        };

        match result.and_then(|snapshot| emitter.emit(snapshot)) {
            Ok(()) => backoff.reset(),
            Err(e) => {
                let delay = e.is_rate_limited().then(|| backoff.next_delay());
                emitter.fail(e);

                if let Some(delay) = delay {
                    warn!(
                        "Rate limited on {}, delaying next tick by {:?}",
                        emitter.pool().pool_id,
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(delay) => {},
                    }
                    ticker.reset();
                }
            },
        }
    }

    debug!("Poll loop for {} exited", emitter.pool().pool_id);
}

/// Drain `stream`, re-subscribing with backoff whenever it ends.
///
/// Gives up after `max_attempts` consecutive failed re-subscriptions and marks the observer
/// stopped.
pub(crate) async fn run_subscribe(
    source: Arc<dyn SnapshotSubscription>,
    mut emitter: Emitter,
    mut stream: SnapshotStream,
    mut backoff: Backoff,
    max_attempts: u32,
    state: Arc<Mutex<ObserverState>>,
    cancel: CancellationToken,
) {
    'connection: loop {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(snapshot)) => match emitter.emit(snapshot) {
                    Ok(()) => backoff.reset(),
                    Err(e) => emitter.fail(e),
                },
                Some(Err(e)) => emitter.fail(e),
                None => break,
            }
        }

        emitter.fail(ObserverError::Connection(
            "subscription stream ended".to_string(),
        ));

        loop {
            if backoff.attempts() >= max_attempts {
                error!(
                    "Giving up on {} after {} reconnect attempts",
                    emitter.pool().pool_id,
                    max_attempts
                );
                *state.lock().unwrap_or_else(|p| p.into_inner()) = ObserverState::Stopped;
                return;
            }

            let delay = backoff.next_delay();
            info!(
                "Reconnecting {} in {:?} (attempt {}/{})",
                emitter.pool().pool_id,
                delay,
                backoff.attempts(),
                max_attempts
            );

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(delay) => {},
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = source.subscribe(emitter.pool()) => result,
            };

            match result {
                Ok(next) => {
                    info!("Re-subscribed to {}", emitter.pool().pool_id);
                    stream = next;
                    continue 'connection;
                },
                Err(e) => emitter.fail(e),
            }
        }
    }
}
