use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::error::ObserverError;
use crate::models::{PoolDescriptor, PoolSnapshot, PoolState, PriceUpdate, QuoteUpdate};
use crate::sink::{HealthSink, SnapshotSink, TickFailure};
use crate::utils::{render_decimal, PriceCalculator};

/// Flag held across sink delivery. `stop()` closes it, so once `stop()` returns no sink of
/// that run is called again.
#[derive(Clone, Debug)]
pub(crate) struct EmitGate(Arc<Mutex<bool>>);

impl EmitGate {
    pub fn open() -> Self {
        Self(Arc::new(Mutex::new(true)))
    }

    pub fn close(&self) {
        *self.lock() = false;
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        // A panicking sink must not wedge stop().
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Turns snapshots into price updates and hands them to the registered sinks.
///
/// Owns the only cross-tick state of an observer: the ordering key of the last emitted
/// snapshot.
pub(crate) struct Emitter {
    observer: String,
    pool: PoolDescriptor,
    calculator: PriceCalculator,
    snapshot_sinks: Arc<[Arc<dyn SnapshotSink>]>,
    health_sinks: Arc<[Arc<dyn HealthSink>]>,
    gate: EmitGate,
    last_key: Option<(u64, u64)>,
}

impl Emitter {
    pub fn new(
        observer: String,
        pool: PoolDescriptor,
        calculator: PriceCalculator,
        snapshot_sinks: Arc<[Arc<dyn SnapshotSink>]>,
        health_sinks: Arc<[Arc<dyn HealthSink>]>,
        gate: EmitGate,
    ) -> Self {
        Self {
            observer,
            pool,
            calculator,
            snapshot_sinks,
            health_sinks,
            gate,
            last_key: None,
        }
    }

    pub fn pool(&self) -> &PoolDescriptor {
        &self.pool
    }

    /// Validate, order-check and price a snapshot, then deliver it.
    ///
    /// A snapshot from an older block is a `Stale` error. Events are ordered by
    /// `(block, log index)`; a snapshot without a log index (a polled tick or a reconnect
    /// seed) is ordered by block alone, so it is dropped when anything from its block was
    /// already emitted. Such a drop produces nothing on either path and is logged at info.
    pub fn emit(&mut self, snapshot: PoolSnapshot) -> Result<(), ObserverError> {
        snapshot.validate()?;

        let key = snapshot.block.ordering_key();
        if let (Some(key), Some(last)) = (key, self.last_key) {
            if key.0 < last.0 {
                return Err(ObserverError::Stale {
                    last: last.0,
                    got: key.0,
                });
            }
            match snapshot.block.log_index {
                None if key.0 == last.0 => {
                    info!(
                        "[{}] No new block since {}, nothing emitted",
                        self.observer, key.0
                    );
                    return Ok(());
                },
                Some(log_index) if key <= last => {
                    debug!(
                        "[{}] Dropping repeated event at block {} log {}",
                        self.observer, key.0, log_index
                    );
                    return Ok(());
                },
                _ => {},
            }
        }

        let update = self.price_update(&snapshot)?;

        let open = self.gate.lock();
        if !*open {
            debug!("[{}] Observer stopped, discarding block {:?}", self.observer, update.block_number);
            return Ok(());
        }
        for sink in self.snapshot_sinks.iter() {
            sink.on_snapshot(&update);
        }
        drop(open);

        if key.is_some() {
            self.last_key = key;
        }
        Ok(())
    }

    /// Report a skipped tick to the log and to every health sink.
    pub fn fail(&self, error: ObserverError) {
        let failure = TickFailure {
            observer: self.observer.clone(),
            pool_id: self.pool.pool_id.clone(),
            at: Utc::now(),
            error,
        };

        warn!(
            "[{}] Skipped tick for {} at {}: {}",
            failure.observer,
            failure.pool_id,
            failure.at.to_rfc3339(),
            failure.error
        );

        let open = self.gate.lock();
        if !*open {
            return;
        }
        for sink in self.health_sinks.iter() {
            sink.on_failure(&failure);
        }
    }

    fn price_update(&self, snapshot: &PoolSnapshot) -> Result<PriceUpdate, ObserverError> {
        let decimals = self.pool.decimals();
        let prices = self.calculator.display_prices(&snapshot.state, decimals)?;

        let quote = snapshot.quote.as_ref().and_then(|quote| {
            let price = self.calculator.execution_price(quote, decimals)?;
            let impact = self.calculator.price_impact(&snapshot.state, quote);
            Some(QuoteUpdate {
                amount_in: quote.amount_in.to_string(),
                amount_out: quote.amount_out.to_string(),
                execution_price: render_decimal(&price),
                price_impact: impact.as_ref().map(render_decimal),
            })
        });

        let (volume_usd, fees_usd) = match &snapshot.state {
            PoolState::Indexed {
                volume_usd,
                fees_usd,
                ..
            } => (
                volume_usd.as_ref().map(render_decimal),
                fees_usd.as_ref().map(render_decimal),
            ),
            _ => (None, None),
        };

        let timestamp = snapshot
            .block
            .timestamp
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .unwrap_or(snapshot.observed_at);

        Ok(PriceUpdate {
            pool_id: self.pool.pool_id.clone(),
            block_number: snapshot.block.number,
            log_index: snapshot.block.log_index,
            timestamp,
            token0_symbol: self.pool.token0.symbol.clone(),
            token1_symbol: self.pool.token1.symbol.clone(),
            price0_in_1: render_decimal(&prices.price0_in_1),
            price1_in_0: render_decimal(&prices.price1_in_0),
            fee: snapshot.fee,
            tick: snapshot.tick(),
            quote,
            volume_usd,
            fees_usd,
        })
    }
}
