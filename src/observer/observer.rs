use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::emitter::{EmitGate, Emitter};
use super::runner::{run_poll, run_subscribe, Backoff};
use crate::config::ObserverSettings;
use crate::error::ObserverError;
use crate::models::PoolDescriptor;
use crate::sink::{HealthSink, SnapshotSink};
use crate::sources::Feed;
use crate::utils::{PriceCalculator, DEFAULT_SIGNIFICANT_DIGITS};

/// Shortest polling interval accepted. Shorter requests are clamped.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// How long `shutdown` waits for the task before walking away from it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// `Idle -> Starting -> Running -> Stopped`, and `Stopped -> Starting` again on `start`.
/// A failed start returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    Idle,
    Starting,
    Running,
    Stopped,
}

impl fmt::Display for ObserverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObserverState::Idle => "idle",
            ObserverState::Starting => "starting",
            ObserverState::Running => "running",
            ObserverState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverOptions {
    /// Default polling interval, used when `start` is given none.
    pub interval: Duration,
    pub significant_digits: u64,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Consecutive failed re-subscriptions tolerated before the observer stops.
    pub max_reconnect_attempts: u32,
}

impl Default for ObserverOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            significant_digits: DEFAULT_SIGNIFICANT_DIGITS,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            max_reconnect_attempts: 10,
        }
    }
}

struct RunningTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    gate: EmitGate,
}

/// Watches one pool and pushes a price update to every registered sink on each tick or
/// event.
///
/// Sinks are captured when `start` is called; sinks registered later take effect on the
/// next start.
pub struct PoolObserver {
    name: String,
    feed: Feed,
    options: ObserverOptions,
    calculator: PriceCalculator,
    snapshot_sinks: Vec<Arc<dyn SnapshotSink>>,
    health_sinks: Vec<Arc<dyn HealthSink>>,
    state: Arc<Mutex<ObserverState>>,
    task: Option<RunningTask>,
    pool: Option<PoolDescriptor>,
}

impl PoolObserver {
    pub fn new(
        name: impl Into<String>,
        feed: Feed,
        options: ObserverOptions,
    ) -> Result<Self, ObserverError> {
        let calculator = PriceCalculator::new(options.significant_digits)?;
        if options.backoff_base.is_zero() {
            return Err(ObserverError::Config(
                "backoff base must be positive".to_string(),
            ));
        }

        Ok(Self {
            name: name.into(),
            feed,
            options,
            calculator,
            snapshot_sinks: Vec::new(),
            health_sinks: Vec::new(),
            state: Arc::new(Mutex::new(ObserverState::Idle)),
            task: None,
            pool: None,
        })
    }

    /// Build the feed and options described by one configured observer.
    pub fn from_settings(settings: &ObserverSettings) -> Result<Self, ObserverError> {
        Self::new(
            settings.name.clone(),
            Feed::from_settings(settings)?,
            settings.options(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ObserverState {
        *self.lock_state()
    }

    /// Pool constants loaded by the last successful start.
    pub fn pool(&self) -> Option<&PoolDescriptor> {
        self.pool.as_ref()
    }

    pub fn on_snapshot(&mut self, sink: impl SnapshotSink + 'static) -> &mut Self {
        self.snapshot_sinks.push(Arc::new(sink));
        self
    }

    /// Register a sink that is shared with other observers.
    pub fn on_snapshot_shared(&mut self, sink: Arc<dyn SnapshotSink>) -> &mut Self {
        self.snapshot_sinks.push(sink);
        self
    }

    pub fn on_failure(&mut self, sink: impl HealthSink + 'static) -> &mut Self {
        self.health_sinks.push(Arc::new(sink));
        self
    }

    /// Connect and start the tick or event loop.
    ///
    /// Connection failures are returned here and leave the observer `Idle`; everything that
    /// goes wrong afterwards is reported to the health sinks.
    pub async fn start(&mut self, interval: Option<Duration>) -> Result<(), ObserverError> {
        let state = self.state();
        if matches!(state, ObserverState::Starting | ObserverState::Running) {
            return Err(ObserverError::InvalidState(state));
        }

        // A previous run may have stopped itself after exhausting reconnects.
        if let Some(task) = self.task.take() {
            task.gate.close();
            task.cancel.cancel();
        }

        self.set_state(ObserverState::Starting);
        let period = self.effective_interval(interval);

        match self.launch(period).await {
            Ok(task) => {
                self.task = Some(task);
                Ok(())
            },
            Err(e) => {
                error!("Observer {} failed to start: {}", self.name, e);
                self.set_state(ObserverState::Idle);
                Err(e)
            },
        }
    }

    /// Stop emitting. Once this returns no sink is called again for this run. Idempotent.
    pub fn stop(&self) {
        if let Some(task) = &self.task {
            task.gate.close();
            task.cancel.cancel();
        }

        let mut state = self.lock_state();
        if matches!(*state, ObserverState::Starting | ObserverState::Running) {
            *state = ObserverState::Stopped;
            info!("Observer {} stopped", self.name);
        }
    }

    /// `stop`, then wait (bounded) for the task to exit.
    pub async fn shutdown(&mut self) {
        self.stop();

        let Some(task) = self.task.take() else {
            return;
        };
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, task.handle).await {
            Ok(_) => info!("Observer {} shut down", self.name),
            Err(_) => warn!(
                "Observer {} did not stop within {:?}, continuing...",
                self.name, SHUTDOWN_TIMEOUT
            ),
        }
    }

    async fn launch(&mut self, period: Duration) -> Result<RunningTask, ObserverError> {
        let pool = self.feed.connect().await.map_err(fatal)?;

        let gate = EmitGate::open();
        let cancel = CancellationToken::new();
        let emitter = Emitter::new(
            self.name.clone(),
            pool.clone(),
            self.calculator,
            self.snapshot_sinks.clone().into(),
            self.health_sinks.clone().into(),
            gate.clone(),
        );
        let backoff = Backoff::new(self.options.backoff_base, self.options.backoff_max);

        let handle = match &self.feed {
            Feed::Poll(source) => {
                self.set_state(ObserverState::Running);
                info!(
                    "Observer {} polling {} every {:?}",
                    self.name,
                    pool.pair_label(),
                    period
                );
                tokio::spawn(run_poll(
                    source.clone(),
                    emitter,
                    period,
                    backoff,
                    cancel.clone(),
                ))
            },
            Feed::Subscribe(source) => {
                let stream = source.subscribe(&pool).await.map_err(fatal)?;
                self.set_state(ObserverState::Running);
                info!(
                    "Observer {} subscribed to {}",
                    self.name,
                    pool.pair_label()
                );
                tokio::spawn(run_subscribe(
                    source.clone(),
                    emitter,
                    stream,
                    backoff,
                    self.options.max_reconnect_attempts,
                    self.state.clone(),
                    cancel.clone(),
                ))
            },
        };

        self.pool = Some(pool);
        Ok(RunningTask {
            handle,
            cancel,
            gate,
        })
    }

    fn effective_interval(&self, requested: Option<Duration>) -> Duration {
        let period = requested.unwrap_or(self.options.interval);
        if period < MIN_INTERVAL {
            warn!(
                "Observer {}: interval {:?} is below {:?}, clamping",
                self.name, period, MIN_INTERVAL
            );
            return MIN_INTERVAL;
        }
        period
    }

    fn lock_state(&self) -> MutexGuard<'_, ObserverState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: ObserverState) {
        *self.lock_state() = state;
    }
}

impl Drop for PoolObserver {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.cancel.cancel();
        }
    }
}

/// Anything that fails before the loop runs is a connection failure, except misuse.
fn fatal(error: ObserverError) -> ObserverError {
    match error {
        ObserverError::Connection(_) | ObserverError::Config(_) | ObserverError::InvalidState(_) => {
            error
        },
        other => ObserverError::Connection(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BlockRef, FeeTier, PoolSnapshot, PoolState, PriceUpdate, Protocol, TokenInfo,
    };
    use crate::sink::TickFailure;
    use crate::sources::testing::{FakeRpc, POOL};
    use crate::sources::{
        RpcPollSource, SnapshotSource, SnapshotStream, SnapshotSubscription,
    };
    use async_trait::async_trait;
    use futures::{stream, StreamExt};
    use num_bigint::BigInt;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn descriptor() -> PoolDescriptor {
        PoolDescriptor {
            pool_id: "0xbb2b8038a1640196fbe3e38816f3e67cba72d940".into(),
            protocol: Protocol::V2,
            token0: TokenInfo::new("0x2260fac5e5542a773aa44fbcfedf7c193bc2c599", "WBTC", None),
            token1: TokenInfo::new("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2", "ETH", None),
            fee: FeeTier::V2,
            tick_spacing: None,
        }
    }

    fn snapshot(block: u64, log_index: Option<u64>) -> PoolSnapshot {
        PoolSnapshot::new(
            &descriptor(),
            PoolState::ConstantProduct {
                reserve0: BigInt::from(10),
                reserve1: BigInt::from(150),
            },
            BlockRef {
                number: Some(block),
                log_index,
                ..Default::default()
            },
        )
    }

    /// One snapshot per fetch at an ever-increasing block, optionally slow.
    struct CountingSource {
        next_block: AtomicU64,
        delay: Duration,
        fetches: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl CountingSource {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                next_block: AtomicU64::new(100),
                delay,
                fetches: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SnapshotSource for CountingSource {
        async fn connect(&self) -> Result<PoolDescriptor, ObserverError> {
            Ok(descriptor())
        }

        async fn fetch(&self, _pool: &PoolDescriptor) -> Result<PoolSnapshot, ObserverError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(snapshot(self.next_block.fetch_add(1, Ordering::SeqCst), None))
        }
    }

    /// Hands out pre-recorded streams, then refuses to connect.
    struct ScriptedSubscription {
        streams: Mutex<VecDeque<Vec<Result<PoolSnapshot, ObserverError>>>>,
    }

    #[async_trait]
    impl SnapshotSubscription for ScriptedSubscription {
        async fn connect(&self) -> Result<PoolDescriptor, ObserverError> {
            Ok(descriptor())
        }

        async fn subscribe(&self, _pool: &PoolDescriptor) -> Result<SnapshotStream, ObserverError> {
            match self.streams.lock().unwrap().pop_front() {
                Some(items) => Ok(stream::iter(items).boxed()),
                None => Err(ObserverError::Connection("connection refused".into())),
            }
        }
    }

    type Updates = Arc<Mutex<Vec<PriceUpdate>>>;
    type Failures = Arc<Mutex<Vec<TickFailure>>>;

    fn observer(feed: Feed, options: ObserverOptions) -> (PoolObserver, Updates, Failures) {
        let updates: Updates = Arc::default();
        let failures: Failures = Arc::default();
        let mut observer = PoolObserver::new("test", feed, options).unwrap();

        let u = updates.clone();
        observer.on_snapshot(move |update: &PriceUpdate| u.lock().unwrap().push(update.clone()));
        let f = failures.clone();
        observer.on_failure(move |failure: &TickFailure| f.lock().unwrap().push(failure.clone()));

        (observer, updates, failures)
    }

    fn rpc_feed(rpc: Arc<FakeRpc>, protocol: Protocol) -> Feed {
        Feed::Poll(Arc::new(RpcPollSource::new(
            rpc,
            POOL,
            protocol,
            Duration::from_secs(1),
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sink_calls_after_stop() {
        let source = CountingSource::new(Duration::ZERO);
        let (mut observer, updates, _) = observer(Feed::Poll(source), ObserverOptions::default());

        observer.start(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(observer.state(), ObserverState::Running);

        sleep(Duration::from_millis(1500)).await;
        assert_eq!(updates.lock().unwrap().len(), 2);

        observer.stop();
        assert_eq!(observer.state(), ObserverState::Stopped);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(updates.lock().unwrap().len(), 2);

        // Idempotent.
        observer.stop();
        assert_eq!(observer.state(), ObserverState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_tick_is_discarded_on_stop() {
        let source = CountingSource::new(Duration::from_millis(500));
        let (mut observer, updates, failures) =
            observer(Feed::Poll(source.clone()), ObserverOptions::default());

        observer.start(Some(Duration::from_secs(1))).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        observer.stop();
        sleep(Duration::from_secs(3)).await;

        assert!(updates.lock().unwrap().is_empty());
        assert!(failures.lock().unwrap().is_empty());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sub_read_goes_to_error_path_only() {
        let rpc = Arc::new(FakeRpc::new(100));
        rpc.fail("liquidity");
        let (mut observer, updates, failures) =
            observer(rpc_feed(rpc, Protocol::V3), ObserverOptions::default());

        observer.start(Some(Duration::from_secs(1))).await.unwrap();
        sleep(Duration::from_millis(500)).await;
        observer.stop();

        assert!(updates.lock().unwrap().is_empty());
        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].error, ObserverError::Read { .. }));
        assert_eq!(failures[0].observer, "test");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_read_times_out() {
        let rpc = Arc::new(FakeRpc::new(100));
        rpc.hang("getReserves");
        let (mut observer, updates, failures) =
            observer(rpc_feed(rpc, Protocol::V2), ObserverOptions::default());

        // Default interval of 10s: a single tick, bounded by the 1s read timeout.
        observer.start(None).await.unwrap();
        sleep(Duration::from_secs(5)).await;
        observer.stop();

        assert!(updates.lock().unwrap().is_empty());
        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        match &failures[0].error {
            ObserverError::Timeout { call, after } => {
                assert_eq!(call, "getReserves");
                assert_eq!(*after, Duration::from_secs(1));
            },
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_delays_next_tick() {
        let rpc = Arc::new(FakeRpc::new(100));
        rpc.rate_limit("getReserves");
        let options = ObserverOptions {
            backoff_base: Duration::from_secs(5),
            ..Default::default()
        };
        let (mut observer, updates, failures) = observer(rpc_feed(rpc, Protocol::V2), options);

        // Tick at 0s, backoff of 5s, next tick one interval later at 6s.
        observer.start(Some(Duration::from_secs(1))).await.unwrap();
        sleep(Duration::from_millis(5500)).await;
        assert_eq!(failures.lock().unwrap().len(), 1);

        sleep(Duration::from_secs(1)).await;
        observer.stop();

        assert!(updates.lock().unwrap().is_empty());
        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|f| f.error.is_rate_limited()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_tick_defers_the_next() {
        let source = CountingSource::new(Duration::from_millis(1500));
        let (mut observer, updates, _) =
            observer(Feed::Poll(source.clone()), ObserverOptions::default());

        // Fetches start at 0s, 1.5s and 3s instead of on the 1s grid.
        observer.start(Some(Duration::from_secs(1))).await.unwrap();
        sleep(Duration::from_millis(4000)).await;
        observer.stop();

        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(updates.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_positive_reserves_never_reach_sinks() {
        let rpc = Arc::new(FakeRpc::new(100));
        rpc.set_reserves(0, 150);
        let (mut observer, updates, failures) =
            observer(rpc_feed(rpc, Protocol::V2), ObserverOptions::default());

        observer.start(Some(Duration::from_secs(1))).await.unwrap();
        sleep(Duration::from_millis(2500)).await;
        observer.stop();

        assert!(updates.lock().unwrap().is_empty());
        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 3);
        assert!(failures
            .iter()
            .all(|f| matches!(f.error, ObserverError::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sinks_called_in_registration_order() {
        let calls: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let mut observer = PoolObserver::new(
            "ordered",
            Feed::Poll(CountingSource::new(Duration::ZERO)),
            ObserverOptions::default(),
        )
        .unwrap();

        let first = calls.clone();
        let second = calls.clone();
        observer
            .on_snapshot(move |_: &PriceUpdate| first.lock().unwrap().push("first"))
            .on_snapshot(move |_: &PriceUpdate| second.lock().unwrap().push("second"));

        observer.start(Some(Duration::from_secs(1))).await.unwrap();
        sleep(Duration::from_millis(1500)).await;
        observer.shutdown().await;

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["first", "second", "first", "second"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_is_clamped_to_floor() {
        let (mut observer, updates, _) = observer(
            Feed::Poll(CountingSource::new(Duration::ZERO)),
            ObserverOptions::default(),
        );

        observer.start(Some(Duration::from_millis(10))).await.unwrap();
        sleep(Duration::from_millis(2500)).await;
        observer.stop();

        // Ticks at 0s, 1s and 2s.
        assert_eq!(updates.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_running_is_rejected() {
        let (mut observer, _, _) = observer(
            Feed::Poll(CountingSource::new(Duration::ZERO)),
            ObserverOptions::default(),
        );

        observer.start(None).await.unwrap();
        assert!(matches!(
            observer.start(None).await,
            Err(ObserverError::InvalidState(ObserverState::Running))
        ));

        observer.shutdown().await;
        assert_eq!(observer.state(), ObserverState::Stopped);

        // Stopped -> Starting -> Running
        observer.start(None).await.unwrap();
        assert_eq!(observer.state(), ObserverState::Running);
        observer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_returns_to_idle() {
        let rpc = Arc::new(FakeRpc::new(100));
        rpc.fail("token0");
        let (mut observer, _, _) =
            observer(rpc_feed(rpc.clone(), Protocol::V2), ObserverOptions::default());

        let err = observer.start(None).await.unwrap_err();
        assert!(matches!(err, ObserverError::Connection(_)));
        assert_eq!(observer.state(), ObserverState::Idle);
        assert!(observer.pool().is_none());

        *rpc.failing.lock().unwrap() = None;
        observer.start(None).await.unwrap();
        assert_eq!(observer.state(), ObserverState::Running);
        assert_eq!(observer.pool().map(|p| p.pair_label()).as_deref(), Some("WBTC/WETH"));
        observer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_seed_at_last_event_block_is_not_repeated() {
        let subscription = ScriptedSubscription {
            streams: Mutex::new(VecDeque::from(vec![
                vec![Ok(snapshot(10, None)), Ok(snapshot(12, Some(0)))],
                // The head has not moved while reconnecting.
                vec![Ok(snapshot(12, None)), Ok(snapshot(13, Some(1)))],
            ])),
        };
        let options = ObserverOptions {
            max_reconnect_attempts: 2,
            ..Default::default()
        };
        let (mut observer, updates, failures) =
            observer(Feed::Subscribe(Arc::new(subscription)), options);

        observer.start(None).await.unwrap();
        sleep(Duration::from_secs(60)).await;

        let blocks: Vec<u64> = updates
            .lock()
            .unwrap()
            .iter()
            .filter_map(|u| u.block_number)
            .collect();
        assert_eq!(blocks, vec![10, 12, 13]);
        assert!(failures
            .lock()
            .unwrap()
            .iter()
            .all(|f| matches!(f.error, ObserverError::Connection(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_emits_in_strict_order() {
        let subscription = ScriptedSubscription {
            streams: Mutex::new(VecDeque::from(vec![
                vec![Ok(snapshot(10, None)), Ok(snapshot(11, Some(0)))],
                vec![
                    // Seed after reconnect.
                    Ok(snapshot(12, None)),
                    // Already covered by the seed.
                    Ok(snapshot(12, Some(0))),
                    // Replayed from before the drop.
                    Ok(snapshot(11, Some(0))),
                    Ok(snapshot(13, Some(2))),
                ],
            ])),
        };
        let options = ObserverOptions {
            max_reconnect_attempts: 3,
            ..Default::default()
        };
        let (mut observer, updates, failures) =
            observer(Feed::Subscribe(Arc::new(subscription)), options);

        observer.start(None).await.unwrap();
        sleep(Duration::from_secs(120)).await;

        let blocks: Vec<u64> = updates
            .lock()
            .unwrap()
            .iter()
            .filter_map(|u| u.block_number)
            .collect();
        assert_eq!(blocks, vec![10, 11, 12, 13]);
        assert!(blocks.windows(2).all(|w| w[0] < w[1]));

        let failures = failures.lock().unwrap();
        assert!(failures
            .iter()
            .any(|f| matches!(f.error, ObserverError::Stale { last: 12, got: 11 })));
        assert_eq!(observer.state(), ObserverState::Stopped);
    }
}
