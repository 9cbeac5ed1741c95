pub mod abis;
pub mod config;
pub mod error;
pub mod models;
pub mod observer;
pub mod sink;
pub mod sources;
pub mod utils;

pub use config::Settings;
pub use error::{ErrorKind, ObserverError};
pub use observer::{ObserverOptions, ObserverState, PoolObserver};
pub use sink::{ConsoleSink, HealthSink, RedpandaPublisher, SnapshotSink, TickFailure};
pub use sources::Feed;
pub use utils::PriceCalculator;
