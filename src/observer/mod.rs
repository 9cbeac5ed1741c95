//! Pool observers: lifecycle, scheduling and delivery.
//!
//! - `observer` - `PoolObserver`, its state machine and options
//! - `emitter` - validation, ordering guard and sink delivery
//! - `runner` - the poll and subscription loops

mod emitter;
mod observer;
mod runner;

pub use observer::{ObserverOptions, ObserverState, PoolObserver, MIN_INTERVAL};
