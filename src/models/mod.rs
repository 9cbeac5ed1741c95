mod fee;
mod snapshot;
mod token;

pub use fee::FeeTier;
pub use snapshot::{BlockRef, PoolSnapshot, PoolState, PriceUpdate, Quote, QuoteUpdate};
pub use token::{PoolDescriptor, Protocol, TokenDisplay, TokenInfo};
