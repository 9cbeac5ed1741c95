mod config;

pub use config::{
    LoggingSettings, ObserverSettings, QuoteSettings, RedpandaSettings, Settings, SourceKind,
};
