use log::debug;
use tokio::sync::mpsc;

use crate::models::PriceUpdate;

use super::SnapshotSink;

/// Forwards updates into an unbounded channel, turning an observer into a pull-based
/// sequence. The receiver ends once the sink is dropped with its observer.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PriceUpdate>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PriceUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SnapshotSink for ChannelSink {
    fn on_snapshot(&self, update: &PriceUpdate) {
        if self.tx.send(update.clone()).is_err() {
            debug!("Price update for {} dropped, receiver closed", update.pool_id);
        }
    }
}
