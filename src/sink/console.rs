use std::io::Write;

use crate::models::PriceUpdate;

use super::SnapshotSink;

/// Line-oriented stdout printer, one line per price direction.
///
/// ```text
/// Block: 19000000 || Price WBTC/ETH: 15.03 || Fee: 0.30%
/// Block: 19000000 || Price ETH/WBTC: 0.06653 || Fee: 0.30%
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn format_lines(update: &PriceUpdate) -> Vec<String> {
        let block = update
            .block_number
            .map(|n| n.to_string())
            .unwrap_or_else(|| update.timestamp.to_rfc3339());

        let mut lines = vec![
            format!(
                "Block: {} || Price {}/{}: {} || Fee: {}",
                block, update.token0_symbol, update.token1_symbol, update.price0_in_1, update.fee
            ),
            format!(
                "Block: {} || Price {}/{}: {} || Fee: {}",
                block, update.token1_symbol, update.token0_symbol, update.price1_in_0, update.fee
            ),
        ];

        if let Some(tick) = update.tick {
            lines.push(format!("Block: {block} || Tick: {tick}"));
        }

        if let Some(quote) = &update.quote {
            lines.push(format!(
                "Block: {} || Quote {} {} -> {} {} || Execution price: {}",
                block,
                quote.amount_in,
                update.token0_symbol,
                quote.amount_out,
                update.token1_symbol,
                quote.execution_price
            ));
            if let Some(impact) = &quote.price_impact {
                lines.push(format!("Block: {block} || Price impact: {impact}"));
            }
        }

        if update.volume_usd.is_some() || update.fees_usd.is_some() {
            lines.push(format!(
                "Block: {} || Volume USD: {} || Fees USD: {}",
                block,
                update.volume_usd.as_deref().unwrap_or("-"),
                update.fees_usd.as_deref().unwrap_or("-")
            ));
        }

        lines
    }
}

impl SnapshotSink for ConsoleSink {
    fn on_snapshot(&self, update: &PriceUpdate) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for line in Self::format_lines(update) {
            // A closed stdout must not take the observer down.
            let _ = writeln!(out, "{line}");
        }
    }
}
