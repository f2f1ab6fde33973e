//! Strategy interface driven by the backtest engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Bar;

/// Trading decision for one bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

/// A strategy evaluated bar by bar.
///
/// The engine calls `start` once, `next` for every bar in order, then `stop`
/// with the final portfolio value. `Buy` while already long and `Sell` while
/// flat are ignored by the engine.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Reset internal state before a run
    fn start(&mut self) {}

    fn next(&mut self, bar: &Bar, in_position: bool) -> Signal;

    fn stop(&mut self, _final_value: Decimal) {}
}
