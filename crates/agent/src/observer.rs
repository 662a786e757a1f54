//! Per-turn progress reporting.

use buildloop_core::StopReason;
use serde::Serialize;

/// One requested action, as seen by an observer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSummary {
    pub name: String,
    pub is_error: bool,
}

/// What happened on one turn of a loop run.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    /// Pipeline role that ran the loop.
    pub role: String,
    /// 1-based turn index.
    pub iteration: usize,
    pub stop_reason: StopReason,
    /// Output tokens the service generated this turn.
    pub output_tokens: u64,
    /// Whether any input was served from the prompt cache.
    pub cache_hit: bool,
    pub actions: Vec<ActionSummary>,
    pub narration: String,
}

/// Live progress hook, invoked once per turn after the turn's actions ran.
///
/// Called synchronously from the loop: implementations must return quickly
/// and must not panic.
pub trait TurnObserver: Send + Sync {
    fn on_turn(&self, report: &TurnReport);
}

impl<F> TurnObserver for F
where
    F: Fn(&TurnReport) + Send + Sync,
{
    fn on_turn(&self, report: &TurnReport) {
        self(report)
    }
}
