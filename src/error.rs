//! Typed errors for conditions the caller is expected to pattern-match on.
//!
//! Routine venue rejections (insufficient margin on a single order, a rejected
//! limit order, a timed-out fill wait) are *not* represented here — per the
//! engine's error-handling design those are ordinary data carried on
//! [`crate::slice::SliceOutcome`] and [`crate::orchestrator::ExecutionResult`].
//! `EngineError` covers only the handful of conditions that gate whether the
//! engine attempts an opportunity at all, plus the one genuinely exceptional
//! case (transport failure surviving the retry wrapper).

use thiserror::Error;

use crate::venue::VenueTag;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("symbol lock for {symbol} is held by another execution")]
    LockBusy { symbol: String },

    #[error("circuit breaker is open; new positions are blocked")]
    CircuitOpen,

    #[error(
        "insufficient margin: required {required:.2} USD, available {available:.2} USD on {venue:?}"
    )]
    InsufficientMargin {
        venue: VenueTag,
        required: f64,
        available: f64,
    },

    #[error("scaled notional {notional_usd:.2} USD falls below minimum {minimum_usd:.2} USD")]
    BelowMinimumSize { notional_usd: f64, minimum_usd: f64 },

    #[error("race condition detected: active order already registered for ({venue:?}, {symbol}, {side:?})")]
    RaceConditionDetected {
        venue: VenueTag,
        symbol: String,
        side: crate::venue::OrderSide,
    },

    #[error("venue call to {venue:?} failed after retry exhaustion: {source}")]
    VenueTransport {
        venue: VenueTag,
        #[source]
        source: anyhow::Error,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;
