//! Polls a venue until an order is known filled, cancelled, rejected, or
//! timed out, reconciling the "cancelled-but-position-grew" ambiguity that
//! the flaky venue's order-status endpoint produces.

use std::time::Duration;

use tokio::time::sleep;

use crate::config::EngineConfig;
use crate::venue::{OrderSide, OrderStatus, VenueAdapter};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillOutcome {
    pub filled: bool,
    pub filled_size: f64,
    /// True only when the loop exhausted `timeout` without a terminal status;
    /// false for an immediate REJECTED (so callers can tell "never resolved"
    /// apart from "resolved negatively" when picking a diagnostic kind.
    pub timed_out: bool,
}

/// Everything [`wait`] needs to know about one order. Bundled into a struct
/// because the contract has eight positional parameters and a struct reads
/// better at every call site than that many bare arguments.
pub struct WaitParams<'a> {
    pub venue: &'a dyn VenueAdapter,
    pub order_id: &'a str,
    pub symbol: &'a str,
    pub expected_size: f64,
    pub initial_position_size: f64,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub is_close: bool,
    /// The side of the position this order is expected to grow (for
    /// flaky-venue position-delta detection). `None` when the venue doesn't
    /// need delta detection (the non-flaky path never inspects this).
    pub order_side: Option<OrderSide>,
}

/// The 90% fill-delta tolerance absorbs rounding from tick/lot sizes across
/// venues.
const FILL_DELTA_TOLERANCE: f64 = 0.9;

pub async fn wait(config: &EngineConfig, params: WaitParams<'_>) -> FillOutcome {
    sleep(Duration::from_millis(config.fill_wait_grace_ms)).await;

    let cap = if params.is_close {
        Duration::from_millis(config.poll_backoff_cap_close_ms)
    } else {
        Duration::from_millis(config.poll_backoff_cap_open_ms)
    };

    let deadline = tokio::time::Instant::now() + params.timeout;
    let mut poll_interval = params.poll_interval;
    let mut latest_observed = 0.0_f64;

    loop {
        match params.venue.get_order_status(params.order_id, params.symbol).await {
            Ok(status) => {
                latest_observed = status.filled_size;
                match status.status {
                    OrderStatus::Filled => {
                        let size = if status.filled_size > 0.0 {
                            status.filled_size
                        } else {
                            params.expected_size
                        };
                        return FillOutcome {
                            filled: true,
                            filled_size: size,
                            timed_out: false,
                        };
                    }
                    OrderStatus::Cancelled => {
                        if let Some(size) = position_delta_filled(&params).await {
                            return FillOutcome {
                                filled: true,
                                filled_size: size,
                                timed_out: false,
                            };
                        }
                        return FillOutcome {
                            filled: false,
                            filled_size: latest_observed,
                            timed_out: false,
                        };
                    }
                    OrderStatus::Rejected => {
                        return FillOutcome {
                            filled: false,
                            filled_size: 0.0,
                            timed_out: false,
                        };
                    }
                    OrderStatus::Pending | OrderStatus::Submitted => {
                        if params.venue.venue_tag().is_flaky() {
                            if let Some(size) = position_delta_filled(&params).await {
                                return FillOutcome {
                                    filled: true,
                                    filled_size: size,
                                    timed_out: false,
                                };
                            }
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, order_id = params.order_id, "order status query failed, retrying");
            }
        }

        if tokio::time::Instant::now() >= deadline {
            break;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        sleep(poll_interval.min(remaining)).await;
        poll_interval = (poll_interval * 2).min(cap);
    }

    tracing::warn!(order_id = params.order_id, symbol = params.symbol, "fill wait timed out, cancelling");
    if let Err(e) = params.venue.cancel_order(params.order_id, params.symbol).await {
        tracing::warn!(error = %e, order_id = params.order_id, "best-effort cancel on timeout failed");
    }

    FillOutcome {
        filled: false,
        filled_size: latest_observed,
        timed_out: true,
    }
}

/// Returns `Some(delta)` if the current position has grown by at least 90%
/// of `expected_size` relative to the pre-placement snapshot.
async fn position_delta_filled(params: &WaitParams<'_>) -> Option<f64> {
    let side = params.order_side?;
    let positions = params.venue.get_positions().await.ok()?;
    let current = positions
        .iter()
        .find(|p| p.side == side)
        .map(|p| p.size)
        .unwrap_or(0.0);
    let delta = current - params.initial_position_size;
    if delta >= FILL_DELTA_TOLERANCE * params.expected_size {
        Some(delta)
    } else {
        None
    }
}
