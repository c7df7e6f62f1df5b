//! The Slice Executor: one atomic two-leg slice, run through
//! PRE_FLIGHT → PLACE_A → WAIT_A → PLACE_B → WAIT_B → VERIFY, with rollback
//! on leg-B failure.

use crate::circuit_breaker::CircuitBreaker;
use crate::config::EngineConfig;
use crate::diagnostics::{escalate, DiagnosticEvent, DiagnosticKind, DiagnosticSink};
use crate::events::{EventKind, EventTrace};
use crate::fill_waiter::{self, WaitParams};
use crate::registry::{ExecutionLockRegistry, OwnerId, RegistryState};
use crate::venue::{OrderRequest, OrderSide, VenueAdapter};

/// Outcome of one slice. `long_filled`/`short_filled` are cumulative for this
/// slice only; the Orchestrator folds them into its running totals.
#[derive(Debug, Clone, Default)]
pub struct SliceResult {
    pub slice_index: u32,
    pub long_filled: f64,
    pub short_filled: f64,
    pub long_order_id: Option<String>,
    pub short_order_id: Option<String>,
    pub both_filled: bool,
    pub error_reason: Option<String>,
    /// Set when a rollback or imbalance-repair MARKET order itself failed to
    /// fill — the residual is real and must be retried by the caller.
    pub rollback_failed: bool,
}

impl SliceResult {
    fn failed(slice_index: u32, reason: impl Into<String>) -> Self {
        Self {
            slice_index,
            error_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

pub struct SliceParams<'a> {
    pub long: &'a dyn VenueAdapter,
    pub short: &'a dyn VenueAdapter,
    pub symbol: &'a str,
    pub slice_size: f64,
    pub long_price: f64,
    pub short_price: f64,
    pub slice_index: u32,
    pub first_is_long: bool,
    pub config: &'a EngineConfig,
    pub registry: &'a ExecutionLockRegistry,
    pub owner: OwnerId,
    pub diagnostics: &'a dyn DiagnosticSink,
}

struct Leg<'a> {
    adapter: &'a dyn VenueAdapter,
    side: OrderSide,
    price: f64,
}

/// Runs one slice to completion. Never returns `Err` — every business-logic
/// failure is carried in the returned [`SliceResult`] per the engine's error
/// design; only a genuinely exceptional condition (a bug in the caller
/// supplying mismatched venues) would panic, and none does here.
pub async fn execute(params: SliceParams<'_>, breaker: &CircuitBreaker, trace: &mut EventTrace) -> SliceResult {
    let SliceParams {
        long,
        short,
        symbol,
        slice_size,
        long_price,
        short_price,
        slice_index,
        first_is_long,
        config,
        registry,
        owner,
        diagnostics,
    } = params;

    let (leg_a, leg_b) = if first_is_long {
        (
            Leg { adapter: long, side: OrderSide::Long, price: long_price },
            Leg { adapter: short, side: OrderSide::Short, price: short_price },
        )
    } else {
        (
            Leg { adapter: short, side: OrderSide::Short, price: short_price },
            Leg { adapter: long, side: OrderSide::Long, price: long_price },
        )
    };

    // PRE_FLIGHT: safety re-check against live equity on both venues.
    let equity_long = long.get_equity().await.unwrap_or(0.0);
    let equity_short = short.get_equity().await.unwrap_or(0.0);
    let total_portfolio = equity_long + equity_short;
    let mid_price = (long_price + short_price) / 2.0;
    let slice_usd = slice_size * mid_price;
    let max_allowed = (config.max_portfolio_pct_per_slice * total_portfolio)
        .min(config.max_usd_per_slice)
        * 1.1;
    if slice_usd > max_allowed {
        escalate(
            diagnostics,
            DiagnosticEvent::new(
                DiagnosticKind::SplicingSafetyViolation,
                format!("slice {slice_usd:.2} USD exceeds safety cap {max_allowed:.2} USD"),
            )
            .with_symbol(symbol),
        );
        return SliceResult::failed(slice_index, "pre-flight safety violation");
    }

    if registry.has_active_order(leg_a.adapter.venue_tag(), symbol, leg_a.side)
        || registry.has_active_order(leg_b.adapter.venue_tag(), symbol, leg_b.side)
    {
        return SliceResult::failed(slice_index, "race condition detected by execution lock registry");
    }

    // PLACE_A / WAIT_A
    if !registry.register_order_placing(leg_a.adapter.venue_tag(), symbol, leg_a.side, owner, slice_size, Some(leg_a.price)) {
        return SliceResult::failed(slice_index, "race condition detected by execution lock registry");
    }
    trace.record(EventKind::PlaceLegA, slice_index, Some(leg_a.adapter.venue_tag()));

    let initial_leg_a_position = position_size(leg_a.adapter, leg_a.side).await;

    let request_a = OrderRequest::limit_gtc(symbol, leg_a.side, slice_size, leg_a.price);
    let response_a = match leg_a.adapter.place_order(request_a).await {
        Ok(r) => r,
        Err(e) => {
            registry.force_clear(leg_a.adapter.venue_tag(), symbol, leg_a.side);
            return SliceResult::failed(slice_index, format!("leg A transport failure: {e}"));
        }
    };
    let Some(order_id_a) = response_a.order_id.clone() else {
        registry.force_clear(leg_a.adapter.venue_tag(), symbol, leg_a.side);
        escalate(
            diagnostics,
            DiagnosticEvent::new(DiagnosticKind::SingleLegFailure, "leg A rejected at placement")
                .with_venue(leg_a.adapter.venue_tag())
                .with_symbol(symbol),
        );
        return SliceResult::failed(
            slice_index,
            response_a.error_message.unwrap_or_else(|| "leg A rejected".to_string()),
        );
    };
    registry.update_order_status(
        leg_a.adapter.venue_tag(),
        symbol,
        leg_a.side,
        RegistryState::WaitingFill,
        Some(order_id_a.clone()),
        Some(leg_a.price),
        Some(false),
    );

    let outcome_a = fill_waiter::wait(
        config,
        WaitParams {
            venue: leg_a.adapter,
            order_id: &order_id_a,
            symbol,
            expected_size: slice_size,
            initial_position_size: initial_leg_a_position,
            timeout: config.slice_fill_timeout(),
            poll_interval: config.fill_check_interval(),
            is_close: false,
            order_side: Some(leg_a.side),
        },
    )
    .await;

    let f_a = outcome_a.filled_size;
    if !outcome_a.filled || f_a <= 0.0 {
        registry.update_order_status(leg_a.adapter.venue_tag(), symbol, leg_a.side, RegistryState::Cancelled, None, None, None);
        registry.force_clear(leg_a.adapter.venue_tag(), symbol, leg_a.side);
        let kind = if outcome_a.timed_out {
            DiagnosticKind::OrderFillTimeout
        } else {
            DiagnosticKind::SingleLegFailure
        };
        escalate(
            diagnostics,
            DiagnosticEvent::new(kind, "leg A never filled")
                .with_venue(leg_a.adapter.venue_tag())
                .with_symbol(symbol),
        );
        return SliceResult::failed(slice_index, "Leg A never filled");
    }
    registry.update_order_status(leg_a.adapter.venue_tag(), symbol, leg_a.side, RegistryState::Filled, None, None, None);
    registry.force_clear(leg_a.adapter.venue_tag(), symbol, leg_a.side);
    trace.record(EventKind::FillLegA, slice_index, Some(leg_a.adapter.venue_tag()));

    // PLACE_B / WAIT_B — sized exactly to leg A's actual fill.
    if !registry.register_order_placing(leg_b.adapter.venue_tag(), symbol, leg_b.side, owner, f_a, Some(leg_b.price)) {
        return rollback_leg_a(
            leg_a.adapter,
            leg_a.side,
            f_a,
            config,
            diagnostics,
            trace,
            slice_index,
            symbol,
            "race condition detected on leg B registration",
        )
        .await;
    }
    trace.record(EventKind::PlaceLegB, slice_index, Some(leg_b.adapter.venue_tag()));

    let initial_leg_b_position = position_size(leg_b.adapter, leg_b.side).await;
    let request_b = OrderRequest::limit_gtc(symbol, leg_b.side, f_a, leg_b.price);
    let response_b = match leg_b.adapter.place_order(request_b).await {
        Ok(r) => r,
        Err(e) => {
            registry.force_clear(leg_b.adapter.venue_tag(), symbol, leg_b.side);
            return rollback_leg_a(
                leg_a.adapter,
                leg_a.side,
                f_a,
                config,
                diagnostics,
                trace,
                slice_index,
                symbol,
                &format!("leg B transport failure: {e}"),
            )
            .await;
        }
    };
    let Some(order_id_b) = response_b.order_id.clone() else {
        registry.force_clear(leg_b.adapter.venue_tag(), symbol, leg_b.side);
        return rollback_leg_a(
            leg_a.adapter,
            leg_a.side,
            f_a,
            config,
            diagnostics,
            trace,
            slice_index,
            symbol,
            &response_b.error_message.unwrap_or_else(|| "leg B rejected".to_string()),
        )
        .await;
    };
    registry.update_order_status(
        leg_b.adapter.venue_tag(),
        symbol,
        leg_b.side,
        RegistryState::WaitingFill,
        Some(order_id_b.clone()),
        Some(leg_b.price),
        Some(false),
    );

    let outcome_b = fill_waiter::wait(
        config,
        WaitParams {
            venue: leg_b.adapter,
            order_id: &order_id_b,
            symbol,
            expected_size: f_a,
            initial_position_size: initial_leg_b_position,
            timeout: config.slice_fill_timeout(),
            poll_interval: config.fill_check_interval(),
            is_close: false,
            order_side: Some(leg_b.side),
        },
    )
    .await;

    let f_b = outcome_b.filled_size;
    let imbalance_tolerance = config.max_imbalance_fraction() * f_a;

    if f_b <= 0.0 {
        registry.force_clear(leg_b.adapter.venue_tag(), symbol, leg_b.side);
        return rollback_leg_a(
            leg_a.adapter,
            leg_a.side,
            f_a,
            config,
            diagnostics,
            trace,
            slice_index,
            symbol,
            "Leg B never filled",
        )
        .await;
    }

    if (f_a - f_b).abs() > imbalance_tolerance {
        // Partial fill beyond tolerance: cancel leg B's remnant but do not
        // roll back leg A — the Orchestrator decides whether to continue.
        if let Err(e) = leg_b.adapter.cancel_order(&order_id_b, symbol).await {
            tracing::warn!(error = %e, order_id = %order_id_b, "best-effort cancel of leg B remnant failed");
        }
        registry.force_clear(leg_b.adapter.venue_tag(), symbol, leg_b.side);
        trace.record(EventKind::SliceFailed, slice_index, None);
        let (long_filled, short_filled) = fills_by_side(first_is_long, f_a, f_b);
        return SliceResult {
            slice_index,
            long_filled,
            short_filled,
            long_order_id: side_order_id(first_is_long, true, &order_id_a, &order_id_b),
            short_order_id: side_order_id(first_is_long, false, &order_id_a, &order_id_b),
            both_filled: false,
            error_reason: Some("leg B partial fill imbalance beyond tolerance".to_string()),
            rollback_failed: false,
        };
    }

    registry.update_order_status(leg_b.adapter.venue_tag(), symbol, leg_b.side, RegistryState::Filled, None, None, None);
    registry.force_clear(leg_b.adapter.venue_tag(), symbol, leg_b.side);
    trace.record(EventKind::FillLegB, slice_index, Some(leg_b.adapter.venue_tag()));
    trace.record(EventKind::SliceSucceeded, slice_index, None);
    breaker.record_success();

    let (long_filled, short_filled) = fills_by_side(first_is_long, f_a, f_b);
    SliceResult {
        slice_index,
        long_filled,
        short_filled,
        long_order_id: side_order_id(first_is_long, true, &order_id_a, &order_id_b),
        short_order_id: side_order_id(first_is_long, false, &order_id_a, &order_id_b),
        both_filled: true,
        error_reason: None,
        rollback_failed: false,
    }
}

/// ROLLBACK_A: a MARKET IOC reduce-only order on leg A's venue, opposite
/// side, for leg A's actually-filled size. Escalates CRITICAL if the
/// rollback itself doesn't fill.
#[allow(clippy::too_many_arguments)]
async fn rollback_leg_a(
    adapter: &dyn VenueAdapter,
    side: OrderSide,
    size: f64,
    config: &EngineConfig,
    diagnostics: &dyn DiagnosticSink,
    trace: &mut EventTrace,
    slice_index: u32,
    symbol: &str,
    reason: &str,
) -> SliceResult {
    trace.record(EventKind::RollbackLegA, slice_index, Some(adapter.venue_tag()));
    let request = OrderRequest::reduce_only_market(symbol, side.opposite(), size);

    let response = match adapter.place_order(request).await {
        Ok(r) => r,
        Err(e) => {
            escalate(
                diagnostics,
                DiagnosticEvent::new(
                    DiagnosticKind::RollbackException,
                    format!("rollback MARKET order errored: {e}"),
                )
                .with_venue(adapter.venue_tag())
                .with_symbol(symbol),
            );
            trace.record(EventKind::RollbackFailed, slice_index, Some(adapter.venue_tag()));
            let (long_filled, short_filled) = residual_by_side(side, size);
            return SliceResult {
                slice_index,
                long_filled,
                short_filled,
                long_order_id: None,
                short_order_id: None,
                both_filled: false,
                error_reason: Some(reason.to_string()),
                rollback_failed: true,
            };
        }
    };

    let Some(order_id) = response.order_id else {
        escalate(
            diagnostics,
            DiagnosticEvent::new(DiagnosticKind::RollbackMarketFailed, "rollback MARKET order rejected")
                .with_venue(adapter.venue_tag())
                .with_symbol(symbol),
        );
        trace.record(EventKind::RollbackFailed, slice_index, Some(adapter.venue_tag()));
        let (long_filled, short_filled) = residual_by_side(side, size);
        return SliceResult {
            slice_index,
            long_filled,
            short_filled,
            long_order_id: None,
            short_order_id: None,
            both_filled: false,
            error_reason: Some(reason.to_string()),
            rollback_failed: true,
        };
    };

    let outcome = fill_waiter::wait(
        config,
        WaitParams {
            venue: adapter,
            order_id: &order_id,
            symbol,
            expected_size: size,
            initial_position_size: 0.0,
            timeout: config.slice_fill_timeout(),
            poll_interval: config.fill_check_interval(),
            is_close: true,
            order_side: None,
        },
    )
    .await;

    if outcome.filled {
        trace.record(EventKind::RollbackFilled, slice_index, Some(adapter.venue_tag()));
        trace.record(EventKind::SliceFailed, slice_index, None);
        return SliceResult::failed(slice_index, reason);
    }

    escalate(
        diagnostics,
        DiagnosticEvent::new(
            DiagnosticKind::RollbackMarketFailed,
            "rollback MARKET order did not fill before timeout",
        )
        .with_venue(adapter.venue_tag())
        .with_symbol(symbol),
    );
    trace.record(EventKind::RollbackFailed, slice_index, Some(adapter.venue_tag()));
    let (long_filled, short_filled) = residual_by_side(side, size);
    SliceResult {
        slice_index,
        long_filled,
        short_filled,
        long_order_id: None,
        short_order_id: None,
        both_filled: false,
        error_reason: Some(reason.to_string()),
        rollback_failed: true,
    }
}

async fn position_size(adapter: &dyn VenueAdapter, side: OrderSide) -> f64 {
    adapter
        .get_positions()
        .await
        .ok()
        .and_then(|positions| positions.into_iter().find(|p| p.side == side).map(|p| p.size))
        .unwrap_or(0.0)
}

fn fills_by_side(first_is_long: bool, f_a: f64, f_b: f64) -> (f64, f64) {
    if first_is_long {
        (f_a, f_b)
    } else {
        (f_b, f_a)
    }
}

/// The unresolved residual from a failed rollback, expressed on whichever
/// side `side` (leg A's original side) actually is.
fn residual_by_side(side: OrderSide, size: f64) -> (f64, f64) {
    match side {
        OrderSide::Long => (size, 0.0),
        OrderSide::Short => (0.0, size),
    }
}

fn side_order_id(first_is_long: bool, want_long: bool, order_id_a: &str, order_id_b: &str) -> Option<String> {
    let is_a = first_is_long == want_long;
    Some(if is_a { order_id_a } else { order_id_b }.to_string())
}
