//! The Hedge Orchestrator: plans slice count from time-to-funding and
//! per-slice safety caps, drives the Slice Executor to completion or abort,
//! and repairs any residual imbalance left over at the end.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use tokio::time::sleep;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{EngineConfig, StrategyLimits};
use crate::diagnostics::{escalate, DiagnosticEvent, DiagnosticKind, DiagnosticSink};
use crate::error::{EngineError, EngineResult};
use crate::events::EventTrace;
use crate::fill_waiter::{self, WaitParams};
use crate::opportunity::Opportunity;
use crate::preflight;
use crate::registry::{generate_owner_id, ExecutionLockRegistry, OwnerId};
use crate::slice::{self, SliceParams, SliceResult};
use crate::venue::{OrderRequest, OrderSide, VenueAdapter, VenueTag};

/// Max USD imbalance tolerated at the end of an execution.
const FINAL_IMBALANCE_TOLERANCE_USD: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlicePlan {
    pub slice_count: u32,
    pub slice_size: f64,
    pub time_to_funding: ChronoDuration,
}

/// The smallest strictly-future funding boundary for `tag`, measured from
/// `now`. When `now` sits exactly on a boundary, the next funding is a full
/// cycle away, never zero.
fn next_funding(tag: VenueTag, now: DateTime<Utc>) -> ChronoDuration {
    let interval = tag.funding_interval();
    let interval_secs = interval.num_seconds();
    let seconds_since_midnight =
        now.hour() as i64 * 3600 + now.minute() as i64 * 60 + now.second() as i64;
    let elapsed_in_cycle = seconds_since_midnight % interval_secs;
    let remaining = interval_secs - elapsed_in_cycle;
    if remaining <= 0 {
        interval
    } else {
        ChronoDuration::seconds(remaining)
    }
}

/// Computes the slice count and size, weighing time-to-funding against the
/// per-slice safety caps. `total_portfolio` is the combined equity across
/// both venues; `total_size` is the (possibly pre-flight-scaled) target size
/// in base-asset units.
pub fn plan_slices(
    opportunity: &Opportunity,
    total_size: f64,
    total_portfolio: f64,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> SlicePlan {
    let time_to_funding = next_funding(opportunity.long_venue, now).min(next_funding(opportunity.short_venue, now));

    let funding_buffer = ChronoDuration::milliseconds(config.funding_buffer_ms);
    let slice_timeout_plus_one = config.slice_fill_timeout() + StdDuration::from_secs(1);
    let slack = (time_to_funding - funding_buffer).max(ChronoDuration::zero());
    let slices_for_time = (slack.num_milliseconds() as f64 / slice_timeout_plus_one.as_millis() as f64).floor() as i64;

    let mid_price = opportunity.mid_price();
    let max_slice_usd = (total_portfolio * config.max_portfolio_pct_per_slice).min(config.max_usd_per_slice);
    let mut slices_for_safety = (total_size * mid_price / max_slice_usd).ceil() as i64;
    if slices_for_safety < 1 {
        slices_for_safety = 1;
    }

    if slices_for_time < slices_for_safety {
        tracing::warn!(
            symbol = %opportunity.symbol,
            slices_for_time,
            slices_for_safety,
            "time-to-funding is tighter than the safety-driven slice count; executing anyway, safety dominates"
        );
    }

    let mut slice_count = (slices_for_safety.max(config.min_slices as i64) as u32).clamp(config.min_slices, config.max_slices);

    // Step 7: verify the resulting per-slice USD doesn't exceed the cap
    // (rounding tolerance 1.05); if it does, recompute and reclamp once more.
    for _ in 0..3 {
        let slice_size = total_size / slice_count as f64;
        if slice_size * mid_price <= max_slice_usd * 1.05 {
            break;
        }
        let recomputed = (total_size * mid_price / max_slice_usd).ceil() as i64;
        slice_count = (recomputed.max(config.min_slices as i64) as u32).clamp(config.min_slices, config.max_slices);
    }

    SlicePlan {
        slice_count,
        slice_size: total_size / slice_count as f64,
        time_to_funding,
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub total_slices: u32,
    pub completed_slices: u32,
    pub total_long_filled: f64,
    pub total_short_filled: f64,
    pub slice_results: Vec<SliceResult>,
    pub abort_reason: Option<String>,
    pub time_to_funding: ChronoDuration,
}

/// Releases the symbol lock on every exit path out of [`execute`], including
/// the early returns for a denied lock acquisition, a gating circuit breaker,
/// and pre-flight rejection.
struct SymbolLockGuard<'a> {
    registry: &'a ExecutionLockRegistry,
    symbol: &'a str,
    owner: OwnerId,
}

impl Drop for SymbolLockGuard<'_> {
    fn drop(&mut self) {
        self.registry.release_symbol(self.symbol, self.owner);
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    opportunity: &Opportunity,
    long: &dyn VenueAdapter,
    short: &dyn VenueAdapter,
    registry: &ExecutionLockRegistry,
    breaker: &CircuitBreaker,
    limits: &StrategyLimits,
    config: &EngineConfig,
    diagnostics: &dyn DiagnosticSink,
    trace: &mut EventTrace,
    now: DateTime<Utc>,
) -> EngineResult<ExecutionResult> {
    let owner = generate_owner_id();
    if !registry.try_acquire_symbol(&opportunity.symbol, owner, "hedge execution") {
        return Err(EngineError::LockBusy {
            symbol: opportunity.symbol.clone(),
        });
    }
    let _lock_guard = SymbolLockGuard {
        registry,
        symbol: &opportunity.symbol,
        owner,
    };

    if !breaker.can_open_new_position() {
        return Err(EngineError::CircuitOpen);
    }

    let preflight = preflight::run(long, short, opportunity, limits, config).await?;

    let equity_long = long.get_equity().await.unwrap_or(0.0);
    let equity_short = short.get_equity().await.unwrap_or(0.0);
    let total_portfolio = equity_long + equity_short;

    let plan = plan_slices(opportunity, preflight.total_size, total_portfolio, config, now);

    let mut slice_results = Vec::with_capacity(plan.slice_count as usize);
    let mut total_long_filled = 0.0_f64;
    let mut total_short_filled = 0.0_f64;
    let mut abort_reason = None;
    let mut completed_slices = 0_u32;

    for slice_index in 0..plan.slice_count {
        let result = slice::execute(
            SliceParams {
                long,
                short,
                symbol: &opportunity.symbol,
                slice_size: plan.slice_size,
                long_price: opportunity.long_price,
                short_price: opportunity.short_price,
                slice_index,
                first_is_long: opportunity.first_is_long(),
                config,
                registry,
                owner,
                diagnostics,
            },
            breaker,
            trace,
        )
        .await;

        total_long_filled += result.long_filled;
        total_short_filled += result.short_filled;
        let succeeded = result.both_filled;
        slice_results.push(result);

        if succeeded {
            completed_slices += 1;
            sleep(StdDuration::from_millis(config.inter_slice_pause_ms)).await;
        } else {
            breaker.record_error("slice_failure");
            abort_reason = Some(
                slice_results
                    .last()
                    .and_then(|r| r.error_reason.clone())
                    .unwrap_or_else(|| "slice failed".to_string()),
            );
            break;
        }
    }

    let mid_price = opportunity.mid_price();
    let (total_long_filled, total_short_filled, repair_failed) = repair_final_imbalance(
        long,
        short,
        opportunity,
        config,
        diagnostics,
        total_long_filled,
        total_short_filled,
        mid_price,
    )
    .await;

    let final_imbalance_usd = (total_long_filled - total_short_filled).abs() * mid_price;
    let success = !repair_failed
        && completed_slices == plan.slice_count
        && abort_reason.is_none()
        && final_imbalance_usd <= FINAL_IMBALANCE_TOLERANCE_USD;

    Ok(ExecutionResult {
        success,
        total_slices: plan.slice_count,
        completed_slices,
        total_long_filled,
        total_short_filled,
        slice_results,
        abort_reason,
        time_to_funding: plan.time_to_funding,
    })
}

/// Final imbalance repair. Returns the (possibly adjusted) cumulative fills
/// and whether the repair itself failed to resolve the residual.
async fn repair_final_imbalance(
    long: &dyn VenueAdapter,
    short: &dyn VenueAdapter,
    opportunity: &Opportunity,
    config: &EngineConfig,
    diagnostics: &dyn DiagnosticSink,
    total_long_filled: f64,
    total_short_filled: f64,
    mid_price: f64,
) -> (f64, f64, bool) {
    let delta = total_long_filled - total_short_filled;
    if delta.abs() * mid_price <= FINAL_IMBALANCE_TOLERANCE_USD {
        return (total_long_filled, total_short_filled, false);
    }

    let (adapter, side, size) = if delta > 0.0 {
        (long, OrderSide::Short, delta)
    } else {
        (short, OrderSide::Long, -delta)
    };

    let request = OrderRequest::reduce_only_market(&opportunity.symbol, side, size);
    let response = match adapter.place_order(request).await {
        Ok(r) => r,
        Err(e) => {
            escalate(
                diagnostics,
                DiagnosticEvent::new(
                    DiagnosticKind::RollbackException,
                    format!("final imbalance repair order errored: {e}"),
                )
                .with_venue(adapter.venue_tag())
                .with_symbol(&opportunity.symbol),
            );
            return (total_long_filled, total_short_filled, true);
        }
    };

    let Some(order_id) = response.order_id else {
        escalate(
            diagnostics,
            DiagnosticEvent::new(DiagnosticKind::RollbackMarketFailed, "final imbalance repair order rejected")
                .with_venue(adapter.venue_tag())
                .with_symbol(&opportunity.symbol),
        );
        return (total_long_filled, total_short_filled, true);
    };

    let outcome = fill_waiter::wait(
        config,
        WaitParams {
            venue: adapter,
            order_id: &order_id,
            symbol: &opportunity.symbol,
            expected_size: size,
            initial_position_size: 0.0,
            timeout: config.slice_fill_timeout(),
            poll_interval: config.fill_check_interval(),
            is_close: true,
            order_side: None,
        },
    )
    .await;

    if !outcome.filled {
        escalate(
            diagnostics,
            DiagnosticEvent::new(
                DiagnosticKind::RollbackMarketFailed,
                "final imbalance repair order did not fill before timeout",
            )
            .with_venue(adapter.venue_tag())
            .with_symbol(&opportunity.symbol),
        );
        return (total_long_filled, total_short_filled, true);
    }

    let filled = outcome.filled_size.min(size);
    if delta > 0.0 {
        (total_long_filled - filled, total_short_filled, false)
    } else {
        (total_long_filled, total_short_filled - filled, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn opp() -> Opportunity {
        Opportunity {
            symbol: "X".to_string(),
            long_venue: VenueTag::Flaky,
            short_venue: VenueTag::Reliable,
            long_price: 3000.0,
            short_price: 3001.0,
            total_size: 2.0,
        }
    }

    #[test]
    fn plan_picks_slice_count_from_notional_over_safety_cap() {
        let mut cfg = config();
        cfg.max_usd_per_slice = 5_000.0;
        let plan = plan_slices(&opp(), 2.0, 1_000_000.0, &cfg, Utc::now());
        // notional = 2.0 * 3000.5 = 6001; ceil(6001 / 5000) = 2
        assert_eq!(plan.slice_count, 2);
        assert!((plan.slice_size - 1.0).abs() < 1e-9);
    }

    #[test]
    fn safety_dominates_time_pressure() {
        let mut cfg = config();
        cfg.funding_buffer_ms = 180_000;
        cfg.slice_fill_timeout_ms = 20_000;
        cfg.max_usd_per_slice = 2_500.0;
        cfg.max_portfolio_pct_per_slice = 1.0;
        cfg.min_slices = 2;
        cfg.max_slices = 15;

        // time_to_funding forced tight: pick `now` so the flaky venue's
        // 1-hour cycle has only 60s left.
        let now = Utc::now();
        let next = next_funding(VenueTag::Flaky, now);
        let adjusted_now = now + next - ChronoDuration::seconds(60);

        // total_size chosen so slices_for_safety = 8 (20,000 USD / 2,500).
        let total_size = 20_000.0 / opp().mid_price();
        let plan = plan_slices(&opp(), total_size, 1_000_000.0, &cfg, adjusted_now);
        assert_eq!(plan.slice_count, 8);
    }

    #[test]
    fn next_funding_is_strictly_in_the_future_at_a_boundary() {
        let now = Utc::now().date_naive().and_hms_opt(8, 0, 0).unwrap().and_utc();
        let remaining = next_funding(VenueTag::Reliable, now);
        assert_eq!(remaining, ChronoDuration::hours(8));
    }

    #[test]
    fn slice_count_never_exceeds_max_slices() {
        let mut cfg = config();
        cfg.max_slices = 5;
        cfg.max_usd_per_slice = 1.0;
        let plan = plan_slices(&opp(), 100.0, 1_000_000.0, &cfg, Utc::now());
        assert_eq!(plan.slice_count, 5);
    }

    use crate::diagnostics::NullDiagnosticSink;
    use crate::events::EventTrace;
    use crate::testing::MockVenueAdapter;

    fn limits() -> StrategyLimits {
        StrategyLimits {
            min_position_size_usd: 100.0,
            leverage: 5.0,
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            slice_fill_timeout_ms: 2_000,
            fill_check_interval_ms: 100,
            fill_wait_grace_ms: 10,
            inter_slice_pause_ms: 10,
            cancel_settle_ms: 10,
            max_usd_per_slice: 5_000.0,
            max_portfolio_pct_per_slice: 1.0,
            min_slices: 1,
            max_slices: 1,
            ..EngineConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn busy_symbol_lock_is_skipped_without_touching_any_venue() {
        let long = MockVenueAdapter::new(VenueTag::Flaky);
        let short = MockVenueAdapter::new(VenueTag::Reliable);
        long.set_equity(10_000.0);
        short.set_equity(10_000.0);

        let registry = ExecutionLockRegistry::new();
        let other_owner = generate_owner_id();
        assert!(registry.try_acquire_symbol("X", other_owner, "held by someone else"));

        let breaker = CircuitBreaker::new(Default::default());
        let diagnostics = NullDiagnosticSink;
        let mut trace = EventTrace::new();

        let result = execute(
            &opp(),
            &long,
            &short,
            &registry,
            &breaker,
            &limits(),
            &fast_config(),
            &diagnostics,
            &mut trace,
            Utc::now(),
        )
        .await;

        assert!(matches!(result, Err(EngineError::LockBusy { .. })));
        assert!(long.placed_requests().is_empty());
        assert!(short.placed_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_breaker_skips_execution() {
        let long = MockVenueAdapter::new(VenueTag::Flaky);
        let short = MockVenueAdapter::new(VenueTag::Reliable);
        long.set_equity(10_000.0);
        short.set_equity(10_000.0);

        let registry = ExecutionLockRegistry::new();
        let breaker = CircuitBreaker::new(Default::default());
        for _ in 0..5 {
            breaker.record_error("transient");
        }
        assert!(!breaker.can_open_new_position());

        let diagnostics = NullDiagnosticSink;
        let mut trace = EventTrace::new();

        let result = execute(
            &opp(),
            &long,
            &short,
            &registry,
            &breaker,
            &limits(),
            &fast_config(),
            &diagnostics,
            &mut trace,
            Utc::now(),
        )
        .await;

        assert!(matches!(result, Err(EngineError::CircuitOpen)));
        assert!(long.placed_requests().is_empty());

        // The symbol lock is still released even though execution never
        // reached the slice loop.
        let other_owner = generate_owner_id();
        assert!(registry.try_acquire_symbol("X", other_owner, "after denial"));
    }

    #[tokio::test(start_paused = true)]
    async fn preflight_rejection_propagates_and_releases_the_lock() {
        let long = MockVenueAdapter::new(VenueTag::Flaky);
        let short = MockVenueAdapter::new(VenueTag::Reliable);
        long.set_equity(10_000.0);
        short.set_equity(10_000.0);
        long.set_available_margin(10_000.0);
        short.set_available_margin(10.0); // scaled notional = 10*5 = 50 < min 100

        let registry = ExecutionLockRegistry::new();
        let breaker = CircuitBreaker::new(Default::default());
        let diagnostics = NullDiagnosticSink;
        let mut trace = EventTrace::new();

        let result = execute(
            &opp(),
            &long,
            &short,
            &registry,
            &breaker,
            &limits(),
            &fast_config(),
            &diagnostics,
            &mut trace,
            Utc::now(),
        )
        .await;

        assert!(matches!(result, Err(EngineError::BelowMinimumSize { .. })));
        assert_eq!(long.cancel_all_calls(), 1);
        assert!(long.placed_requests().is_empty());

        let other_owner = generate_owner_id();
        assert!(registry.try_acquire_symbol("X", other_owner, "after rejection"));
    }
}
