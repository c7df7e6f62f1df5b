//! Pre-flight capital sizing: clear stale orders, read live margin on both
//! venues, and scale the opportunity's notional down to what the thinner
//! venue can actually support — or reject it outright.

use std::time::Duration;

use tokio::time::sleep;

use crate::config::{EngineConfig, StrategyLimits};
use crate::error::{EngineError, EngineResult};
use crate::opportunity::Opportunity;
use crate::venue::VenueAdapter;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreflightResult {
    /// Possibly-scaled-down total size, in base-asset units.
    pub total_size: f64,
    pub scaled: bool,
}

/// Runs the three pre-flight steps: clear stale orders, read margin, scale
/// notional. `long`/`short` must be the adapters for
/// `opportunity.long_venue`/`opportunity.short_venue` respectively.
pub async fn run(
    long: &dyn VenueAdapter,
    short: &dyn VenueAdapter,
    opportunity: &Opportunity,
    limits: &StrategyLimits,
    config: &EngineConfig,
) -> EngineResult<PreflightResult> {
    if let Err(e) = long.cancel_all_orders(&opportunity.symbol).await {
        tracing::warn!(error = %e, venue = ?long.venue_tag(), "pre-flight cancel failed, continuing");
    }
    if let Err(e) = short.cancel_all_orders(&opportunity.symbol).await {
        tracing::warn!(error = %e, venue = ?short.venue_tag(), "pre-flight cancel failed, continuing");
    }
    sleep(Duration::from_millis(config.cancel_settle_ms)).await;

    let margin_long = long
        .get_available_margin()
        .await
        .map_err(|source| EngineError::VenueTransport {
            venue: long.venue_tag(),
            source,
        })?;
    let margin_short = short
        .get_available_margin()
        .await
        .map_err(|source| EngineError::VenueTransport {
            venue: short.venue_tag(),
            source,
        })?;

    let mid_price = opportunity.mid_price();
    let required_margin = opportunity.total_size * mid_price / limits.leverage;
    let min_margin = margin_long.min(margin_short);

    if min_margin >= required_margin {
        return Ok(PreflightResult {
            total_size: opportunity.total_size,
            scaled: false,
        });
    }

    let scaled_notional = min_margin * limits.leverage;
    if scaled_notional < limits.min_position_size_usd {
        return Err(EngineError::BelowMinimumSize {
            notional_usd: scaled_notional,
            minimum_usd: limits.min_position_size_usd,
        });
    }

    tracing::warn!(
        symbol = %opportunity.symbol,
        original_notional = opportunity.notional_usd(),
        scaled_notional,
        "pre-flight scaling notional down to available margin"
    );

    Ok(PreflightResult {
        total_size: scaled_notional / mid_price,
        scaled: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockVenueAdapter;
    use crate::venue::VenueTag;

    fn opp() -> Opportunity {
        Opportunity {
            symbol: "X".to_string(),
            long_venue: VenueTag::Flaky,
            short_venue: VenueTag::Reliable,
            long_price: 3000.0,
            short_price: 3000.0,
            total_size: 2.0,
        }
    }

    fn limits() -> StrategyLimits {
        StrategyLimits {
            min_position_size_usd: 100.0,
            leverage: 5.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn leaves_notional_unscaled_when_margin_is_sufficient() {
        let long = MockVenueAdapter::new(VenueTag::Flaky);
        let short = MockVenueAdapter::new(VenueTag::Reliable);
        long.set_available_margin(10_000.0);
        short.set_available_margin(10_000.0);
        let config = EngineConfig::default();
        let result = run(&long, &short, &opp(), &limits(), &config).await.unwrap();
        assert!(!result.scaled);
        assert_eq!(result.total_size, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn scales_down_to_the_thinner_venues_margin() {
        let long = MockVenueAdapter::new(VenueTag::Flaky);
        let short = MockVenueAdapter::new(VenueTag::Reliable);
        long.set_available_margin(10_000.0);
        short.set_available_margin(200.0); // required margin is 2*3000/5 = 1200
        let config = EngineConfig::default();
        let result = run(&long, &short, &opp(), &limits(), &config).await.unwrap();
        assert!(result.scaled);
        // scaled notional = 200 * 5 = 1000; size = 1000/3000
        assert!((result.total_size - (1000.0 / 3000.0)).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_when_scaled_notional_is_below_minimum() {
        let long = MockVenueAdapter::new(VenueTag::Flaky);
        let short = MockVenueAdapter::new(VenueTag::Reliable);
        long.set_available_margin(10_000.0);
        short.set_available_margin(10.0); // scaled notional = 10*5 = 50 < min 100
        let config = EngineConfig::default();
        let err = run(&long, &short, &opp(), &limits(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BelowMinimumSize { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancels_stale_orders_on_both_venues() {
        let long = MockVenueAdapter::new(VenueTag::Flaky);
        let short = MockVenueAdapter::new(VenueTag::Reliable);
        long.set_available_margin(10_000.0);
        short.set_available_margin(10_000.0);
        let config = EngineConfig::default();
        run(&long, &short, &opp(), &limits(), &config).await.unwrap();
        assert_eq!(long.cancel_all_calls(), 1);
        assert_eq!(short.cancel_all_calls(), 1);
    }
}
