//! The hedgeable directional mispricing presented by the strategy layer.

use serde::{Deserialize, Serialize};

use crate::venue::VenueTag;

/// Carrier of intent: symbol, long-venue tag, short-venue tag, a quoted price
/// per side, and a target notional expressed in base-asset units.
/// Opportunities are immutable inputs; the engine never mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: String,
    pub long_venue: VenueTag,
    pub short_venue: VenueTag,
    pub long_price: f64,
    pub short_price: f64,
    /// Desired total size, in base-asset units.
    pub total_size: f64,
}

impl Opportunity {
    /// Midpoint price used to convert base-asset sizes to USD throughout
    /// planning, sizing, and the final-imbalance check.
    pub fn mid_price(&self) -> f64 {
        (self.long_price + self.short_price) / 2.0
    }

    pub fn notional_usd(&self) -> f64 {
        self.total_size * self.mid_price()
    }

    /// True iff exactly one leg is the flaky venue, and it is the LONG leg —
    /// i.e. the flaky venue must be placed as leg A. `None` means neither leg
    /// is flaky, in which case leg ordering is unconstrained by fill
    /// semantics and the LONG side is conventionally placed first.
    pub fn first_is_long(&self) -> bool {
        if self.short_venue.is_flaky() {
            false
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn mid_price_is_average() {
        assert!((opp().mid_price() - 3000.5).abs() < 1e-9);
    }

    #[test]
    fn flaky_short_leg_forces_first_is_short() {
        let mut o = opp();
        o.long_venue = VenueTag::Reliable;
        o.short_venue = VenueTag::Flaky;
        assert!(!o.first_is_long());
    }

    #[test]
    fn flaky_long_leg_forces_first_is_long() {
        assert!(opp().first_is_long());
    }
}
