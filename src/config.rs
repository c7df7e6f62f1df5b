//! Recognized configuration options and their defaults.

/// Engine-owned tuning knobs. `from_env` overlays environment variables,
/// parsing-or-keeping-default per field and never panicking on a malformed
/// value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub slice_fill_timeout_ms: u64,
    pub fill_check_interval_ms: u64,
    pub max_imbalance_percent: f64,
    pub funding_buffer_ms: i64,
    pub min_slices: u32,
    pub max_slices: u32,
    pub max_portfolio_pct_per_slice: f64,
    pub max_usd_per_slice: f64,
    /// Grace sleep before the first fill-status poll.
    pub fill_wait_grace_ms: u64,
    /// Poll-interval backoff ceiling for opens vs. closes.
    pub poll_backoff_cap_open_ms: u64,
    pub poll_backoff_cap_close_ms: u64,
    /// Pause between successful slices in the execution loop.
    pub inter_slice_pause_ms: u64,
    /// Wait for margin release after pre-flight cancellation.
    pub cancel_settle_ms: u64,
    /// Multiple of `slice_fill_timeout_ms` after which a registry entry is
    /// eligible for janitor eviction.
    pub stale_lock_multiple: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slice_fill_timeout_ms: 25_000,
            fill_check_interval_ms: 2_000,
            max_imbalance_percent: 5.0,
            funding_buffer_ms: 180_000,
            min_slices: 2,
            max_slices: 15,
            max_portfolio_pct_per_slice: 0.05,
            max_usd_per_slice: 2_500.0,
            fill_wait_grace_ms: 500,
            poll_backoff_cap_open_ms: 5_000,
            poll_backoff_cap_close_ms: 10_000,
            inter_slice_pause_ms: 500,
            cancel_settle_ms: 500,
            stale_lock_multiple: 10,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        fn parse_env<T: std::str::FromStr>(key: &str, current: T) -> T {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(current)
        }

        config.slice_fill_timeout_ms =
            parse_env("HEDGE_SLICE_FILL_TIMEOUT_MS", config.slice_fill_timeout_ms);
        config.fill_check_interval_ms =
            parse_env("HEDGE_FILL_CHECK_INTERVAL_MS", config.fill_check_interval_ms);
        config.max_imbalance_percent =
            parse_env("HEDGE_MAX_IMBALANCE_PERCENT", config.max_imbalance_percent);
        config.funding_buffer_ms = parse_env("HEDGE_FUNDING_BUFFER_MS", config.funding_buffer_ms);
        config.min_slices = parse_env("HEDGE_MIN_SLICES", config.min_slices);
        config.max_slices = parse_env("HEDGE_MAX_SLICES", config.max_slices);
        config.max_portfolio_pct_per_slice = parse_env(
            "HEDGE_MAX_PORTFOLIO_PCT_PER_SLICE",
            config.max_portfolio_pct_per_slice,
        );
        config.max_usd_per_slice = parse_env("HEDGE_MAX_USD_PER_SLICE", config.max_usd_per_slice);

        config
    }

    /// Imbalance tolerance as a fraction, used directly against a fill size.
    pub fn max_imbalance_fraction(&self) -> f64 {
        self.max_imbalance_percent / 100.0
    }

    pub fn slice_fill_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.slice_fill_timeout_ms)
    }

    pub fn fill_check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.fill_check_interval_ms)
    }
}

/// Strategy-owned limits. Explicitly a collaborator's concern, not this
/// engine's — kept as a separate struct so the caller constructs it from
/// whatever config source it already has, rather than the engine reaching
/// into global configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyLimits {
    pub min_position_size_usd: f64,
    pub leverage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let c = EngineConfig::default();
        assert_eq!(c.min_slices, 2);
        assert_eq!(c.max_usd_per_slice, 2_500.0);
        assert_eq!(c.max_imbalance_fraction(), 0.05);
    }
}
