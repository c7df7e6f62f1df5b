//! Delta-neutral sliced execution engine for cross-venue perpetual-futures
//! funding arbitrage.
//!
//! The engine opens and closes hedged positions across a long venue and a
//! short venue while guaranteeing neither side is ever left standalone at
//! material size. Opportunity discovery, funding-rate aggregation, and
//! diagnostics dashboards are the caller's concern; this crate is the
//! execution core.

pub mod circuit_breaker;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod fill_waiter;
pub mod opportunity;
pub mod orchestrator;
pub mod preflight;
pub mod registry;
pub mod slice;
pub mod venue;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{EngineConfig, StrategyLimits};
pub use error::{EngineError, EngineResult};
pub use opportunity::Opportunity;
pub use orchestrator::ExecutionResult;
pub use venue::{OrderRequest, OrderResponse, OrderSide, VenueAdapter, VenueTag};
