//! Uniform capability surface over heterogeneous perpetual-futures venues.
//!
//! Nothing in this module talks to a real exchange. `VenueAdapter` is the
//! narrow interface the rest of the engine depends on; concrete adapters
//! (REST clients, websocket-backed order managers, the in-memory mock used by
//! tests) live outside this crate and are passed in at construction time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Closed enum of supported venues. Extensible at compile time only — adding
/// a venue is a code change, not configuration, because fill semantics are
/// wired per-tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VenueTag {
    /// The venue whose order-status endpoint is unreliable: LIMIT orders may
    /// be reported CANCELLED despite having filled. Must always be placed as
    /// leg A in a sequential slice. Funds hourly rather than every 8 hours.
    Flaky,
    Reliable,
    ReliableB,
}

impl VenueTag {
    /// Whether this venue requires position-delta fill detection.
    pub fn is_flaky(&self) -> bool {
        matches!(self, VenueTag::Flaky)
    }

    /// Funding cadence used by orchestrator planning.
    pub fn funding_interval(&self) -> chrono::Duration {
        if self.is_flaky() {
            chrono::Duration::hours(1)
        } else {
            chrono::Duration::hours(8)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Long,
    Short,
}

impl OrderSide {
    /// The side that closes a position opened on `self`.
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Long => OrderSide::Short,
            OrderSide::Short => OrderSide::Long,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
    Ioc,
}

/// Immutable order request. Constructed once and never mutated; rollback and
/// imbalance-repair orders are always built as a *new* `OrderRequest`, never
/// by patching a prior one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub size: f64,
    pub price: Option<f64>,
    pub time_in_force: TimeInForce,
    pub reduce_only: bool,
}

impl OrderRequest {
    /// A MARKET IOC reduce-only order, as required by rollback and
    /// final-imbalance repair. The only constructor for that shape, so every
    /// rollback order request in the codebase is provably MARKET/IOC/
    /// reduce-only by construction.
    pub fn reduce_only_market(symbol: impl Into<String>, side: OrderSide, size: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            size,
            price: None,
            time_in_force: TimeInForce::Ioc,
            reduce_only: true,
        }
    }

    /// A LIMIT GTC order for opening a leg, as used by `PLACE_A`/`PLACE_B`.
    pub fn limit_gtc(symbol: impl Into<String>, side: OrderSide, size: f64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            size,
            price: Some(price),
            time_in_force: TimeInForce::Gtc,
            reduce_only: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Submitted,
    Filled,
    Cancelled,
    Rejected,
}

/// Immutable order response. `place_order` and `get_order_status` both
/// return this shape — order-level rejection is ordinary data, never an
/// `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: Option<String>,
    pub status: OrderStatus,
    pub filled_size: f64,
    pub average_fill_price: Option<f64>,
    pub error_message: Option<String>,
}

impl OrderResponse {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            order_id: None,
            status: OrderStatus::Rejected,
            filled_size: 0.0,
            average_fill_price: None,
            error_message: Some(message.into()),
        }
    }
}

/// Read-only position snapshot, fetched on demand.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub side: OrderSide,
    /// Always non-negative; `side` encodes direction.
    pub size: f64,
    pub mark_price: f64,
    pub entry_price: f64,
}

/// The interface the engine requires of every venue. Implemented elsewhere
/// (REST/websocket clients for real venues, [`crate::testing::MockVenueAdapter`]
/// for tests) — never by this crate for a live venue.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Synchronous from the caller's point of view: always returns a
    /// response, even for an order-level rejection. Only transport failures
    /// (after the retry wrapper exhausts attempts) surface as `Err`.
    async fn place_order(&self, request: OrderRequest) -> anyhow::Result<OrderResponse>;

    /// Idempotent: succeeds silently on an already-cancelled or already-filled order.
    async fn cancel_order(&self, order_id: &str, symbol: &str) -> anyhow::Result<()>;

    /// Bulk cancel; returns the number of orders cancelled.
    async fn cancel_all_orders(&self, symbol: &str) -> anyhow::Result<u32>;

    async fn get_order_status(&self, order_id: &str, symbol: &str) -> anyhow::Result<OrderResponse>;

    async fn get_positions(&self) -> anyhow::Result<Vec<PositionSnapshot>>;

    /// Total collateral value in USD.
    async fn get_equity(&self) -> anyhow::Result<f64>;

    /// Free margin in USD, already net of existing positions and the venue's
    /// own safety buffer. The engine treats this value as truth for sizing.
    async fn get_available_margin(&self) -> anyhow::Result<f64>;

    async fn get_mark_price(&self, symbol: &str) -> anyhow::Result<f64>;

    fn venue_tag(&self) -> VenueTag;
}
