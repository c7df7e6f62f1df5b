//! Symbol-level mutual exclusion and per-(venue,symbol,side) active-order
//! tracking. This is process-wide shared mutable state; every operation
//! below takes a single `parking_lot::Mutex` lock for the duration of a map
//! lookup or mutation and returns — there is no suspension point inside the
//! registry itself, only in the caller's use of its results.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::venue::{OrderSide, VenueTag};

/// Opaque owner id. Re-acquisition of a symbol lock by the same owner is
/// idempotent; a mismatched release is a logged no-op.
pub type OwnerId = Uuid;

pub fn generate_owner_id() -> OwnerId {
    Uuid::new_v4()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Placing,
    Placed,
    WaitingFill,
    Filled,
    Cancelled,
    Failed,
}

impl RegistryState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub state: RegistryState,
    pub owner: OwnerId,
    pub order_id: Option<String>,
    pub price: Option<f64>,
    pub reduce_only: bool,
    pub size: f64,
    created_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OrderKey {
    venue: VenueTag,
    symbol: String,
    side: OrderSide,
}

impl OrderKey {
    fn new(venue: VenueTag, symbol: &str, side: OrderSide) -> Self {
        Self {
            venue,
            symbol: symbol.to_string(),
            side,
        }
    }
}

#[derive(Default)]
struct Inner {
    symbol_locks: HashMap<String, OwnerId>,
    orders: HashMap<OrderKey, RegistryEntry>,
}

/// The symbol-level mutex plus per-(venue,symbol,side) active-order registry.
#[derive(Default)]
pub struct ExecutionLockRegistry {
    inner: Mutex<Inner>,
}

impl ExecutionLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking: if another owner already holds the lock, returns
    /// `false` immediately and the caller must skip the opportunity this
    /// cycle. Re-acquisition by the same owner is permitted.
    pub fn try_acquire_symbol(&self, symbol: &str, owner: OwnerId, reason: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.symbol_locks.get(symbol) {
            Some(existing) if *existing != owner => {
                tracing::debug!(symbol, %reason, "symbol lock busy, skipping");
                false
            }
            _ => {
                inner.symbol_locks.insert(symbol.to_string(), owner);
                true
            }
        }
    }

    /// Permitted only by the owning thread; a mismatched release is a no-op,
    /// logged rather than silently ignored.
    pub fn release_symbol(&self, symbol: &str, owner: OwnerId) {
        let mut inner = self.inner.lock();
        match inner.symbol_locks.get(symbol) {
            Some(existing) if *existing == owner => {
                inner.symbol_locks.remove(symbol);
            }
            Some(_) => {
                tracing::warn!(symbol, %owner, "release_symbol called by non-owning thread, ignored");
            }
            None => {}
        }
    }

    pub fn has_active_order(&self, venue: VenueTag, symbol: &str, side: OrderSide) -> bool {
        let inner = self.inner.lock();
        inner
            .orders
            .get(&OrderKey::new(venue, symbol, side))
            .map(|e| !e.state.is_terminal())
            .unwrap_or(false)
    }

    /// The race-detection primitive: fails (returns `false`) if an entry for
    /// this key is already in a non-terminal state, without mutating it.
    /// Callers must check this before submitting and treat `false` as a
    /// "race condition detected" abort.
    pub fn register_order_placing(
        &self,
        venue: VenueTag,
        symbol: &str,
        side: OrderSide,
        owner: OwnerId,
        size: f64,
        price: Option<f64>,
    ) -> bool {
        let mut inner = self.inner.lock();
        let key = OrderKey::new(venue, symbol, side);
        if let Some(existing) = inner.orders.get(&key) {
            if !existing.state.is_terminal() {
                return false;
            }
        }
        inner.orders.insert(
            key,
            RegistryEntry {
                state: RegistryState::Placing,
                owner,
                order_id: None,
                price,
                reduce_only: false,
                size,
                created_at: Instant::now(),
            },
        );
        true
    }

    pub fn update_order_status(
        &self,
        venue: VenueTag,
        symbol: &str,
        side: OrderSide,
        new_state: RegistryState,
        order_id: Option<String>,
        price: Option<f64>,
        reduce_only: Option<bool>,
    ) {
        let mut inner = self.inner.lock();
        let key = OrderKey::new(venue, symbol, side);
        if let Some(entry) = inner.orders.get_mut(&key) {
            entry.state = new_state;
            if order_id.is_some() {
                entry.order_id = order_id;
            }
            if price.is_some() {
                entry.price = price;
            }
            if let Some(ro) = reduce_only {
                entry.reduce_only = ro;
            }
        }
    }

    /// Forcibly removes an entry regardless of state. Used during rollback
    /// cleanup and by the stale-lock janitor.
    pub fn force_clear(&self, venue: VenueTag, symbol: &str, side: OrderSide) {
        let mut inner = self.inner.lock();
        inner.orders.remove(&OrderKey::new(venue, symbol, side));
    }

    /// Safety-net janitor sweep: force-clears any entry older than
    /// `ceiling`, regardless of state. Not a correctness mechanism — normal
    /// operation always reaches a terminal state and is cleaned up by the
    /// slice executor's finalizer; this only protects against a leaked entry
    /// from a crashed or hung execution. Returns the number of entries cleared.
    pub fn sweep_stale(&self, ceiling: Duration) -> usize {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let before = inner.orders.len();
        inner
            .orders
            .retain(|_, entry| now.duration_since(entry.created_at) < ceiling);
        before - inner.orders.len()
    }
}
