//! In-memory [`VenueAdapter`] for deterministic tests. Scripts fills,
//! rejections, cancellations, and the flaky-venue cancelled-but-filled
//! ambiguity without touching a real exchange.
//!
//! Exposed outside this crate only under the `testing` feature, so the
//! `tests/` integration suite can use it while real consumers never see it
//! in a normal build.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::venue::{
    OrderRequest, OrderResponse, OrderSide, OrderStatus, PositionSnapshot, VenueAdapter, VenueTag,
};

struct Inner {
    order_statuses: HashMap<String, VecDeque<OrderResponse>>,
    place_responses: VecDeque<OrderResponse>,
    positions: HashMap<OrderSide, VecDeque<PositionSnapshot>>,
    placed_requests: Vec<OrderRequest>,
    equity: f64,
    available_margin: f64,
    mark_price: f64,
    next_order_id: u32,
}

/// Scripted venue double. Every `seed_*` method queues or sets state that
/// subsequent adapter calls consume; `*_calls`/`placed_requests` accessors
/// let tests assert on what the engine actually submitted.
pub struct MockVenueAdapter {
    tag: VenueTag,
    inner: Mutex<Inner>,
    cancel_calls: AtomicU32,
    cancel_all_calls: AtomicU32,
}

impl MockVenueAdapter {
    pub fn new(tag: VenueTag) -> Self {
        Self {
            tag,
            inner: Mutex::new(Inner {
                order_statuses: HashMap::new(),
                place_responses: VecDeque::new(),
                positions: HashMap::new(),
                placed_requests: Vec::new(),
                equity: 100_000.0,
                available_margin: 100_000.0,
                mark_price: 3000.0,
                next_order_id: 1,
            }),
            cancel_calls: AtomicU32::new(0),
            cancel_all_calls: AtomicU32::new(0),
        }
    }

    /// Queues the response(s) `get_order_status(order_id, _)` returns, in
    /// order. If only one is queued, subsequent polls keep returning it
    /// (sticky), matching a real venue that doesn't change state without the
    /// engine doing something new.
    pub fn seed_order_status(&self, order_id: &str, response: OrderResponse) {
        self.inner
            .lock()
            .order_statuses
            .entry(order_id.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queues the response `place_order` returns for the next call. Defaults
    /// to an auto-generated SUBMITTED ack if nothing is queued.
    pub fn seed_place_response(&self, response: OrderResponse) {
        self.inner.lock().place_responses.push_back(response);
    }

    /// Queues the position snapshot `get_positions()` returns for `side`, in
    /// order. If only one is queued, subsequent calls keep returning it
    /// (sticky) — seed two calls (e.g. zero, then the post-fill size) to
    /// simulate a position that grows partway through a test.
    pub fn seed_position(&self, side: OrderSide, size: f64, mark_price: f64, entry_price: f64) {
        self.inner
            .lock()
            .positions
            .entry(side)
            .or_default()
            .push_back(PositionSnapshot {
                side,
                size,
                mark_price,
                entry_price,
            });
    }

    pub fn set_equity(&self, equity: f64) {
        self.inner.lock().equity = equity;
    }

    pub fn set_available_margin(&self, margin: f64) {
        self.inner.lock().available_margin = margin;
    }

    pub fn set_mark_price(&self, price: f64) {
        self.inner.lock().mark_price = price;
    }

    pub fn cancel_calls(&self) -> u32 {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_all_calls(&self) -> u32 {
        self.cancel_all_calls.load(Ordering::SeqCst)
    }

    pub fn placed_requests(&self) -> Vec<OrderRequest> {
        self.inner.lock().placed_requests.clone()
    }
}

#[async_trait]
impl VenueAdapter for MockVenueAdapter {
    async fn place_order(&self, request: OrderRequest) -> anyhow::Result<OrderResponse> {
        let mut inner = self.inner.lock();
        inner.placed_requests.push(request.clone());

        if let Some(resp) = inner.place_responses.pop_front() {
            return Ok(resp);
        }

        let order_id = format!("mock-{}", inner.next_order_id);
        inner.next_order_id += 1;
        Ok(OrderResponse {
            order_id: Some(order_id),
            status: OrderStatus::Submitted,
            filled_size: 0.0,
            average_fill_price: request.price,
            error_message: None,
        })
    }

    async fn cancel_order(&self, _order_id: &str, _symbol: &str) -> anyhow::Result<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel_all_orders(&self, _symbol: &str) -> anyhow::Result<u32> {
        self.cancel_all_calls.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn get_order_status(
        &self,
        order_id: &str,
        _symbol: &str,
    ) -> anyhow::Result<OrderResponse> {
        let mut inner = self.inner.lock();
        match inner.order_statuses.get_mut(order_id) {
            Some(queue) if queue.len() > 1 => Ok(queue.pop_front().unwrap()),
            Some(queue) => Ok(queue
                .front()
                .cloned()
                .unwrap_or_else(|| OrderResponse::rejected("no status seeded"))),
            None => Ok(OrderResponse::rejected("no status seeded")),
        }
    }

    async fn get_positions(&self) -> anyhow::Result<Vec<PositionSnapshot>> {
        let mut inner = self.inner.lock();
        let snapshots = inner
            .positions
            .values_mut()
            .filter_map(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().copied()
                }
            })
            .collect();
        Ok(snapshots)
    }

    async fn get_equity(&self) -> anyhow::Result<f64> {
        Ok(self.inner.lock().equity)
    }

    async fn get_available_margin(&self) -> anyhow::Result<f64> {
        Ok(self.inner.lock().available_margin)
    }

    async fn get_mark_price(&self, _symbol: &str) -> anyhow::Result<f64> {
        Ok(self.inner.lock().mark_price)
    }

    fn venue_tag(&self) -> VenueTag {
        self.tag
    }
}
