//! In-flight order bookkeeping and the sequence-to-order lookup.

use std::collections::HashMap;

use crate::error::OrderError;
use crate::models::{ExchangeOrderId, OrderState, TrackedOrder};

/// Tracked orders keyed by client order id.
#[derive(Debug, Default)]
pub struct OrderTracker {
    orders: HashMap<String, TrackedOrder>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_tracking(&mut self, order: TrackedOrder) {
        self.orders.insert(order.client_order_id.clone(), order);
    }

    pub fn stop_tracking(&mut self, client_order_id: &str) -> Option<TrackedOrder> {
        self.orders.remove(client_order_id)
    }

    pub fn get(&self, client_order_id: &str) -> Option<&TrackedOrder> {
        self.orders.get(client_order_id)
    }

    pub fn get_mut(&mut self, client_order_id: &str) -> Option<&mut TrackedOrder> {
        self.orders.get_mut(client_order_id)
    }

    /// Orders that can still receive fills.
    pub fn all_fillable_orders(&self) -> impl Iterator<Item = &TrackedOrder> {
        self.orders.values().filter(|o| o.is_fillable())
    }

    /// Find the fillable order whose exchange id carries `sequence`.
    ///
    /// Unrelated ledger activity is the common case, so no match is `None`
    /// rather than an error. Orders without an exchange id never match. More
    /// than one match breaks the one-order-per-sequence invariant; that is
    /// logged and also resolves to `None`.
    pub fn resolve_order_by_sequence(&self, sequence: u32) -> Option<&TrackedOrder> {
        let mut matches = self
            .all_fillable_orders()
            .filter(|o| o.exchange_sequence() == Some(sequence));
        let first = matches.next()?;
        if let Some(second) = matches.next() {
            tracing::warn!(
                sequence,
                first = %first.client_order_id,
                second = %second.client_order_id,
                "ambiguous sequence match, refusing to resolve"
            );
            return None;
        }
        Some(first)
    }

    /// Attach the ledger identity to an order. Refused when another live
    /// order already owns the same sequence.
    pub fn assign_exchange_order_id(&mut self, client_order_id: &str, id: ExchangeOrderId) -> Result<(), OrderError> {
        if let Some(owner) = self
            .all_fillable_orders()
            .find(|o| o.client_order_id != client_order_id && o.exchange_sequence() == Some(id.sequence))
        {
            tracing::error!(
                sequence = id.sequence,
                owner = %owner.client_order_id,
                client_order_id,
                "sequence already assigned to a live order"
            );
            return Err(OrderError::DuplicateSequence {
                client_order_id: client_order_id.to_string(),
                sequence: id.sequence,
                owner: owner.client_order_id.clone(),
            });
        }
        let order = self.orders.get_mut(client_order_id).ok_or_else(|| OrderError::UnknownOrder {
            client_order_id: client_order_id.to_string(),
        })?;
        order.exchange_order_id = Some(id.to_string());
        Ok(())
    }

    /// Move an order to `new_state` if the lifecycle allows it. Returns
    /// whether the state changed.
    pub fn transition(&mut self, client_order_id: &str, new_state: OrderState) -> bool {
        let Some(order) = self.orders.get_mut(client_order_id) else {
            return false;
        };
        if order.state == new_state {
            return false;
        }
        if !order.state.can_transition_to(new_state) {
            tracing::debug!(
                client_order_id,
                from = %order.state,
                to = %new_state,
                "ignoring transition out of lifecycle"
            );
            return false;
        }
        order.state = new_state;
        true
    }
}
