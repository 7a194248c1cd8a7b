//! Reservation coordinator.
//!
//! Turns a cart into a `pending` order:
//!
//! 1. Validate the cart and price every line (no side effects).
//! 2. Reserve each line in cart order with one atomic conditional decrement,
//!    recording every success in a [`CompensationList`].
//! 3. Persist the order.
//! 4. Record an inactive digital access grant for every digital line.
//!
//! A failure in step 2 or 3 unwinds the compensation list before the error
//! is returned, so a rejected checkout leaves no reserved stock behind. The
//! buyer's cart is left untouched; it is cleared only on settlement.

use crate::compensation::{CompensationList, Compensator, ReleaseReason};
use crate::environment::MarketplaceEnvironment;
use crate::retry::retry_with_predicate;
use atelier_core::catalog::ReserveOutcome;
use atelier_core::error::{CheckoutError, StoreError, ValidationError};
use atelier_core::grant::DigitalAccessGrant;
use atelier_core::order::{CartLine, Order, OrderLine, ShippingAddress};
use atelier_core::types::UserId;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;

/// A checkout with explicit lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    /// Authenticated buyer
    pub buyer_id: UserId,
    /// Lines, reserved in this order
    pub lines: Vec<CartLine>,
    /// Required when any line is a physical item
    pub shipping: Option<ShippingAddress>,
}

/// Orchestrates checkouts against the stock ledger.
#[derive(Debug, Clone)]
pub struct ReservationCoordinator {
    env: Arc<MarketplaceEnvironment>,
    compensator: Compensator,
}

impl ReservationCoordinator {
    /// Create a coordinator over `env`.
    #[must_use]
    pub fn new(env: Arc<MarketplaceEnvironment>) -> Self {
        let compensator = Compensator::new(Arc::clone(&env));
        Self { env, compensator }
    }

    /// Check out the buyer's stored cart.
    ///
    /// # Errors
    ///
    /// See [`checkout`](Self::checkout).
    pub async fn checkout_cart(
        &self,
        buyer_id: UserId,
        shipping: Option<ShippingAddress>,
    ) -> Result<Order, CheckoutError> {
        let lines = self.env.carts.load(buyer_id).await?;
        self.checkout(CheckoutRequest {
            buyer_id,
            lines,
            shipping,
        })
        .await
    }

    /// Reserve stock for every line and create a `pending` order.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::Validation`] before anything was reserved
    /// - [`CheckoutError::InsufficientStock`] naming the first line that could
    ///   not be reserved, after earlier lines were released
    /// - [`CheckoutError::Store`] if the store failed, after earlier lines
    ///   were released
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<Order, CheckoutError> {
        let started = Instant::now();
        counter!("checkout_attempts_total").increment(1);

        let result = self.run(request).await;

        histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        match &result {
            Ok(order) => {
                counter!("orders_created_total").increment(1);
                tracing::info!(
                    order_id = %order.id,
                    buyer_id = %order.buyer_id,
                    lines = order.lines.len(),
                    total = %order.total_amount,
                    "Order created"
                );
            }
            Err(error) => {
                counter!("checkout_rejected_total", "reason" => error.reason()).increment(1);
                tracing::warn!(error = %error, "Checkout rejected");
            }
        }
        result
    }

    async fn run(&self, request: CheckoutRequest) -> Result<Order, CheckoutError> {
        let order = self.validate(&request).await?;

        let mut reserved = CompensationList::new();
        for line in &order.lines {
            let outcome = match self.env.stock.try_reserve(line.item_id, line.quantity).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    self.roll_back(reserved).await;
                    return Err(error.into());
                }
            };
            counter!("stock_reservations_total", "outcome" => outcome.label()).increment(1);

            match outcome {
                ReserveOutcome::Reserved { remaining } => {
                    tracing::debug!(item_id = %line.item_id, quantity = line.quantity, remaining, "Stock reserved");
                    reserved.record(line.item_id, line.quantity);
                }
                ReserveOutcome::Insufficient { available } => {
                    tracing::warn!(
                        item_id = %line.item_id,
                        requested = line.quantity,
                        available,
                        "Insufficient stock, rolling back checkout"
                    );
                    self.roll_back(reserved).await;
                    return Err(CheckoutError::InsufficientStock {
                        item_id: line.item_id,
                        requested: line.quantity,
                        available,
                    });
                }
            }
        }

        if let Err(error) = self.env.orders.insert(order.clone()).await {
            tracing::error!(order_id = %order.id, error = %error, "Order could not be persisted, rolling back");
            self.roll_back(reserved).await;
            return Err(error.into());
        }
        reserved.commit();

        self.record_grants(&order).await;
        Ok(order)
    }

    /// Validate a request and build the order it would create.
    ///
    /// Reads the catalog only; nothing is reserved or written.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::Validation`] for an empty cart, a zero
    /// quantity, a missing or unlisted item, missing shipping information or
    /// an overflowing total, and [`CheckoutError::Store`] if the catalog
    /// cannot be read.
    pub async fn validate(&self, request: &CheckoutRequest) -> Result<Order, CheckoutError> {
        if request.lines.is_empty() {
            return Err(ValidationError::EmptyCart.into());
        }

        let rate = self.env.settings.commission_rate;
        let mut lines = Vec::with_capacity(request.lines.len());
        let mut needs_shipping = false;

        for cart_line in &request.lines {
            let item_id = cart_line.item_id;
            if cart_line.quantity == 0 {
                return Err(ValidationError::InvalidQuantity { item_id }.into());
            }
            let item = self
                .env
                .catalog
                .item(item_id)
                .await?
                .ok_or(ValidationError::ItemNotFound { item_id })?;
            if !item.is_for_sale {
                return Err(ValidationError::ItemNotForSale { item_id }.into());
            }

            needs_shipping |= item.kind.requires_shipping();
            lines.push(OrderLine::priced(&item, cart_line.quantity, rate)?);
        }

        let shipping = if needs_shipping {
            match &request.shipping {
                Some(address) if address.is_complete() => Some(address.clone()),
                _ => return Err(ValidationError::MissingShippingInfo.into()),
            }
        } else {
            None
        };

        Ok(Order::pending(
            self.env.ids.order_id(),
            request.buyer_id,
            lines,
            rate,
            shipping,
            self.env.clock.now(),
        )?)
    }

    async fn roll_back(&self, reserved: CompensationList) {
        let failures = reserved
            .unwind(|reservation| {
                self.compensator.release(
                    reservation.item_id,
                    reservation.quantity,
                    None,
                    ReleaseReason::CheckoutRollback,
                )
            })
            .await;

        if !failures.is_empty() {
            tracing::error!(
                failed = failures.len(),
                "Checkout rollback incomplete; correction records written"
            );
        }
    }

    /// Create an inactive grant for every digital line of a new order.
    ///
    /// A grant already held for the same (buyer, item) is left alone. A
    /// failure here is logged only; activation at settlement creates any
    /// grant still missing.
    pub async fn record_grants(&self, order: &Order) {
        for line in order.digital_lines() {
            let grant = DigitalAccessGrant::inactive(
                order.buyer_id,
                line.item_id,
                order.id,
                order.created_at,
            );
            let grants = &self.env.grants;
            let result = retry_with_predicate(
                &self.env.settings.compensation_retry,
                "create_grant",
                || grants.create_if_absent(grant.clone()),
                StoreError::is_transient,
            )
            .await;

            match result {
                Ok(true) => {
                    tracing::debug!(order_id = %order.id, item_id = %line.item_id, "Access grant recorded");
                }
                Ok(false) => {
                    tracing::debug!(order_id = %order.id, item_id = %line.item_id, "Buyer already holds an access grant");
                }
                Err(error) => {
                    tracing::warn!(
                        order_id = %order.id,
                        item_id = %line.item_id,
                        error = %error,
                        "Access grant not recorded at checkout"
                    );
                }
            }
        }
    }
}
