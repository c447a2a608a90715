//! Order Aggregate
//!
//! A single payment attempt walks created -> confirmed -> (gateway
//! redirect) -> settled. Settled is terminal: `settle` refuses a second
//! transition, which is what makes duplicate gateway callbacks safe.

use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::domain::aggregates::cart::Cart;
use crate::domain::value_objects::Money;
use crate::domain::events::{DomainEvent, OrderEvent};

#[derive(Clone, Debug)]
pub struct Order {
    id: String,
    order_sn: String,
    customer_id: String,
    status: OrderStatus,
    payment: PaymentStatus,
    items: Vec<LineItem>,
    subtotal: Money,
    shipping: Money,
    total: Money,
    trade_no: Option<String>,
    trade_status: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug)] pub struct LineItem { pub id: String, pub product_id: String, pub name: String, pub sku: String, pub quantity: u32, pub unit_price: Money, pub total: Money }
#[derive(Clone, Debug, Default, PartialEq, Eq)] pub enum OrderStatus { #[default] Pending, Confirmed, Processing, Shipped, Delivered, Cancelled }
#[derive(Clone, Debug, Default, PartialEq, Eq)] pub enum PaymentStatus { #[default] Pending, Paid, Refunded }

/// Sold-count increment owed to a product after settlement. Yielded
/// exactly once per order because `settle` cannot run twice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoldLine { pub product_id: String, pub quantity: u32 }

impl Order {
    pub fn create(order_sn: impl Into<String>, customer_id: impl Into<String>, currency: &str) -> Self {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut order = Self {
            id: id.clone(), order_sn: order_sn.into(), customer_id: customer_id.into(),
            status: OrderStatus::Pending, payment: PaymentStatus::Pending,
            items: vec![], subtotal: Money::zero(currency), shipping: Money::zero(currency),
            total: Money::zero(currency), trade_no: None, trade_status: None, paid_at: None,
            created_at: now, updated_at: now, events: vec![],
        };
        let customer_id = order.customer_id.clone();
        order.raise_event(DomainEvent::Order(OrderEvent::Created { order_id: id, customer_id }));
        order
    }

    /// Drain a session cart into a fresh order.
    pub fn from_cart(order_sn: impl Into<String>, customer_id: impl Into<String>, cart: &Cart) -> Self {
        let mut order = Self::create(order_sn, customer_id, cart.currency());
        for item in cart.items() {
            order.add_item(LineItem {
                id: Uuid::new_v4().to_string(),
                product_id: item.product_id.clone(),
                name: item.name.clone(),
                sku: item.sku.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price.clone(),
                total: item.line_total(),
            });
        }
        order
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn order_sn(&self) -> &str { &self.order_sn }
    pub fn customer_id(&self) -> &str { &self.customer_id }
    pub fn status(&self) -> &OrderStatus { &self.status }
    pub fn payment(&self) -> &PaymentStatus { &self.payment }
    pub fn total(&self) -> &Money { &self.total }
    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn trade_no(&self) -> Option<&str> { self.trade_no.as_deref() }
    pub fn paid_at(&self) -> Option<DateTime<Utc>> { self.paid_at }

    pub fn add_item(&mut self, item: LineItem) { self.items.push(item); self.recalculate(); }

    pub fn confirm(&mut self) -> Result<(), OrderError> {
        if self.items.is_empty() { return Err(OrderError::NoItems); }
        self.status = OrderStatus::Confirmed;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Confirmed { order_id: self.id.clone(), total: self.total.amount() }));
        Ok(())
    }

    /// Apply a verified gateway callback. The caller must only invoke
    /// this after signature verification succeeded; the aggregate's job
    /// is the state transition, not trust.
    ///
    /// Returns the per-product sold increments. A second call fails
    /// with `AlreadySettled` so a gateway retry never double-counts.
    pub fn settle(&mut self, trade_no: impl Into<String>, trade_status: impl Into<String>) -> Result<Vec<SoldLine>, OrderError> {
        if self.payment == PaymentStatus::Paid { return Err(OrderError::AlreadySettled); }
        let trade_no = trade_no.into();
        self.payment = PaymentStatus::Paid;
        self.status = OrderStatus::Processing;
        self.trade_no = Some(trade_no.clone());
        self.trade_status = Some(trade_status.into());
        self.paid_at = Some(Utc::now());
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Settled { order_id: self.id.clone(), trade_no }));
        Ok(self.items.iter().map(|i| SoldLine { product_id: i.product_id.clone(), quantity: i.quantity }).collect())
    }

    pub fn ship(&mut self) { self.status = OrderStatus::Shipped; self.touch(); }
    pub fn deliver(&mut self) { self.status = OrderStatus::Delivered; self.touch(); }

    pub fn cancel(&mut self) -> Result<(), OrderError> {
        if self.payment == PaymentStatus::Paid { return Err(OrderError::CannotCancel); }
        self.status = OrderStatus::Cancelled;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Cancelled { order_id: self.id.clone() }));
        Ok(())
    }

    fn recalculate(&mut self) {
        self.subtotal = self.items.iter().fold(Money::zero(self.subtotal.currency()), |acc, i| acc.add(&i.total).unwrap_or(acc));
        self.total = self.subtotal.add(&self.shipping).unwrap_or(self.subtotal.clone());
        self.touch();
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum OrderError { NoItems, CannotCancel, AlreadySettled }
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoItems => write!(f, "No items"),
            Self::CannotCancel => write!(f, "Cannot cancel"),
            Self::AlreadySettled => write!(f, "Already settled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::product::Product;
    use crate::domain::value_objects::Sku;
    use rust_decimal::Decimal;

    fn line(product_id: &str, quantity: u32, unit_fen: i64) -> LineItem {
        let unit_price = Money::from_minor_units(unit_fen, "CNY");
        let total = unit_price.multiply(quantity);
        LineItem { id: "1".into(), product_id: product_id.into(), name: "Widget".into(), sku: "W001".into(), quantity, unit_price, total }
    }

    #[test]
    fn test_order_workflow() {
        let mut order = Order::create("20180106143917001", "CUST001", "CNY");
        order.add_item(line("P1", 2, 1000));
        order.confirm().unwrap();
        assert_eq!(order.status(), &OrderStatus::Confirmed);
        assert_eq!(order.total().gateway_amount(), "20.00");
        order.settle("2018010621001004460200258539", "TRADE_SUCCESS").unwrap();
        assert_eq!(order.status(), &OrderStatus::Processing);
        order.ship();
        assert_eq!(order.status(), &OrderStatus::Shipped);
        order.deliver();
        assert_eq!(order.status(), &OrderStatus::Delivered);
    }

    #[test]
    fn test_settlement_is_idempotent() {
        let mut order = Order::create("201702021131156", "CUST001", "CNY");
        order.add_item(line("P1", 3, 500));
        order.confirm().unwrap();

        let mut product = Product::create(Sku::new("P1").unwrap(), "Widget", Money::cny(Decimal::new(5, 0)));

        let sold = order.settle("TRADE-1", "TRADE_SUCCESS").unwrap();
        for s in &sold { product.record_sale(s.quantity); }
        assert_eq!(product.sold().value(), 3);
        assert_eq!(order.trade_no(), Some("TRADE-1"));
        assert!(order.paid_at().is_some());

        // gateway retry: the second transition is refused, sold count untouched
        assert_eq!(order.settle("TRADE-1", "TRADE_SUCCESS"), Err(OrderError::AlreadySettled));
        assert_eq!(product.sold().value(), 3);
    }

    #[test]
    fn test_paid_order_cannot_cancel() {
        let mut order = Order::create("SN1", "CUST001", "CNY");
        order.add_item(line("P1", 1, 100));
        order.settle("T1", "TRADE_SUCCESS").unwrap();
        assert_eq!(order.cancel(), Err(OrderError::CannotCancel));
    }

    #[test]
    fn test_empty_order_cannot_confirm() {
        let mut order = Order::create("SN2", "CUST001", "CNY");
        assert_eq!(order.confirm(), Err(OrderError::NoItems));
    }
}
