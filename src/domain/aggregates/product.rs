//! Product Aggregate

use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::domain::value_objects::{Sku, Money, Quantity};
use crate::domain::events::{DomainEvent, ProductEvent};

#[derive(Clone, Debug)]
pub struct Product {
    id: String,
    sku: Sku,
    name: String,
    description: String,
    price: Money,
    inventory: Quantity,
    sold: Quantity,
    status: ProductStatus,
    categories: Vec<String>,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)] pub enum ProductStatus { #[default] Draft, Active, Archived }

impl Product {
    pub fn create(sku: Sku, name: impl Into<String>, price: Money) -> Self {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut product = Self {
            id: id.clone(), sku: sku.clone(), name: name.into(), description: String::new(),
            price, inventory: Quantity::default(), sold: Quantity::default(),
            status: ProductStatus::Draft, categories: vec![], tags: vec![],
            created_at: now, updated_at: now, events: vec![],
        };
        product.raise_event(DomainEvent::Product(ProductEvent::Created { product_id: id, sku }));
        product
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn sku(&self) -> &Sku { &self.sku }
    pub fn name(&self) -> &str { &self.name }
    pub fn price(&self) -> &Money { &self.price }
    pub fn inventory(&self) -> &Quantity { &self.inventory }
    pub fn sold(&self) -> &Quantity { &self.sold }
    pub fn status(&self) -> &ProductStatus { &self.status }
    pub fn is_in_stock(&self) -> bool { !self.inventory.is_zero() }

    pub fn publish(&mut self) -> Result<(), ProductError> {
        if self.name.is_empty() { return Err(ProductError::MissingName); }
        self.status = ProductStatus::Active;
        self.touch();
        self.raise_event(DomainEvent::Product(ProductEvent::Published { product_id: self.id.clone() }));
        Ok(())
    }

    pub fn archive(&mut self) { self.status = ProductStatus::Archived; self.touch(); }

    pub fn update_price(&mut self, new_price: Money) {
        self.price = new_price;
        self.touch();
    }

    pub fn add_inventory(&mut self, qty: u32) {
        self.inventory = self.inventory.add(qty);
        self.touch();
        self.raise_event(DomainEvent::Product(ProductEvent::InventoryAdded { product_id: self.id.clone(), quantity: qty }));
    }

    pub fn remove_inventory(&mut self, qty: u32) -> Result<(), ProductError> {
        self.inventory = self.inventory.subtract(qty).ok_or(ProductError::InsufficientInventory)?;
        self.touch();
        self.raise_event(DomainEvent::Product(ProductEvent::InventoryRemoved { product_id: self.id.clone(), quantity: qty }));
        Ok(())
    }

    /// Settlement applies this once per order line.
    pub fn record_sale(&mut self, qty: u32) {
        self.sold = self.sold.add(qty);
        self.touch();
        self.raise_event(DomainEvent::Product(ProductEvent::Sold { product_id: self.id.clone(), quantity: qty }));
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone)] pub enum ProductError { MissingName, InsufficientInventory }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self { Self::MissingName => write!(f, "Missing name"), Self::InsufficientInventory => write!(f, "Insufficient inventory") }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    #[test]
    fn test_product_create() {
        let p = Product::create(Sku::new("TEST-001").unwrap(), "Test Product", Money::cny(Decimal::new(1999, 2)));
        assert_eq!(p.name(), "Test Product");
    }
    #[test]
    fn test_inventory() {
        let mut p = Product::create(Sku::new("TEST").unwrap(), "P", Money::cny(Decimal::new(10, 0)));
        p.add_inventory(10);
        assert!(p.is_in_stock());
        p.remove_inventory(5).unwrap();
        assert_eq!(p.inventory().value(), 5);
    }
    #[test]
    fn test_price_update_and_archive() {
        let mut p = Product::create(Sku::new("TEST").unwrap(), "P", Money::cny(Decimal::new(10, 0)));
        p.publish().unwrap();
        assert_eq!(p.status(), &ProductStatus::Active);
        p.update_price(Money::cny(Decimal::new(12, 0)));
        assert_eq!(p.price().gateway_amount(), "12.00");
        p.archive();
        assert_eq!(p.status(), &ProductStatus::Archived);
    }

    #[test]
    fn test_record_sale_accumulates() {
        let mut p = Product::create(Sku::new("TEST").unwrap(), "P", Money::cny(Decimal::new(10, 0)));
        p.record_sale(2);
        p.record_sale(3);
        assert_eq!(p.sold().value(), 5);
    }
}
