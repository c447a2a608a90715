//! FreshMall - Self-hosted Storefront Backend
//!
//! ## Features
//! - Product catalog with categories, pagination and search
//! - Session shopping cart and checkout
//! - SMS-verified user registration, favorites, shipping addresses
//! - RSA2 payment-gateway signing and callback verification
//! - Idempotent order settlement with sold-count tracking

pub mod api;
pub mod domain;
pub mod payment;
pub mod settings;
pub mod sms;

pub use payment::{GatewayClient, GatewayConfig, PaymentError};
pub use settings::Settings;
