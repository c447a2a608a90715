//! HTTP API surface: catalog, cart, orders, users and the two
//! payment-callback delivery paths.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{delete, get, post};
use axum::{Form, Json, Router};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::cart::{Cart, CartItem as DomainCartItem};
use crate::domain::aggregates::order::Order as OrderAggregate;
use crate::domain::aggregates::product::Product as ProductAggregate;
use crate::domain::value_objects::{Money, Sku};
use crate::payment::GatewayClient;
use crate::sms::SmsClient;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub nats: Option<async_nats::Client>,
    pub gateway: Arc<GatewayClient>,
    pub sms: Option<SmsClient>,
    pub frontend_url: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "freshmall"})) }))
        .route("/api/v1/products", get(list_products).post(create_product))
        .route("/api/v1/products/:id", get(get_product).put(update_product).delete(delete_product))
        .route("/api/v1/categories", get(list_categories).post(create_category))
        .route("/api/v1/categories/:id", get(get_category))
        .route("/api/v1/cart/:session", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route("/api/v1/orders", get(list_orders).post(create_order))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/pay", post(pay_order))
        .route("/api/v1/payments/return", get(payment_return))
        .route("/api/v1/payments/notify", post(payment_notify))
        .route("/api/v1/users/code", post(send_sms_code))
        .route("/api/v1/users/register", post(register_user))
        .route("/api/v1/users/:id/favorites", get(list_favorites).post(add_favorite))
        .route("/api/v1/users/:id/favorites/:product_id", delete(remove_favorite))
        .route("/api/v1/users/:id/addresses", get(list_addresses).post(create_address))
        .route("/api/v1/users/:id/addresses/:address_id", delete(delete_address))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError { (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()) }
fn unprocessable(e: validator::ValidationErrors) -> ApiError { (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()) }
fn not_found() -> ApiError { (StatusCode::NOT_FOUND, "Not found".to_string()) }

// widen before multiplying so a huge page number cannot overflow u32
fn page_offset(page: u32, per_page: u32) -> i64 { (page as i64 - 1) * per_page as i64 }

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid, pub sku: String, pub name: String, pub description: Option<String>,
    pub price: i64, pub currency: String, pub category_id: Option<Uuid>,
    pub inventory_quantity: i32, pub sold_count: i32, pub status: String,
    pub images: Vec<String>, pub tags: Vec<String>,
    pub created_at: DateTime<Utc>, pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category { pub id: Uuid, pub name: String, pub slug: String, pub description: Option<String>, pub parent_id: Option<Uuid>, pub created_at: DateTime<Utc> }

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid, pub order_sn: String, pub user_id: Uuid,
    pub status: String, pub payment_status: String,
    pub subtotal: i64, pub shipping: i64, pub total: i64, pub currency: String,
    pub trade_no: Option<String>, pub trade_status: Option<String>,
    pub address: String, pub signer_name: String, pub signer_mobile: String, pub post_script: Option<String>,
    pub paid_at: Option<DateTime<Utc>>, pub created_at: DateTime<Utc>, pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem { pub id: Uuid, pub order_id: Uuid, pub product_id: Uuid, pub name: String, pub sku: String, pub quantity: i32, pub unit_price: i64, pub total: i64 }

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CartItem { pub id: Uuid, pub session_id: String, pub product_id: Uuid, pub quantity: i32, pub created_at: DateTime<Utc> }

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User { pub id: Uuid, pub mobile: String, pub username: String, pub created_at: DateTime<Utc> }

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Favorite { pub id: Uuid, pub user_id: Uuid, pub product_id: Uuid, pub created_at: DateTime<Utc> }

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Address {
    pub id: Uuid, pub user_id: Uuid, pub province: String, pub city: String, pub district: String,
    pub address: String, pub signer_name: String, pub signer_mobile: String, pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)] pub struct ListParams { pub page: Option<u32>, pub per_page: Option<u32>, pub category: Option<Uuid>, pub search: Option<String>, pub user_id: Option<Uuid> }
#[derive(Debug, Serialize)] pub struct PaginatedResponse<T> { pub data: Vec<T>, pub total: i64, pub page: u32 }

// =============================================================================
// Catalog
// =============================================================================

async fn list_products(State(s): State<AppState>, Query(p): Query<ListParams>) -> Result<Json<PaginatedResponse<Product>>, ApiError> {
    let page = p.page.unwrap_or(1).max(1); let per_page = p.per_page.unwrap_or(20).min(100);
    let search = p.search.map(|t| format!("%{t}%"));
    let products = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE status = 'active' AND ($1::uuid IS NULL OR category_id = $1) AND ($2::text IS NULL OR name ILIKE $2) ORDER BY created_at DESC LIMIT $3 OFFSET $4")
        .bind(p.category).bind(search.clone()).bind(per_page as i64).bind(page_offset(page, per_page))
        .fetch_all(&s.db).await.map_err(internal)?;
    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products WHERE status = 'active' AND ($1::uuid IS NULL OR category_id = $1) AND ($2::text IS NULL OR name ILIKE $2)")
        .bind(p.category).bind(search).fetch_one(&s.db).await.map_err(internal)?;
    Ok(Json(PaginatedResponse { data: products, total: total.0, page }))
}

async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Product>, ApiError> {
    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1").bind(id).fetch_optional(&s.db).await.map_err(internal)?.map(Json).ok_or_else(not_found)
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1))] pub name: String,
    pub description: Option<String>,
    #[validate(range(min = 1))] pub price: i64,
    pub category_id: Option<Uuid>,
    pub inventory_quantity: Option<i32>,
}

async fn create_product(State(s): State<AppState>, Json(r): Json<CreateProductRequest>) -> Result<(StatusCode, Json<Product>), ApiError> {
    r.validate().map_err(unprocessable)?;
    let sku = Sku::new(format!("SKU-{:08}", rand::random::<u32>())).map_err(internal)?;
    let mut product = ProductAggregate::create(sku, &r.name, Money::from_minor_units(r.price, "CNY"));
    product.add_inventory(r.inventory_quantity.unwrap_or(0).max(0) as u32);
    product.publish().map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let row = sqlx::query_as::<_, Product>("INSERT INTO products (id, sku, name, description, price, currency, category_id, inventory_quantity, sold_count, status, images, tags, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, 'CNY', $6, $7, 0, 'active', '{}', '{}', NOW(), NOW()) RETURNING *")
        .bind(Uuid::now_v7()).bind(product.sku().as_str()).bind(product.name()).bind(&r.description).bind(product.price().minor_units()).bind(r.category_id).bind(product.inventory().value() as i32)
        .fetch_one(&s.db).await.map_err(internal)?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn update_product(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<CreateProductRequest>) -> Result<Json<Product>, ApiError> {
    r.validate().map_err(unprocessable)?;
    let row = sqlx::query_as::<_, Product>("UPDATE products SET name = $2, description = $3, price = $4, category_id = $5, inventory_quantity = $6, updated_at = NOW() WHERE id = $1 RETURNING *")
        .bind(id).bind(&r.name).bind(&r.description).bind(r.price).bind(r.category_id).bind(r.inventory_quantity.unwrap_or(0))
        .fetch_optional(&s.db).await.map_err(internal)?.ok_or_else(not_found)?;
    Ok(Json(row))
}

async fn delete_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    sqlx::query("UPDATE products SET status = 'deleted', updated_at = NOW() WHERE id = $1").bind(id).execute(&s.db).await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_categories(State(s): State<AppState>) -> Result<Json<Vec<Category>>, ApiError> {
    let cats = sqlx::query_as::<_, Category>("SELECT * FROM categories ORDER BY name").fetch_all(&s.db).await.map_err(internal)?;
    Ok(Json(cats))
}

async fn get_category(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Category>, ApiError> {
    sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = $1").bind(id).fetch_optional(&s.db).await.map_err(internal)?.map(Json).ok_or_else(not_found)
}

#[derive(Debug, Deserialize)] pub struct CreateCategoryRequest { pub name: String, pub description: Option<String>, pub parent_id: Option<Uuid> }

async fn create_category(State(s): State<AppState>, Json(r): Json<CreateCategoryRequest>) -> Result<(StatusCode, Json<Category>), ApiError> {
    let slug = r.name.to_lowercase().replace(' ', "-");
    let c = sqlx::query_as::<_, Category>("INSERT INTO categories (id, name, slug, description, parent_id, created_at) VALUES ($1, $2, $3, $4, $5, NOW()) RETURNING *")
        .bind(Uuid::now_v7()).bind(&r.name).bind(&slug).bind(&r.description).bind(r.parent_id)
        .fetch_one(&s.db).await.map_err(internal)?;
    Ok((StatusCode::CREATED, Json(c)))
}

// =============================================================================
// Cart
// =============================================================================

async fn get_cart(State(s): State<AppState>, Path(session): Path<String>) -> Result<Json<Vec<CartItem>>, ApiError> {
    let items = sqlx::query_as::<_, CartItem>("SELECT * FROM cart_items WHERE session_id = $1").bind(&session).fetch_all(&s.db).await.map_err(internal)?;
    Ok(Json(items))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddToCartRequest { pub product_id: Uuid, #[validate(range(min = 1))] pub quantity: i32 }

async fn add_to_cart(State(s): State<AppState>, Path(session): Path<String>, Json(r): Json<AddToCartRequest>) -> Result<(StatusCode, Json<CartItem>), ApiError> {
    r.validate().map_err(unprocessable)?;
    let item = sqlx::query_as::<_, CartItem>("INSERT INTO cart_items (id, session_id, product_id, quantity, created_at) VALUES ($1, $2, $3, $4, NOW()) ON CONFLICT (session_id, product_id) DO UPDATE SET quantity = cart_items.quantity + $4 RETURNING *")
        .bind(Uuid::now_v7()).bind(&session).bind(r.product_id).bind(r.quantity)
        .fetch_one(&s.db).await.map_err(internal)?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn clear_cart(State(s): State<AppState>, Path(session): Path<String>) -> Result<StatusCode, ApiError> {
    sqlx::query("DELETE FROM cart_items WHERE session_id = $1").bind(&session).execute(&s.db).await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Orders
// =============================================================================

async fn list_orders(State(s): State<AppState>, Query(p): Query<ListParams>) -> Result<Json<PaginatedResponse<Order>>, ApiError> {
    let page = p.page.unwrap_or(1).max(1); let per_page = p.per_page.unwrap_or(20).min(100);
    let orders = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE ($1::uuid IS NULL OR user_id = $1) ORDER BY created_at DESC LIMIT $2 OFFSET $3")
        .bind(p.user_id).bind(per_page as i64).bind(page_offset(page, per_page)).fetch_all(&s.db).await.map_err(internal)?;
    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE ($1::uuid IS NULL OR user_id = $1)").bind(p.user_id).fetch_one(&s.db).await.map_err(internal)?;
    Ok(Json(PaginatedResponse { data: orders, total: total.0, page }))
}

#[derive(Debug, Serialize)] pub struct OrderDetail { pub order: Order, pub items: Vec<OrderItem> }

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<OrderDetail>, ApiError> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(&s.db).await.map_err(internal)?.ok_or_else(not_found)?;
    let items = sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items WHERE order_id = $1").bind(id).fetch_all(&s.db).await.map_err(internal)?;
    Ok(Json(OrderDetail { order, items }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub user_id: Uuid,
    pub session_id: String,
    #[validate(length(min = 1))] pub address: String,
    #[validate(length(min = 1))] pub signer_name: String,
    #[validate(length(equal = 11))] pub signer_mobile: String,
    pub post_script: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct CheckoutLine { product_id: Uuid, quantity: i32, name: String, sku: String, price: i64, currency: String }

async fn create_order(State(s): State<AppState>, Json(r): Json<CreateOrderRequest>) -> Result<(StatusCode, Json<Order>), ApiError> {
    r.validate().map_err(unprocessable)?;
    let lines = sqlx::query_as::<_, CheckoutLine>("SELECT ci.product_id, ci.quantity, p.name, p.sku, p.price, p.currency FROM cart_items ci JOIN products p ON p.id = ci.product_id WHERE ci.session_id = $1")
        .bind(&r.session_id).fetch_all(&s.db).await.map_err(internal)?;

    // totals and the empty-cart check go through the domain aggregate
    let mut cart = Cart::for_session(&r.session_id, "CNY");
    for line in &lines {
        cart.add_item(DomainCartItem {
            product_id: line.product_id.to_string(), name: line.name.clone(), sku: line.sku.clone(),
            quantity: line.quantity.max(0) as u32, unit_price: Money::from_minor_units(line.price, &line.currency),
        });
    }
    let order_sn = format!("{}{:06}", Utc::now().format("%Y%m%d%H%M%S"), rand::thread_rng().gen_range(0..1_000_000));
    let mut order = OrderAggregate::from_cart(&order_sn, r.user_id.to_string(), &cart);
    order.confirm().map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let mut tx = s.db.begin().await.map_err(internal)?;
    let row = sqlx::query_as::<_, Order>("INSERT INTO orders (id, order_sn, user_id, status, payment_status, subtotal, shipping, total, currency, address, signer_name, signer_mobile, post_script, created_at, updated_at) VALUES ($1, $2, $3, 'pending', 'pending', $4, 0, $5, 'CNY', $6, $7, $8, $9, NOW(), NOW()) RETURNING *")
        .bind(Uuid::now_v7()).bind(&order_sn).bind(r.user_id).bind(order.total().minor_units()).bind(order.total().minor_units())
        .bind(&r.address).bind(&r.signer_name).bind(&r.signer_mobile).bind(&r.post_script)
        .fetch_one(&mut *tx).await.map_err(internal)?;
    for line in &lines {
        let taken = sqlx::query("UPDATE products SET inventory_quantity = inventory_quantity - $2, updated_at = NOW() WHERE id = $1 AND inventory_quantity >= $2")
            .bind(line.product_id).bind(line.quantity).execute(&mut *tx).await.map_err(internal)?;
        if taken.rows_affected() == 0 {
            return Err((StatusCode::CONFLICT, format!("Insufficient inventory for {}", line.sku)));
        }
        sqlx::query("INSERT INTO order_items (id, order_id, product_id, name, sku, quantity, unit_price, total) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)")
            .bind(Uuid::now_v7()).bind(row.id).bind(line.product_id).bind(&line.name).bind(&line.sku).bind(line.quantity).bind(line.price).bind(line.price * line.quantity as i64)
            .execute(&mut *tx).await.map_err(internal)?;
    }
    sqlx::query("DELETE FROM cart_items WHERE session_id = $1").bind(&r.session_id).execute(&mut *tx).await.map_err(internal)?;
    tx.commit().await.map_err(internal)?;
    Ok((StatusCode::CREATED, Json(row)))
}

// =============================================================================
// Payment
// =============================================================================

async fn pay_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<serde_json::Value>, ApiError> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(&s.db).await.map_err(internal)?.ok_or_else(not_found)?;
    if order.payment_status == "paid" {
        return Err((StatusCode::CONFLICT, "Order already settled".to_string()));
    }
    let amount = Money::from_minor_units(order.total, &order.currency);
    let subject = format!("FreshMall order {}", order.order_sn);
    let pay_url = s.gateway.page_pay(&subject, &order.order_sn, amount.amount(), Map::new()).map_err(internal)?;
    sqlx::query("UPDATE orders SET status = 'awaiting_payment', updated_at = NOW() WHERE id = $1 AND status = 'pending'")
        .bind(id).execute(&s.db).await.map_err(internal)?;
    Ok(Json(serde_json::json!({ "order_sn": order.order_sn, "pay_url": pay_url })))
}

/// Synchronous delivery path: the gateway redirects the user's browser
/// here with the callback in the query string. Same verification and
/// settlement as the asynchronous path, then back to the storefront.
async fn payment_return(State(s): State<AppState>, Query(params): Query<HashMap<String, String>>) -> Result<Redirect, ApiError> {
    settle_verified_callback(&s, params).await?;
    Ok(Redirect::to(&s.frontend_url))
}

/// Asynchronous delivery path: server-to-server form post. The gateway
/// retries until it reads the literal body `success`.
async fn payment_notify(State(s): State<AppState>, Form(params): Form<HashMap<String, String>>) -> Result<Response, ApiError> {
    if settle_verified_callback(&s, params).await? {
        Ok("success".into_response())
    } else {
        Ok((StatusCode::BAD_REQUEST, "failure").into_response())
    }
}

/// The single verified-callback routine both delivery paths share:
/// verify the detached signature, then settle at most once via a
/// compare-and-set keyed on the order number. Duplicate delivery is not
/// an error; it just finds nothing left to settle.
async fn settle_verified_callback(state: &AppState, params: HashMap<String, String>) -> Result<bool, ApiError> {
    let order_sn = params.get("out_trade_no").cloned();
    let trade_no = params.get("trade_no").cloned();
    let trade_status = params.get("trade_status").cloned().unwrap_or_else(|| "TRADE_SUCCESS".to_string());

    if !state.gateway.verify_callback(params) {
        tracing::warn!(order_sn = order_sn.as_deref().unwrap_or("?"), "rejected gateway callback with bad signature");
        return Ok(false);
    }
    let (Some(order_sn), Some(trade_no)) = (order_sn, trade_no) else {
        tracing::warn!("verified gateway callback missing trade identifiers");
        return Ok(false);
    };

    let mut tx = state.db.begin().await.map_err(internal)?;
    let settled = sqlx::query_as::<_, (Uuid,)>("UPDATE orders SET payment_status = 'paid', status = 'processing', trade_no = $2, trade_status = $3, paid_at = NOW(), updated_at = NOW() WHERE order_sn = $1 AND payment_status <> 'paid' RETURNING id")
        .bind(&order_sn).bind(&trade_no).bind(&trade_status)
        .fetch_optional(&mut *tx).await.map_err(internal)?;
    match settled {
        None => {
            tracing::info!(%order_sn, "duplicate or unknown gateway callback, settlement skipped");
            tx.rollback().await.map_err(internal)?;
        }
        Some((order_id,)) => {
            sqlx::query("UPDATE products SET sold_count = products.sold_count + oi.quantity, updated_at = NOW() FROM order_items oi WHERE oi.order_id = $1 AND oi.product_id = products.id")
                .bind(order_id).execute(&mut *tx).await.map_err(internal)?;
            tx.commit().await.map_err(internal)?;
            tracing::info!(%order_sn, %trade_no, "order settled");
            if let Some(nats) = &state.nats {
                let event = serde_json::json!({ "order_sn": order_sn, "trade_no": trade_no, "trade_status": trade_status });
                if let Err(e) = nats.publish("orders.paid".to_string(), event.to_string().into()).await {
                    tracing::warn!(error = %e, "failed to publish orders.paid event");
                }
            }
        }
    }
    Ok(true)
}

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct SendCodeRequest { #[validate(length(equal = 11))] pub mobile: String }

async fn send_sms_code(State(s): State<AppState>, Json(r): Json<SendCodeRequest>) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    r.validate().map_err(unprocessable)?;
    let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
    sqlx::query("INSERT INTO sms_codes (id, mobile, code, created_at) VALUES ($1, $2, $3, NOW())")
        .bind(Uuid::now_v7()).bind(&r.mobile).bind(&code).execute(&s.db).await.map_err(internal)?;
    match &s.sms {
        Some(client) => match client.send_code(&r.mobile, &code).await {
            Ok(result) if result.is_ok() => {}
            Ok(result) => {
                tracing::warn!(code = result.code, msg = %result.msg, "sms provider rejected send");
                return Err((StatusCode::BAD_GATEWAY, result.msg));
            }
            Err(e) => {
                tracing::warn!(error = %e, "sms provider unreachable");
                return Err((StatusCode::BAD_GATEWAY, e.to_string()));
            }
        },
        // development mode: no provider key, the code only hits the log
        None => tracing::info!(mobile = %r.mobile, %code, "sms client not configured, code logged only"),
    }
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "mobile": r.mobile }))))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(equal = 11))] pub mobile: String,
    #[validate(length(equal = 6))] pub code: String,
    pub username: Option<String>,
}

async fn register_user(State(s): State<AppState>, Json(r): Json<RegisterRequest>) -> Result<(StatusCode, Json<User>), ApiError> {
    r.validate().map_err(unprocessable)?;
    let issued: Option<(String,)> = sqlx::query_as("SELECT code FROM sms_codes WHERE mobile = $1 AND created_at > NOW() - INTERVAL '10 minutes' ORDER BY created_at DESC LIMIT 1")
        .bind(&r.mobile).fetch_optional(&s.db).await.map_err(internal)?;
    match issued {
        Some((code,)) if code == r.code => {}
        _ => return Err((StatusCode::BAD_REQUEST, "Invalid or expired verification code".to_string())),
    }
    let username = r.username.clone().unwrap_or_else(|| r.mobile.clone());
    let user = sqlx::query_as::<_, User>("INSERT INTO users (id, mobile, username, created_at) VALUES ($1, $2, $3, NOW()) ON CONFLICT (mobile) DO NOTHING RETURNING *")
        .bind(Uuid::now_v7()).bind(&r.mobile).bind(&username)
        .fetch_optional(&s.db).await.map_err(internal)?
        .ok_or((StatusCode::CONFLICT, "Mobile already registered".to_string()))?;
    Ok((StatusCode::CREATED, Json(user)))
}

// =============================================================================
// Favorites and addresses
// =============================================================================

async fn list_favorites(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> Result<Json<Vec<Favorite>>, ApiError> {
    let favs = sqlx::query_as::<_, Favorite>("SELECT * FROM favorites WHERE user_id = $1 ORDER BY created_at DESC").bind(user_id).fetch_all(&s.db).await.map_err(internal)?;
    Ok(Json(favs))
}

#[derive(Debug, Deserialize)] pub struct AddFavoriteRequest { pub product_id: Uuid }

async fn add_favorite(State(s): State<AppState>, Path(user_id): Path<Uuid>, Json(r): Json<AddFavoriteRequest>) -> Result<(StatusCode, Json<Favorite>), ApiError> {
    let fav = sqlx::query_as::<_, Favorite>("INSERT INTO favorites (id, user_id, product_id, created_at) VALUES ($1, $2, $3, NOW()) ON CONFLICT (user_id, product_id) DO NOTHING RETURNING *")
        .bind(Uuid::now_v7()).bind(user_id).bind(r.product_id)
        .fetch_optional(&s.db).await.map_err(internal)?
        .ok_or((StatusCode::CONFLICT, "Already favorited".to_string()))?;
    Ok((StatusCode::CREATED, Json(fav)))
}

async fn remove_favorite(State(s): State<AppState>, Path((user_id, product_id)): Path<(Uuid, Uuid)>) -> Result<StatusCode, ApiError> {
    let res = sqlx::query("DELETE FROM favorites WHERE user_id = $1 AND product_id = $2").bind(user_id).bind(product_id).execute(&s.db).await.map_err(internal)?;
    if res.rows_affected() == 0 { return Err(not_found()); }
    Ok(StatusCode::NO_CONTENT)
}

async fn list_addresses(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> Result<Json<Vec<Address>>, ApiError> {
    let rows = sqlx::query_as::<_, Address>("SELECT * FROM addresses WHERE user_id = $1 ORDER BY created_at DESC").bind(user_id).fetch_all(&s.db).await.map_err(internal)?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAddressRequest {
    #[validate(length(min = 1))] pub province: String,
    #[validate(length(min = 1))] pub city: String,
    #[validate(length(min = 1))] pub district: String,
    #[validate(length(min = 1))] pub address: String,
    #[validate(length(min = 1))] pub signer_name: String,
    #[validate(length(equal = 11))] pub signer_mobile: String,
}

async fn create_address(State(s): State<AppState>, Path(user_id): Path<Uuid>, Json(r): Json<CreateAddressRequest>) -> Result<(StatusCode, Json<Address>), ApiError> {
    r.validate().map_err(unprocessable)?;
    let row = sqlx::query_as::<_, Address>("INSERT INTO addresses (id, user_id, province, city, district, address, signer_name, signer_mobile, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW()) RETURNING *")
        .bind(Uuid::now_v7()).bind(user_id).bind(&r.province).bind(&r.city).bind(&r.district).bind(&r.address).bind(&r.signer_name).bind(&r.signer_mobile)
        .fetch_one(&s.db).await.map_err(internal)?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn delete_address(State(s): State<AppState>, Path((user_id, address_id)): Path<(Uuid, Uuid)>) -> Result<StatusCode, ApiError> {
    let res = sqlx::query("DELETE FROM addresses WHERE user_id = $1 AND id = $2").bind(user_id).bind(address_id).execute(&s.db).await.map_err(internal)?;
    if res.rows_affected() == 0 { return Err(not_found()); }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offset_does_not_overflow() {
        assert_eq!(page_offset(1, 20), 0);
        assert_eq!(page_offset(3, 20), 40);
        assert_eq!(page_offset(u32::MAX, 100), (u32::MAX as i64 - 1) * 100);
    }
}
