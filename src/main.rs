//! Commerce Cart - cart and discount engine service

use anyhow::Result;
use axum::{extract::{Path, State}, http::StatusCode, routing::{get, post, put}, Json, Router};
use chrono::Utc;
use commerce_cart::catalog::{PgCatalog, PgDiscounts};
use commerce_cart::repo::PgCartStore;
use commerce_cart::{Cart, CartError, CartKey, CartService};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState { pub carts: Arc<CartService> }

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let db = PgPoolOptions::new().max_connections(10).connect(&std::env::var("DATABASE_URL")?).await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let carts = Arc::new(CartService::new(
        Arc::new(PgCartStore::new(db.clone())),
        Arc::new(PgCatalog::new(db.clone())),
        Arc::new(PgDiscounts::new(db)),
    ));
    let state = AppState { carts };

    let app = Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "commerce-cart"})) }))
        .route("/api/v1/carts", post(resolve_cart))
        .route("/api/v1/carts/:id", get(get_cart))
        .route("/api/v1/carts/:id/items", post(add_item).delete(clear_cart))
        .route("/api/v1/carts/:id/items/:item_id", put(update_item).delete(remove_item))
        .route("/api/v1/carts/:id/discount", post(apply_discount).delete(remove_discount))
        .route("/api/v1/carts/:id/email", put(set_email))
        .route("/api/v1/carts/merge", post(merge_carts))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8084".to_string());
    tracing::info!("commerce-cart listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?, app).await?;
    Ok(())
}

type ApiError = (StatusCode, String);

fn api_error(e: CartError) -> ApiError {
    let status = match &e {
        CartError::CartNotFound | CartError::ItemNotFound | CartError::ProductNotFound => StatusCode::NOT_FOUND,
        CartError::CartNotActive | CartError::InvalidQuantity | CartError::InvalidEmail | CartError::Discount(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CartError::ConcurrencyConflict => StatusCode::CONFLICT,
        CartError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

#[derive(Debug, Deserialize)] pub struct ResolveCartRequest { pub cart_id: Option<Uuid>, pub user_id: Option<Uuid>, pub session_id: Option<String> }

async fn resolve_cart(State(s): State<AppState>, Json(r): Json<ResolveCartRequest>) -> Result<Json<Cart>, ApiError> {
    let key = CartKey { cart_id: r.cart_id, user_id: r.user_id, session_id: r.session_id };
    s.carts.get_or_create(&key).await.map(Json).map_err(api_error)
}

async fn get_cart(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Cart>, ApiError> {
    s.carts.get(id).await.map(Json).map_err(api_error)
}

#[derive(Debug, Deserialize)] pub struct AddItemRequest { pub product_id: Uuid, pub variant_id: Option<Uuid>, pub quantity: i32 }

async fn add_item(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<AddItemRequest>) -> Result<Json<Cart>, ApiError> {
    s.carts.add_item(id, r.product_id, r.variant_id, r.quantity).await.map(Json).map_err(api_error)
}

#[derive(Debug, Deserialize)] pub struct UpdateItemRequest { pub quantity: i32 }

async fn update_item(State(s): State<AppState>, Path((id, item_id)): Path<(Uuid, Uuid)>, Json(r): Json<UpdateItemRequest>) -> Result<Json<Cart>, ApiError> {
    s.carts.update_item_quantity(id, item_id, r.quantity).await.map(Json).map_err(api_error)
}

async fn remove_item(State(s): State<AppState>, Path((id, item_id)): Path<(Uuid, Uuid)>) -> Result<Json<Cart>, ApiError> {
    s.carts.remove_item(id, item_id).await.map(Json).map_err(api_error)
}

async fn clear_cart(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Cart>, ApiError> {
    s.carts.clear(id).await.map(Json).map_err(api_error)
}

#[derive(Debug, Deserialize)] pub struct ApplyDiscountRequest { pub code: String }

async fn apply_discount(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ApplyDiscountRequest>) -> Result<Json<Cart>, ApiError> {
    s.carts.apply_discount(id, &r.code, Utc::now()).await.map(Json).map_err(api_error)
}

async fn remove_discount(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Cart>, ApiError> {
    s.carts.remove_discount(id).await.map(Json).map_err(api_error)
}

#[derive(Debug, Deserialize)] pub struct SetEmailRequest { pub email: String }

async fn set_email(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<SetEmailRequest>) -> Result<Json<Cart>, ApiError> {
    s.carts.set_email(id, &r.email).await.map(Json).map_err(api_error)
}

#[derive(Debug, Deserialize)] pub struct MergeRequest { pub session_id: String, pub user_id: Uuid }

async fn merge_carts(State(s): State<AppState>, Json(r): Json<MergeRequest>) -> Result<Json<Cart>, ApiError> {
    s.carts.merge_or_create(&r.session_id, r.user_id).await.map(Json).map_err(api_error)
}
