//! Checkout, payment callback, and order history endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use checkout::{CheckoutFlow, PaymentGateway};
use commerce_store::{CommerceStore, Order, PaymentSession};
use common::{ProductId, SessionId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: CommerceStore, G: PaymentGateway> {
    pub flow: CheckoutFlow<S, G>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct BeginCartRequest {
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct BeginProductRequest {
    pub user_id: String,
    pub quantity: u32,
}

/// Query parameters the payment provider appends to the success callback.
#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    #[serde(rename = "paymentId")]
    pub payment_id: String,
    #[serde(rename = "PayerID")]
    pub payer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelQuery {
    #[serde(rename = "paymentId")]
    pub payment_id: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct CheckoutStartedResponse {
    pub session_id: String,
    /// Provider page the payer must approve the payment on.
    pub redirect_url: String,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub product_id: String,
    pub quantity: u32,
    pub total_cents: i64,
    pub payment_ref: String,
    pub payer_ref: String,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct ReceiptResponse {
    pub session_id: String,
    pub status: &'static str,
    pub orders: Vec<OrderResponse>,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub session_id: String,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct SessionLineResponse {
    pub product_id: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub state: String,
    pub lines: Vec<SessionLineResponse>,
    pub total_cents: i64,
    pub provider_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: String,
}

// -- Handlers --

/// POST /checkout/cart — start a checkout over the user's cart.
#[tracing::instrument(skip(state, req))]
pub async fn begin_cart<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Json(req): Json<BeginCartRequest>,
) -> Result<(StatusCode, Json<CheckoutStartedResponse>), ApiError>
where
    S: CommerceStore + 'static,
    G: PaymentGateway + 'static,
{
    let user_id = parse_user_id(&req.user_id)?;
    let redirect = state.flow.begin_cart_checkout(user_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutStartedResponse {
            session_id: redirect.session_id.to_string(),
            redirect_url: redirect.redirect_url,
        }),
    ))
}

/// POST /checkout/product/:id — start a direct purchase of one product.
#[tracing::instrument(skip(state, req))]
pub async fn begin_product<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path(id): Path<String>,
    Json(req): Json<BeginProductRequest>,
) -> Result<(StatusCode, Json<CheckoutStartedResponse>), ApiError>
where
    S: CommerceStore + 'static,
    G: PaymentGateway + 'static,
{
    let user_id = parse_user_id(&req.user_id)?;
    let product_id = parse_product_id(&id)?;
    let redirect = state
        .flow
        .begin_product_checkout(user_id, product_id, req.quantity)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutStartedResponse {
            session_id: redirect.session_id.to_string(),
            redirect_url: redirect.redirect_url,
        }),
    ))
}

/// GET /checkout/confirm — the provider's approval callback.
#[tracing::instrument(skip(state))]
pub async fn confirm<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Query(query): Query<ConfirmQuery>,
) -> Result<Json<ReceiptResponse>, ApiError>
where
    S: CommerceStore + 'static,
    G: PaymentGateway + 'static,
{
    let receipt = state
        .flow
        .confirm_payment(&query.payment_id, &query.payer_id)
        .await?;

    Ok(Json(ReceiptResponse {
        session_id: receipt.session_id.to_string(),
        status: "executed",
        orders: receipt.orders.iter().map(order_response).collect(),
    }))
}

/// GET /checkout/cancel — the provider's cancellation callback.
#[tracing::instrument(skip(state))]
pub async fn cancel<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Query(query): Query<CancelQuery>,
) -> Result<Json<CancelResponse>, ApiError>
where
    S: CommerceStore + 'static,
    G: PaymentGateway + 'static,
{
    let session_id = state.flow.cancel_payment(&query.payment_id).await?;

    Ok(Json(CancelResponse {
        session_id: session_id.to_string(),
        status: "cancelled",
    }))
}

/// GET /sessions/:id — payment session status view.
#[tracing::instrument(skip(state))]
pub async fn session<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError>
where
    S: CommerceStore + 'static,
    G: PaymentGateway + 'static,
{
    let session_id = parse_session_id(&id)?;
    let session = state.flow.session(session_id).await?;

    Ok(Json(session_response(&session)))
}

/// GET /users/:id/orders — a user's order history, oldest first.
#[tracing::instrument(skip(state))]
pub async fn user_orders<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<OrderResponse>>, ApiError>
where
    S: CommerceStore + 'static,
    G: PaymentGateway + 'static,
{
    let user_id = parse_user_id(&id)?;
    let orders = state.flow.orders_for_user(user_id).await?;

    Ok(Json(orders.iter().map(order_response).collect()))
}

fn order_response(order: &Order) -> OrderResponse {
    OrderResponse {
        id: order.id.to_string(),
        product_id: order.product_id.to_string(),
        quantity: order.quantity,
        total_cents: order.total.cents(),
        payment_ref: order.payment_ref.clone(),
        payer_ref: order.payer_ref.clone(),
        created_at: order.created_at.to_rfc3339(),
    }
}

fn session_response(session: &PaymentSession) -> SessionResponse {
    let lines = session
        .snapshot
        .lines()
        .iter()
        .map(|line| SessionLineResponse {
            product_id: line.product_id.to_string(),
            name: line.name.clone(),
            unit_price_cents: line.unit_price.cents(),
            quantity: line.quantity,
        })
        .collect();

    SessionResponse {
        id: session.id.to_string(),
        user_id: session.user_id.to_string(),
        kind: session.kind.as_str().to_string(),
        state: session.state.as_str().to_string(),
        lines,
        total_cents: session.total.cents(),
        provider_ref: session.provider_ref.clone(),
        failure_reason: session.failure_reason.clone(),
        created_at: session.created_at.to_rfc3339(),
    }
}

fn parse_user_id(id: &str) -> Result<UserId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid user ID: {e}")))?;
    Ok(UserId::from_uuid(uuid))
}

fn parse_product_id(id: &str) -> Result<ProductId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid product ID: {e}")))?;
    Ok(ProductId::from_uuid(uuid))
}

fn parse_session_id(id: &str) -> Result<SessionId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid session ID: {e}")))?;
    Ok(SessionId::from_uuid(uuid))
}
