//! Veristore payments service.
//!
//! Thin HTTP surface over the payment record store: the history query
//! gateway the storefront polls, plus the approval/completion callbacks the
//! wallet payment flow drives. Cross-origin callers get the same CORS
//! headers on every response, errors included.

use std::sync::Arc;
use std::time::SystemTime;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod envelope;
pub mod payment_store;


use veristore_client_core::history::HistoryResponse;

use crate::config::Config;
use crate::envelope::{
    ERROR_FETCH_HISTORY, ERROR_INTERNAL, ERROR_METHOD_NOT_ALLOWED, ERROR_PAYMENT_ID_REQUIRED,
    ERROR_PAYMENT_NOT_FOUND, ERROR_PAYMENT_STATE, ERROR_TXID_REQUIRED, ERROR_UPDATE_PAYMENT,
    ERROR_USER_ID_REQUIRED, failure, success_data,
};
use crate::payment_store::{PaymentStore, PaymentStoreError, SubmitPaymentInput};

const SERVICE_NAME: &str = "veristore-payments-service";

pub const ROUTE_PAYMENT_HISTORY: &str = "/functions/v1/get-payment-history";
pub const ROUTE_APPROVE_PAYMENT: &str = "/functions/v1/approve-payment";
pub const ROUTE_COMPLETE_PAYMENT: &str = "/functions/v1/complete-payment";

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    payments: PaymentStore,
    started_at: SystemTime,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRequestBody {
    #[serde(default)]
    external_user_id: Option<String>,
    #[serde(default)]
    page: Option<u64>,
    #[serde(default)]
    page_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApprovePaymentBody {
    #[serde(default)]
    payment_id: Option<String>,
    #[serde(default)]
    external_user_id: Option<String>,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    memo: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletePaymentBody {
    #[serde(default)]
    payment_id: Option<String>,
    #[serde(default)]
    txid: Option<String>,
}

pub fn build_router(config: Config) -> Router {
    let payments = PaymentStore::from_config(&config);
    build_router_with_store(config, payments)
}

/// Assemble the router around an existing store (tests keep a handle on it).
pub fn build_router_with_store(config: Config, payments: PaymentStore) -> Router {
    let cors = cors_layer(&config);
    let state = AppState {
        config: Arc::new(config),
        payments,
        started_at: SystemTime::now(),
    };

    Router::new()
        .route(
            ROUTE_PAYMENT_HISTORY,
            post(get_payment_history).fallback(method_not_allowed),
        )
        .route(
            ROUTE_APPROVE_PAYMENT,
            post(approve_payment).fallback(method_not_allowed),
        )
        .route(
            ROUTE_COMPLETE_PAYMENT,
            post(complete_payment).fallback(method_not_allowed),
        )
        .route("/healthz", get(healthz))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .layer(cors)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if config.allowed_origin == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(&config.allowed_origin) {
        Ok(origin) => layer.allow_origin(AllowOrigin::exact(origin)),
        Err(error) => {
            tracing::warn!(
                target: "veristore.service",
                origin = %config.allowed_origin,
                error = %error,
                "invalid allowed origin; falling back to any",
            );
            layer.allow_origin(Any)
        }
    }
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let uptime_seconds = state
        .started_at
        .elapsed()
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();

    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
    })
}

async fn method_not_allowed() -> Response {
    failure(StatusCode::METHOD_NOT_ALLOWED, ERROR_METHOD_NOT_ALLOWED).into_response()
}

async fn get_payment_history(
    State(state): State<AppState>,
    payload: Result<Json<HistoryRequestBody>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = payload else {
        return failure(StatusCode::INTERNAL_SERVER_ERROR, ERROR_INTERNAL).into_response();
    };

    let Some(external_user_id) = body
        .external_user_id
        .filter(|value| !value.trim().is_empty())
    else {
        return failure(StatusCode::BAD_REQUEST, ERROR_USER_ID_REQUIRED).into_response();
    };

    let page = body.page.unwrap_or(1).max(1);
    let page_size = body
        .page_size
        .unwrap_or(state.config.default_page_size)
        .max(1);

    match state
        .payments
        .history_page(&external_user_id, page, page_size)
        .await
    {
        Ok(history) => (
            StatusCode::OK,
            Json(HistoryResponse {
                success: true,
                data: history.records,
                pagination: history.pagination,
                summary: history.summary,
            }),
        )
            .into_response(),
        Err(error) => {
            tracing::error!(
                target: "veristore.service",
                error = %error,
                "failed to fetch payment history",
            );
            failure(StatusCode::INTERNAL_SERVER_ERROR, ERROR_FETCH_HISTORY).into_response()
        }
    }
}

/// Server approval callback: records the submitted checkout and approves it.
async fn approve_payment(
    State(state): State<AppState>,
    payload: Result<Json<ApprovePaymentBody>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = payload else {
        return failure(StatusCode::INTERNAL_SERVER_ERROR, ERROR_INTERNAL).into_response();
    };

    let Some(payment_id) = body.payment_id.filter(|value| !value.trim().is_empty()) else {
        return failure(StatusCode::BAD_REQUEST, ERROR_PAYMENT_ID_REQUIRED).into_response();
    };
    let Some(external_user_id) = body
        .external_user_id
        .filter(|value| !value.trim().is_empty())
    else {
        return failure(StatusCode::BAD_REQUEST, ERROR_USER_ID_REQUIRED).into_response();
    };

    let submitted = state
        .payments
        .submit_payment(SubmitPaymentInput {
            external_user_id,
            payment_id: payment_id.clone(),
            amount: body.amount.unwrap_or_default(),
            memo: body.memo.unwrap_or_default(),
        })
        .await;
    if let Err(error) = submitted {
        return store_failure(&error).into_response();
    }

    match state.payments.approve_payment(&payment_id).await {
        Ok(record) => success_data(record).into_response(),
        Err(error) => store_failure(&error).into_response(),
    }
}

/// Server completion callback: settles an approved payment with its txid.
async fn complete_payment(
    State(state): State<AppState>,
    payload: Result<Json<CompletePaymentBody>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = payload else {
        return failure(StatusCode::INTERNAL_SERVER_ERROR, ERROR_INTERNAL).into_response();
    };

    let Some(payment_id) = body.payment_id.filter(|value| !value.trim().is_empty()) else {
        return failure(StatusCode::BAD_REQUEST, ERROR_PAYMENT_ID_REQUIRED).into_response();
    };
    let Some(txid) = body.txid.filter(|value| !value.trim().is_empty()) else {
        return failure(StatusCode::BAD_REQUEST, ERROR_TXID_REQUIRED).into_response();
    };

    match state.payments.complete_payment(&payment_id, &txid).await {
        Ok(record) => success_data(record).into_response(),
        Err(error) => store_failure(&error).into_response(),
    }
}

fn store_failure(error: &PaymentStoreError) -> envelope::FailureTuple {
    match error {
        PaymentStoreError::NotFound => failure(StatusCode::NOT_FOUND, ERROR_PAYMENT_NOT_FOUND),
        PaymentStoreError::Validation { field, message } => {
            tracing::warn!(
                target: "veristore.service",
                field = %field,
                message = %message,
                "rejected payment mutation",
            );
            failure(StatusCode::BAD_REQUEST, ERROR_PAYMENT_STATE)
        }
        PaymentStoreError::Conflict { message } => {
            tracing::warn!(
                target: "veristore.service",
                message = %message,
                "conflicting payment mutation",
            );
            failure(StatusCode::CONFLICT, ERROR_PAYMENT_STATE)
        }
        PaymentStoreError::InvalidTransition { from, to } => {
            tracing::warn!(
                target: "veristore.service",
                from = %from,
                to = %to,
                "rejected payment transition",
            );
            failure(StatusCode::CONFLICT, ERROR_PAYMENT_STATE)
        }
        PaymentStoreError::Persistence { message } => {
            tracing::error!(
                target: "veristore.service",
                message = %message,
                "payment store persistence failed",
            );
            failure(StatusCode::INTERNAL_SERVER_ERROR, ERROR_UPDATE_PAYMENT)
        }
    }
}
