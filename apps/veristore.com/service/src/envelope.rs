//! Response envelope for the function endpoints.
//!
//! Every body carries a `success` flag. Failure messages are fixed public
//! strings; store internals are logged server-side and never serialized.

use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;

pub const ERROR_METHOD_NOT_ALLOWED: &str = "Method not allowed";
pub const ERROR_USER_ID_REQUIRED: &str = "User ID is required";
pub const ERROR_PAYMENT_ID_REQUIRED: &str = "Payment ID is required";
pub const ERROR_TXID_REQUIRED: &str = "Transaction ID is required";
pub const ERROR_PAYMENT_NOT_FOUND: &str = "Payment not found";
pub const ERROR_PAYMENT_STATE: &str = "Invalid payment state";
pub const ERROR_FETCH_HISTORY: &str = "Failed to fetch payment history";
pub const ERROR_UPDATE_PAYMENT: &str = "Failed to update payment";
pub const ERROR_INTERNAL: &str = "Internal server error";

pub type FailureTuple = (StatusCode, Json<FailureBody>);

#[derive(Debug, Serialize)]
pub struct FailureBody {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessBody<T> {
    pub success: bool,
    pub data: T,
}

pub fn failure(status: StatusCode, message: &str) -> FailureTuple {
    (
        status,
        Json(FailureBody {
            success: false,
            error: message.to_string(),
        }),
    )
}

pub fn success_data<T: Serialize>(data: T) -> (StatusCode, Json<SuccessBody<T>>) {
    (
        StatusCode::OK,
        Json(SuccessBody {
            success: true,
            data,
        }),
    )
}
