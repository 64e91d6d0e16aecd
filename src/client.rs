//! HTTP transport for the vendor cashback API
//!
//! Wraps a shared reqwest client with the vendor's required headers and maps
//! responses into typed results. A 401 is surfaced as a distinguished
//! [`ApiError::SessionExpired`] so callers can match on expiry instead of
//! inspecting status codes.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const CLIENT_VERSION: &str = "2.0.8";
const CLIENT_USER_AGENT: &str = "okhttp/4.9.2";

/// Errors surfaced by vendor API calls
#[derive(Debug, Error)]
pub enum ApiError {
    /// The bearer token was rejected (HTTP 401); the session must be rebuilt
    #[error("session expired or unauthorized")]
    SessionExpired,

    /// Any other non-success status, with the vendor's message when present
    #[error("api error {status}: {msg}")]
    Status { status: u16, msg: String },

    /// A 2xx response whose body does not match the documented shape
    #[error("malformed response: {0}")]
    Malformed(&'static str),

    /// Connection, TLS, timeout, or body-decode failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::SessionExpired)
    }
}

/// Raw deal record returned by the offer feed
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub user_order_id: String,
    pub amount_to_pay: Decimal,
    pub cardholder_earnings: Decimal,
}

#[derive(Debug, Deserialize)]
struct DealsResponse {
    data: Option<DealsData>,
}

#[derive(Debug, Deserialize)]
struct DealsData {
    deals: Option<Vec<Deal>>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginData {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    is_new_user: bool,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    msg: Option<String>,
}

/// Outcome of the OTP verification step
#[derive(Debug)]
pub enum LoginOutcome {
    LoggedIn { access_token: String },
    /// The vendor has no account registered for this phone number
    UnknownAccount,
}

/// Shared HTTP client for the vendor API
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        // The vendor only serves its mobile app; present that client's headers.
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "version",
            reqwest::header::HeaderValue::from_static(CLIENT_VERSION),
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(CLIENT_USER_AGENT)
            .default_headers(headers)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the current batch of available deals for this session key.
    pub async fn fetch_deals(
        &self,
        access_token: &str,
        session_key: &str,
    ) -> Result<Vec<Deal>, ApiError> {
        let url = format!("{}/orders-available/cardholder", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&json!({ "id": session_key }))
            .send()
            .await?;

        let body: DealsResponse = read_json(response, "offer feed").await?;
        let deals = body
            .data
            .and_then(|d| d.deals)
            .ok_or(ApiError::Malformed("offer response missing deals"))?;

        debug!(count = deals.len(), "Fetched deal batch");
        Ok(deals)
    }

    /// Ask the vendor to text a login code to this phone number.
    pub async fn send_login_otp(&self, phone_number: u64) -> Result<(), ApiError> {
        let url = format!("{}/otps/login/send", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&json!({ "phoneNumber": phone_number }))
            .send()
            .await?;

        let _: ApiMessage = read_json(response, "otp request").await?;
        Ok(())
    }

    /// Exchange phone number and OTP for a bearer token.
    pub async fn verify_login_otp(
        &self,
        phone_number: u64,
        otp: u32,
    ) -> Result<LoginOutcome, ApiError> {
        let url = format!("{}/users/login-with-mobile", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&json!({ "phoneNumber": phone_number, "otp": otp }))
            .send()
            .await?;

        let body: LoginResponse = read_json(response, "login").await?;
        let data = body
            .data
            .ok_or(ApiError::Malformed("login response missing data"))?;

        if data.is_new_user {
            return Ok(LoginOutcome::UnknownAccount);
        }

        let access_token = data
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::Malformed("login response missing access token"))?;

        Ok(LoginOutcome::LoggedIn { access_token })
    }
}

/// Shared status handling for all vendor calls.
async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation: &str,
) -> Result<T, ApiError> {
    let status = response.status();

    if status == reqwest::StatusCode::UNAUTHORIZED {
        warn!(operation, "Vendor rejected the bearer token");
        return Err(ApiError::SessionExpired);
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let msg = response_msg(&body);
        warn!(
            operation,
            status = status.as_u16(),
            %msg,
            "Vendor call failed"
        );
        return Err(ApiError::Status {
            status: status.as_u16(),
            msg,
        });
    }

    Ok(response.json().await?)
}

/// Pull the vendor's `msg` field out of an error body, falling back to a
/// truncated copy of the raw text.
fn response_msg(body: &str) -> String {
    serde_json::from_str::<ApiMessage>(body)
        .ok()
        .and_then(|m| m.msg)
        .unwrap_or_else(|| body.chars().take(200).collect())
}
