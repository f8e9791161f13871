// src/api/stripe_client.rs
//
// Minimal client for the Stripe REST API (https://api.stripe.com).
// Authorization: Bearer <secret key>. Every call carries an explicit
// timeout; a timed-out call surfaces as StripeError::Timeout so callers
// can treat the result as unknown instead of hanging an access check.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;

const STRIPE_API_BASE_DEFAULT: &str = "https://api.stripe.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum StripeError {
    Http(reqwest::Error),
    Timeout,
    Api { status: u16, body: String },
    InvalidResponse(String),
}

impl fmt::Display for StripeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StripeError::Http(e) => write!(f, "http error: {e}"),
            StripeError::Timeout => write!(f, "stripe request timed out"),
            StripeError::Api { status, body } => {
                write!(f, "stripe api error status={status} body={body}")
            }
            StripeError::InvalidResponse(e) => write!(f, "invalid response: {e}"),
        }
    }
}

impl From<reqwest::Error> for StripeError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(value)
        }
    }
}

fn api_base() -> String {
    std::env::var("STRIPE_API_BASE").unwrap_or_else(|_| STRIPE_API_BASE_DEFAULT.to_string())
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("reqwest client")
}

/// A subscription's customer is a bare id on most webhook payloads but an
/// expanded object on others; both shapes are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CustomerRef {
    Id(String),
    Expanded { id: String, email: Option<String> },
}

impl CustomerRef {
    pub fn id(&self) -> &str {
        match self {
            CustomerRef::Id(id) => id,
            CustomerRef::Expanded { id, .. } => id,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            CustomerRef::Id(_) => None,
            CustomerRef::Expanded { email, .. } => email.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub livemode: bool,
    pub unit_amount: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeItem {
    pub price: StripePrice,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StripeItemList {
    #[serde(default)]
    pub data: Vec<StripeItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub status: String,
    pub customer: CustomerRef,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub items: StripeItemList,
}

impl StripeSubscription {
    pub fn price(&self) -> Option<&StripePrice> {
        self.items.data.first().map(|item| &item.price)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub mode: Option<String>,
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePaymentIntent {
    pub id: String,
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

async fn get_json<T: serde::de::DeserializeOwned>(
    api_key: &str,
    path_and_query: &str,
) -> Result<T, StripeError> {
    let resp = http_client()
        .get(format!("{}{}", api_base(), path_and_query))
        .bearer_auth(api_key)
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(StripeError::Api {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str::<T>(&body)
        .map_err(|e| StripeError::InvalidResponse(format!("{e}; body={body}")))
}

pub async fn get_subscription(
    api_key: &str,
    subscription_id: &str,
) -> Result<StripeSubscription, StripeError> {
    get_json(api_key, &format!("/v1/subscriptions/{subscription_id}")).await
}

pub async fn get_customer(api_key: &str, customer_id: &str) -> Result<StripeCustomer, StripeError> {
    get_json(api_key, &format!("/v1/customers/{customer_id}")).await
}

pub async fn find_customer_by_email(
    api_key: &str,
    email: &str,
) -> Result<Option<StripeCustomer>, StripeError> {
    let query = serde_urlencoded::to_string([("email", email), ("limit", "1")])
        .map_err(|e| StripeError::InvalidResponse(e.to_string()))?;
    let list: StripeList<StripeCustomer> = get_json(api_key, &format!("/v1/customers?{query}")).await?;
    Ok(list.data.into_iter().next())
}

/// Most recently created subscription for the customer, any status. Used
/// by the pull path when no webhook has been applied yet.
pub async fn latest_subscription_for_customer(
    api_key: &str,
    customer_id: &str,
) -> Result<Option<StripeSubscription>, StripeError> {
    let query = serde_urlencoded::to_string([
        ("customer", customer_id),
        ("status", "all"),
        ("limit", "1"),
    ])
    .map_err(|e| StripeError::InvalidResponse(e.to_string()))?;
    let list: StripeList<StripeSubscription> =
        get_json(api_key, &format!("/v1/subscriptions?{query}")).await?;
    Ok(list.data.into_iter().next())
}

pub async fn get_price(api_key: &str, price_id: &str) -> Result<StripePrice, StripeError> {
    get_json(api_key, &format!("/v1/prices/{price_id}")).await
}

#[derive(Debug)]
pub struct CreateCheckoutSessionRequest {
    pub price_id: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    pub user_id: i32,
}

pub async fn create_checkout_session(
    api_key: &str,
    req: CreateCheckoutSessionRequest,
) -> Result<StripeCheckoutSession, StripeError> {
    let user_id = req.user_id.to_string();
    let params = [
        ("mode", "subscription"),
        ("line_items[0][price]", req.price_id.as_str()),
        ("line_items[0][quantity]", "1"),
        ("customer_email", req.customer_email.as_str()),
        ("success_url", req.success_url.as_str()),
        ("cancel_url", req.cancel_url.as_str()),
        ("metadata[user_id]", user_id.as_str()),
    ];

    let resp = http_client()
        .post(format!("{}/v1/checkout/sessions", api_base()))
        .bearer_auth(api_key)
        .form(&params)
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(StripeError::Api {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str::<StripeCheckoutSession>(&body)
        .map_err(|e| StripeError::InvalidResponse(format!("{e}; body={body}")))
}

/// Whether a secret key operates in live mode. Used to reject a price
/// whose mode does not match the key before sending anyone to checkout.
pub fn key_is_live(api_key: &str) -> bool {
    api_key.starts_with("sk_live_") || api_key.starts_with("rk_live_")
}
