// src/api/webhooks_stripe.rs

use actix_web::{post, web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde_json::json;
use std::fmt;
use uuid::Uuid;

use crate::api::stripe::{self, SignatureError};
use crate::api::stripe_client::{
    self, StripeCheckoutSession, StripeInvoice, StripePaymentIntent, StripeSubscription,
};
use crate::models::SyncSource;
use crate::reconciler::{self, ReconcileError};
use crate::{db, AppState};

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Closed set of provider events this system reacts to. Adding or
/// removing a kind is a compile-time-checked change: the dispatch match
/// below is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaymentSucceeded,
    InvoicePaymentFailed,
    CheckoutCompleted,
    PaymentSucceeded,
    PaymentFailed,
    Unknown,
}

impl EventKind {
    pub fn parse(event_type: &str) -> EventKind {
        match event_type {
            "customer.subscription.created" => EventKind::SubscriptionCreated,
            "customer.subscription.updated" => EventKind::SubscriptionUpdated,
            "customer.subscription.deleted" => EventKind::SubscriptionDeleted,
            "invoice.payment_succeeded" => EventKind::InvoicePaymentSucceeded,
            "invoice.payment_failed" => EventKind::InvoicePaymentFailed,
            "checkout.session.completed" => EventKind::CheckoutCompleted,
            "payment_intent.succeeded" => EventKind::PaymentSucceeded,
            "payment_intent.payment_failed" => EventKind::PaymentFailed,
            _ => EventKind::Unknown,
        }
    }
}

#[derive(Debug)]
enum DispatchError {
    Malformed(String),
    Db(sqlx::Error),
    Reconcile(ReconcileError),
    Provider(stripe_client::StripeError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Malformed(e) => write!(f, "malformed event payload: {e}"),
            DispatchError::Db(e) => write!(f, "db error: {e}"),
            DispatchError::Reconcile(e) => write!(f, "reconcile error: {e}"),
            DispatchError::Provider(e) => write!(f, "provider error: {e}"),
        }
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(value: sqlx::Error) -> Self {
        Self::Db(value)
    }
}

impl From<stripe_client::StripeError> for DispatchError {
    fn from(value: stripe_client::StripeError) -> Self {
        Self::Provider(value)
    }
}

fn object_from_event<T: serde::de::DeserializeOwned>(
    payload: &serde_json::Value,
) -> Result<T, DispatchError> {
    let object = payload
        .get("data")
        .and_then(|d| d.get("object"))
        .cloned()
        .ok_or_else(|| DispatchError::Malformed("missing data.object".to_string()))?;

    serde_json::from_value(object).map_err(|e| DispatchError::Malformed(e.to_string()))
}

#[utoipa::path(
    post,
    path = "/webhook/stripe",
    tag = "webhooks",
    responses(
        (status = 200, description = "Event applied, duplicate, or intentionally ignored"),
        (status = 400, description = "Bad signature or malformed envelope"),
        (status = 500, description = "Missing configuration or processing error (provider should retry)")
    )
)]
#[post("/webhook/stripe")]
pub async fn stripe_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    // A missing signing secret is a fatal configuration error, never a
    // verification bypass.
    if state.stripe_webhook_secret.is_empty() {
        log::error!("STRIPE_WEBHOOK_SECRET is not configured, rejecting webhook");
        return HttpResponse::InternalServerError().finish();
    }

    let signature_header = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if let Err(e) = stripe::verify_signature(
        &state.stripe_webhook_secret,
        &body,
        signature_header,
        Utc::now().timestamp(),
    ) {
        log::warn!("webhook signature rejected: {e}");
        return HttpResponse::BadRequest().json(json!({"error": "invalid signature"}));
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("webhook body is not valid json: {e}");
            return HttpResponse::BadRequest().json(json!({"error": "invalid payload"}));
        }
    };

    let (Some(event_id), Some(event_type)) = (
        payload.get("id").and_then(|v| v.as_str()).map(str::to_string),
        payload.get("type").and_then(|v| v.as_str()).map(str::to_string),
    ) else {
        return HttpResponse::BadRequest().json(json!({"error": "missing event id or type"}));
    };

    // Atomic insert on the ledger: concurrent deliveries of the same
    // event id race here and exactly one wins.
    match db::record_webhook_event(&state.pool, &event_id, &event_type, &payload).await {
        Ok(true) => {}
        Ok(false) => {
            log::info!("duplicate webhook delivery event_id={event_id}, no-op");
            return HttpResponse::Ok().json(json!({"ok": true, "duplicate": true}));
        }
        Err(e) => {
            log::error!("webhook ledger insert error event_id={event_id}: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    }

    let kind = EventKind::parse(&event_type);
    let result = match kind {
        EventKind::SubscriptionCreated
        | EventKind::SubscriptionUpdated
        | EventKind::SubscriptionDeleted => {
            handle_subscription_event(&state, &payload, &event_id).await
        }
        EventKind::InvoicePaymentSucceeded | EventKind::InvoicePaymentFailed => {
            handle_invoice_event(&state, &payload, &event_id).await
        }
        EventKind::CheckoutCompleted => handle_checkout_completed(&state, &payload).await,
        EventKind::PaymentSucceeded => handle_payment_event(&state, &payload, true).await,
        EventKind::PaymentFailed => handle_payment_event(&state, &payload, false).await,
        EventKind::Unknown => {
            // Acknowledged so the provider never retries an event we
            // intentionally ignore.
            log::info!("ignoring webhook event type={event_type} event_id={event_id}");
            return HttpResponse::Ok().json(json!({"ok": true, "ignored": true}));
        }
    };

    match result {
        Ok(()) => HttpResponse::Ok().json(json!({"ok": true})),
        Err(e) => {
            log::error!("webhook dispatch error event_id={event_id} type={event_type}: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn handle_subscription_event(
    state: &AppState,
    payload: &serde_json::Value,
    event_id: &str,
) -> Result<(), DispatchError> {
    let sub: StripeSubscription = object_from_event(payload)?;
    apply_subscription_dropping_unknown_user(state, &sub, event_id).await
}

/// Invoice events carry only a subscription reference; the parent
/// subscription is re-fetched and re-enters the subscription path.
async fn handle_invoice_event(
    state: &AppState,
    payload: &serde_json::Value,
    event_id: &str,
) -> Result<(), DispatchError> {
    let invoice: StripeInvoice = object_from_event(payload)?;

    let Some(subscription_id) = invoice.subscription.as_deref() else {
        log::info!("invoice {} has no subscription, ignoring", invoice.id);
        return Ok(());
    };

    let sub = stripe_client::get_subscription(&state.stripe_secret_key, subscription_id).await?;
    apply_subscription_dropping_unknown_user(state, &sub, event_id).await
}

async fn apply_subscription_dropping_unknown_user(
    state: &AppState,
    sub: &StripeSubscription,
    event_id: &str,
) -> Result<(), DispatchError> {
    match reconciler::apply_subscription(state, sub, SyncSource::Webhook, Some(event_id)).await {
        Ok(_) => Ok(()),
        // The user may not exist locally yet; the event is dropped, not
        // retried.
        Err(ReconcileError::UserNotResolved(who)) => {
            log::warn!("webhook subscription event for unknown user ({who}), dropped");
            Ok(())
        }
        Err(e) => Err(DispatchError::Reconcile(e)),
    }
}

/// One-time payment checkout: the order is settled directly from the
/// session's payment outcome.
async fn handle_checkout_completed(
    state: &AppState,
    payload: &serde_json::Value,
) -> Result<(), DispatchError> {
    let session: StripeCheckoutSession = object_from_event(payload)?;

    if session.mode.as_deref() == Some("subscription") {
        // Subscription checkouts are reconciled by the subscription
        // events that follow.
        log::info!("checkout session {} is a subscription, ignoring", session.id);
        return Ok(());
    }

    let Some(order_id) = metadata_order_id(&session.metadata, &session.id) else {
        return Ok(());
    };

    if session.payment_status.as_deref() == Some("paid") {
        settle_order(state, order_id, "paid", "confirmed").await
    } else {
        log::info!(
            "checkout session {} completed with payment_status={:?}, order {} left untouched",
            session.id,
            session.payment_status,
            order_id
        );
        Ok(())
    }
}

async fn handle_payment_event(
    state: &AppState,
    payload: &serde_json::Value,
    succeeded: bool,
) -> Result<(), DispatchError> {
    let intent: StripePaymentIntent = object_from_event(payload)?;

    let Some(order_id) = metadata_order_id(&intent.metadata, &intent.id) else {
        return Ok(());
    };

    if succeeded {
        settle_order(state, order_id, "paid", "confirmed").await
    } else {
        settle_order(state, order_id, "failed", "pending").await
    }
}

fn metadata_order_id(
    metadata: &std::collections::HashMap<String, String>,
    object_id: &str,
) -> Option<Uuid> {
    let Some(raw) = metadata.get("order_id") else {
        log::info!("provider object {object_id} carries no order_id metadata, ignoring");
        return None;
    };

    match raw.parse::<Uuid>() {
        Ok(id) => Some(id),
        Err(_) => {
            log::warn!("provider object {object_id} has unparseable order_id={raw}, dropped");
            None
        }
    }
}

async fn settle_order(
    state: &AppState,
    order_id: Uuid,
    payment_status: &str,
    order_status: &str,
) -> Result<(), DispatchError> {
    let updated = db::update_order_payment(&state.pool, order_id, payment_status, order_status).await?;
    if updated == 0 {
        log::warn!("payment event for unknown order {order_id}, dropped");
    } else {
        log::info!("order {order_id} payment_status={payment_status} status={order_status}");
    }
    Ok(())
}
