// src/reconciler.rs
//
// Translates provider subscription objects into the canonical
// SubscriptionRecord. Two entry points: webhook-driven apply and the
// pull path used when no webhook has arrived yet or the cache is stale.
// The reconciler is the only writer of the subscriptions table.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::api::stripe_client::{self, StripeError, StripeSubscription};
use crate::models::{SubscriptionRecord, SubscriptionStatus, SyncSource};
use crate::plans::PlanMatch;
use crate::{db, ws, AppState};

#[derive(Debug)]
pub enum ReconcileError {
    /// No local user matches the provider customer's email. Webhook
    /// callers drop the event; the pull path treats it as a bug.
    UserNotResolved(String),
    Db(sqlx::Error),
    Provider(StripeError),
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::UserNotResolved(who) => write!(f, "no local user for {who}"),
            ReconcileError::Db(e) => write!(f, "db error: {e}"),
            ReconcileError::Provider(e) => write!(f, "provider error: {e}"),
        }
    }
}

impl From<sqlx::Error> for ReconcileError {
    fn from(value: sqlx::Error) -> Self {
        Self::Db(value)
    }
}

impl From<StripeError> for ReconcileError {
    fn from(value: StripeError) -> Self {
        Self::Provider(value)
    }
}

fn map_provider_status(provider_status: &str) -> SubscriptionStatus {
    match provider_status {
        "active" => SubscriptionStatus::Active,
        "trialing" => SubscriptionStatus::Trialing,
        "canceled" => SubscriptionStatus::Canceled,
        "past_due" => SubscriptionStatus::PastDue,
        _ => SubscriptionStatus::Inactive,
    }
}

/// Builds the canonical record from a provider subscription. Enforces the
/// record invariant: a status that grants access requires a period end in
/// the future, otherwise the record is demoted to inactive.
fn record_from_provider(
    user_id: i32,
    sub: &StripeSubscription,
    plan: PlanMatch,
    source: SyncSource,
    event_id: Option<&str>,
    now: DateTime<Utc>,
) -> SubscriptionRecord {
    let period_start = sub
        .current_period_start
        .and_then(|s| DateTime::from_timestamp(s, 0));
    let period_end = sub
        .current_period_end
        .and_then(|s| DateTime::from_timestamp(s, 0));

    let mut status = map_provider_status(&sub.status);
    if status.grants_access() && !period_end.map(|end| end > now).unwrap_or(false) {
        log::warn!(
            "provider subscription {} is {} but period end {:?} is not in the future; demoting to inactive",
            sub.id,
            sub.status,
            period_end
        );
        status = SubscriptionStatus::Inactive;
    }

    SubscriptionRecord {
        user_id,
        status,
        plan_name: Some(plan.plan_name),
        plan_price: plan.plan_price,
        provider_subscription_id: Some(sub.id.clone()),
        provider_price_id: sub.price().map(|p| p.id.clone()),
        current_period_start: period_start,
        current_period_end: period_end,
        cancel_at_period_end: sub.cancel_at_period_end,
        sync_source: Some(source),
        last_webhook_event_id: event_id.map(|s| s.to_string()),
        last_synced_at: Some(now),
    }
}

async fn resolve_customer_email(
    api_key: &str,
    sub: &StripeSubscription,
) -> Result<String, ReconcileError> {
    if let Some(email) = sub.customer.email() {
        return Ok(email.to_string());
    }

    let customer = stripe_client::get_customer(api_key, sub.customer.id()).await?;
    customer
        .email
        .ok_or_else(|| ReconcileError::UserNotResolved(format!("customer {}", customer.id)))
}

/// Persists the record, invalidates the freshness cache and broadcasts
/// the change. Broadcast failure is impossible by construction
/// (`do_send` is fire-and-forget); cache and DB errors propagate.
async fn write_record(
    state: &AppState,
    record: SubscriptionRecord,
) -> Result<SubscriptionRecord, ReconcileError> {
    db::upsert_subscription(&state.pool, &record).await?;
    state.subscription_cache.remove(record.user_id);
    ws::notify_subscription_changed(&state.ws_hub, &record);
    Ok(record)
}

async fn apply_to_user(
    state: &AppState,
    user_id: i32,
    sub: &StripeSubscription,
    source: SyncSource,
    event_id: Option<&str>,
) -> Result<SubscriptionRecord, ReconcileError> {
    let price = sub.price();
    let plan = state.plans.identify(
        price.map(|p| p.id.as_str()),
        price.and_then(|p| p.unit_amount),
    );

    let record = record_from_provider(user_id, sub, plan, source, event_id, Utc::now());
    log::info!(
        "reconciled subscription user_id={} status={} plan={:?} source={}",
        user_id,
        record.status.as_str(),
        record.plan_name,
        source.as_str()
    );
    write_record(state, record).await
}

/// Webhook entry point: resolves the local user by the provider
/// customer's email, then overwrites the canonical record.
pub async fn apply_subscription(
    state: &AppState,
    sub: &StripeSubscription,
    source: SyncSource,
    event_id: Option<&str>,
) -> Result<SubscriptionRecord, ReconcileError> {
    let email = resolve_customer_email(&state.stripe_secret_key, sub).await?;

    let user_id = db::find_user_id_by_email(&state.pool, &email)
        .await?
        .ok_or(ReconcileError::UserNotResolved(email))?;

    apply_to_user(state, user_id, sub, source, event_id).await
}

/// Pull entry point: queries the provider directly for the user's
/// subscription instead of waiting for a webhook. A user with no
/// provider customer or no subscription gets an inactive record.
pub async fn pull_and_reconcile(
    state: &AppState,
    user_id: i32,
) -> Result<SubscriptionRecord, ReconcileError> {
    let email = db::get_user_email(&state.pool, user_id)
        .await?
        .ok_or_else(|| ReconcileError::UserNotResolved(format!("user {user_id}")))?;

    let customer =
        stripe_client::find_customer_by_email(&state.stripe_secret_key, &email).await?;

    let sub = match customer {
        Some(customer) => {
            stripe_client::latest_subscription_for_customer(&state.stripe_secret_key, &customer.id)
                .await?
        }
        None => None,
    };

    match sub {
        Some(sub) => apply_to_user(state, user_id, &sub, SyncSource::ManualPull, None).await,
        None => {
            let mut record = SubscriptionRecord::inactive(user_id);
            record.sync_source = Some(SyncSource::ManualPull);
            record.last_synced_at = Some(Utc::now());
            write_record(state, record).await
        }
    }
}
