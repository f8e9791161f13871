// src/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Inactive,
    Active,
    Trialing,
    Canceled,
    PastDue,
    Error,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Inactive => "inactive",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Error => "error",
        }
    }

    pub fn from_db(value: &str) -> SubscriptionStatus {
        match value {
            "inactive" => SubscriptionStatus::Inactive,
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "canceled" => SubscriptionStatus::Canceled,
            "past_due" => SubscriptionStatus::PastDue,
            _ => SubscriptionStatus::Error,
        }
    }

    /// Active and trialing both grant access; every other status denies it.
    pub fn grants_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SyncSource {
    Webhook,
    ManualPull,
}

impl SyncSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncSource::Webhook => "webhook",
            SyncSource::ManualPull => "manual-pull",
        }
    }
}

/// Canonical subscription record, one per user, only ever written by the
/// reconciler. A status that grants access implies `current_period_end`
/// was in the future when the row was written.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionRecord {
    pub user_id: i32,
    pub status: SubscriptionStatus,
    pub plan_name: Option<String>,
    pub plan_price: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub provider_price_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub sync_source: Option<SyncSource>,
    pub last_webhook_event_id: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
    pub fn inactive(user_id: i32) -> SubscriptionRecord {
        SubscriptionRecord {
            user_id,
            status: SubscriptionStatus::Inactive,
            plan_name: None,
            plan_price: None,
            provider_subscription_id: None,
            provider_price_id: None,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            sync_source: None,
            last_webhook_event_id: None,
            last_synced_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PixStatus {
    Pending,
    Paid,
    Expired,
}

impl PixStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixStatus::Pending => "pending",
            PixStatus::Paid => "paid",
            PixStatus::Expired => "expired",
        }
    }

    pub fn from_db(value: &str) -> PixStatus {
        match value {
            "paid" => PixStatus::Paid,
            "expired" => PixStatus::Expired,
            _ => PixStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PixStatus::Paid | PixStatus::Expired)
    }
}

/// One row per generated PIX code. Never deleted; `status` only moves
/// pending -> paid or pending -> expired.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PixTransaction {
    pub id: String,
    pub order_id: Uuid,
    pub user_id: i32,
    pub amount: String,
    pub payload_text: String,
    pub status: PixStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Only the columns the billing core reads or writes; everything else
/// about orders belongs to the ordering surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: i32,
    pub total: String,
    pub status: String,
    pub payment_status: String,
    pub created_at: Option<DateTime<Utc>>,
}
