// src/cache.rs
//
// TTL freshness cache over the canonical subscription record plus the
// access guard built on top of it. The cache is only ever a
// positive-result accelerator: negative results are never stored, so a
// stale false-negative can't outlive a reactivation. Time comes from an
// injected clock so tests control it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{SubscriptionRecord, SubscriptionStatus};
use crate::reconciler::{self, ReconcileError};
use crate::AppState;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Guard verdict returned to callers. `needs_refresh` marks a value
/// served from the grace window after a failed pull.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionAccess {
    pub subscribed: bool,
    pub status: SubscriptionStatus,
    pub plan_name: Option<String>,
    pub plan_price: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub needs_refresh: bool,
}

impl SubscriptionAccess {
    pub fn from_record(record: &SubscriptionRecord) -> SubscriptionAccess {
        SubscriptionAccess {
            subscribed: record.status.grants_access(),
            status: record.status,
            plan_name: record.plan_name.clone(),
            plan_price: record.plan_price.clone(),
            expires_at: record.current_period_end,
            needs_refresh: false,
        }
    }

    /// Safe default when verification failed and no usable cache entry
    /// exists: access denied, status makes the failure visible.
    pub fn unverified() -> SubscriptionAccess {
        SubscriptionAccess {
            subscribed: false,
            status: SubscriptionStatus::Error,
            plan_name: None,
            plan_price: None,
            expires_at: None,
            needs_refresh: false,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    access: SubscriptionAccess,
    checked_at: DateTime<Utc>,
}

/// Explicit configuration, no hidden defaults: every field is required
/// at construction.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub ttl_minutes: i64,
    pub strict_mode: bool,
    pub grace_period_hours: i64,
}

pub struct SubscriptionCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<i32, CacheEntry>>,
}

impl SubscriptionCache {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> SubscriptionCache {
        SubscriptionCache {
            config,
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn strict_mode(&self) -> bool {
        self.config.strict_mode
    }

    /// A positive entry no older than the TTL, or nothing.
    pub fn fresh(&self, user_id: i32) -> Option<SubscriptionAccess> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(&user_id)?;
        let age = self.clock.now() - entry.checked_at;
        if age <= Duration::minutes(self.config.ttl_minutes) {
            Some(entry.access.clone())
        } else {
            None
        }
    }

    /// A positive entry younger than the grace period. Only consulted
    /// after a pull failure in permissive mode.
    pub fn within_grace(&self, user_id: i32) -> Option<SubscriptionAccess> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(&user_id)?;
        let age = self.clock.now() - entry.checked_at;
        if age < Duration::hours(self.config.grace_period_hours) {
            Some(entry.access.clone())
        } else {
            None
        }
    }

    /// Stores a positive result. A negative result removes any existing
    /// entry instead: negatives are never cached.
    pub fn store(&self, user_id: i32, access: &SubscriptionAccess) {
        if !access.subscribed {
            self.remove(user_id);
            return;
        }
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                user_id,
                CacheEntry {
                    access: access.clone(),
                    checked_at: self.clock.now(),
                },
            );
        }
    }

    pub fn remove(&self, user_id: i32) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(&user_id);
        }
    }
}

/// Answers "is access currently granted" for a user.
///
/// Fresh cache hit first; otherwise a pull through the reconciler. A
/// failed pull either propagates (strict mode — the caller must treat
/// that as *unknown*, not as denied) or degrades to the grace-window
/// cache entry marked `needs_refresh`, and past the window to the safe
/// default.
pub async fn check_subscription(
    state: &AppState,
    user_id: i32,
) -> Result<SubscriptionAccess, ReconcileError> {
    if let Some(hit) = state.subscription_cache.fresh(user_id) {
        return Ok(hit);
    }

    match reconciler::pull_and_reconcile(state, user_id).await {
        Ok(record) => {
            let access = SubscriptionAccess::from_record(&record);
            state.subscription_cache.store(user_id, &access);
            Ok(access)
        }
        Err(e) if state.subscription_cache.strict_mode() => Err(e),
        Err(e) => {
            log::warn!("subscription pull failed for user_id={user_id}, degrading: {e}");
            match state.subscription_cache.within_grace(user_id) {
                Some(mut stale) => {
                    stale.needs_refresh = true;
                    Ok(stale)
                }
                None => Ok(SubscriptionAccess::unverified()),
            }
        }
    }
}

/// Boolean collapse of `check_subscription` for call sites that only
/// need a yes/no gate. Deliberately discards the unknown/error
/// distinction; audit-grade callers use the three-valued form.
pub async fn require_subscription(state: &AppState, user_id: i32) -> bool {
    check_subscription(state, user_id)
        .await
        .map(|access| access.subscribed)
        .unwrap_or(false)
}
