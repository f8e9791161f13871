// src/db.rs

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{Order, PixStatus, PixTransaction, SubscriptionRecord, SubscriptionStatus};

pub async fn find_user_id_by_email(pool: &PgPool, email: &str) -> Result<Option<i32>, sqlx::Error> {
    let row = sqlx::query("SELECT id FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.get("id")))
}

pub async fn get_user_email(pool: &PgPool, user_id: i32) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query("SELECT email FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.get("email")))
}

/// Seeds the inactive subscription row at signup. Idempotent: a user that
/// already has a record keeps it untouched.
pub async fn seed_inactive_subscription(pool: &PgPool, user_id: i32) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO subscriptions (user_id, status)
           VALUES ($1, 'inactive')
           ON CONFLICT (user_id) DO NOTHING"#,
    )
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}

fn subscription_from_row(row: PgRow) -> SubscriptionRecord {
    let status: String = row.get("status");
    let sync_source: Option<String> = row.get("sync_source");
    SubscriptionRecord {
        user_id: row.get("user_id"),
        status: SubscriptionStatus::from_db(&status),
        plan_name: row.get("plan_name"),
        plan_price: row.get("plan_price"),
        provider_subscription_id: row.get("provider_subscription_id"),
        provider_price_id: row.get("provider_price_id"),
        current_period_start: row.get("current_period_start"),
        current_period_end: row.get("current_period_end"),
        cancel_at_period_end: row.get("cancel_at_period_end"),
        sync_source: sync_source.map(|s| match s.as_str() {
            "manual-pull" => crate::models::SyncSource::ManualPull,
            _ => crate::models::SyncSource::Webhook,
        }),
        last_webhook_event_id: row.get("last_webhook_event_id"),
        last_synced_at: row.get("last_synced_at"),
    }
}

pub async fn get_subscription(
    pool: &PgPool,
    user_id: i32,
) -> Result<Option<SubscriptionRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT user_id, status, plan_name, plan_price::text as plan_price,
                  provider_subscription_id, provider_price_id,
                  current_period_start, current_period_end, cancel_at_period_end,
                  sync_source, last_webhook_event_id, last_synced_at
           FROM subscriptions
           WHERE user_id = $1"#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(subscription_from_row))
}

/// Upsert keyed by user id. The record is never deleted, only overwritten.
pub async fn upsert_subscription(
    pool: &PgPool,
    record: &SubscriptionRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO subscriptions
                (user_id, status, plan_name, plan_price, provider_subscription_id,
                 provider_price_id, current_period_start, current_period_end,
                 cancel_at_period_end, sync_source, last_webhook_event_id, last_synced_at)
           VALUES ($1, $2, $3, $4::numeric, $5, $6, $7, $8, $9, $10, $11, $12)
           ON CONFLICT (user_id)
           DO UPDATE SET
               status = EXCLUDED.status,
               plan_name = EXCLUDED.plan_name,
               plan_price = EXCLUDED.plan_price,
               provider_subscription_id = EXCLUDED.provider_subscription_id,
               provider_price_id = EXCLUDED.provider_price_id,
               current_period_start = EXCLUDED.current_period_start,
               current_period_end = EXCLUDED.current_period_end,
               cancel_at_period_end = EXCLUDED.cancel_at_period_end,
               sync_source = EXCLUDED.sync_source,
               last_webhook_event_id = EXCLUDED.last_webhook_event_id,
               last_synced_at = EXCLUDED.last_synced_at,
               updated_at = NOW()"#,
    )
    .bind(record.user_id)
    .bind(record.status.as_str())
    .bind(&record.plan_name)
    .bind(&record.plan_price)
    .bind(&record.provider_subscription_id)
    .bind(&record.provider_price_id)
    .bind(record.current_period_start)
    .bind(record.current_period_end)
    .bind(record.cancel_at_period_end)
    .bind(record.sync_source.map(|s| s.as_str()))
    .bind(&record.last_webhook_event_id)
    .bind(record.last_synced_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Atomic insert-or-detect on the idempotency ledger. Returns `true` when
/// the event is new and `false` when the id was already recorded. The
/// unique constraint is the race arbiter; there is no separate existence
/// check.
pub async fn record_webhook_event(
    pool: &PgPool,
    event_id: &str,
    event_type: &str,
    raw_payload: &serde_json::Value,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO webhook_events (event_id, event_type, raw_payload)
           VALUES ($1, $2, $3)
           ON CONFLICT (event_id) DO NOTHING"#,
    )
    .bind(event_id)
    .bind(event_type)
    .bind(raw_payload)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn order_from_row(row: PgRow) -> Order {
    Order {
        id: row.get("id"),
        user_id: row.get("user_id"),
        total: row.get("total"),
        status: row.get("status"),
        payment_status: row.get("payment_status"),
        created_at: row.get("created_at"),
    }
}

pub async fn get_order_for_user(
    pool: &PgPool,
    order_id: Uuid,
    user_id: i32,
) -> Result<Option<Order>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, user_id, total::text as total, status, payment_status, created_at
           FROM orders
           WHERE id = $1 AND user_id = $2"#,
    )
    .bind(order_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(order_from_row))
}

/// Direct order settlement write used by the webhook handlers
/// (checkout-completed and payment events). Returns affected rows so an
/// unknown order id can be logged instead of silently swallowed.
pub async fn update_order_payment(
    pool: &PgPool,
    order_id: Uuid,
    payment_status: &str,
    order_status: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE orders
           SET payment_status = $1, status = $2, updated_at = NOW()
           WHERE id = $3"#,
    )
    .bind(payment_status)
    .bind(order_status)
    .bind(order_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn insert_pix_transaction(
    pool: &PgPool,
    tx: &PixTransaction,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO pix_transactions
                (id, order_id, user_id, amount, payload_text, status, created_at, expires_at)
           VALUES ($1, $2, $3, $4::numeric, $5, $6, $7, $8)"#,
    )
    .bind(&tx.id)
    .bind(tx.order_id)
    .bind(tx.user_id)
    .bind(&tx.amount)
    .bind(&tx.payload_text)
    .bind(tx.status.as_str())
    .bind(tx.created_at)
    .bind(tx.expires_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_pix_transaction_for_user(
    pool: &PgPool,
    tx_id: &str,
    user_id: i32,
) -> Result<Option<PixTransaction>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, order_id, user_id, amount::text as amount, payload_text,
                  status, created_at, expires_at
           FROM pix_transactions
           WHERE id = $1 AND user_id = $2"#,
    )
    .bind(tx_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| {
        let status: String = r.get("status");
        PixTransaction {
            id: r.get("id"),
            order_id: r.get("order_id"),
            user_id: r.get("user_id"),
            amount: r.get("amount"),
            payload_text: r.get("payload_text"),
            status: PixStatus::from_db(&status),
            created_at: r.get("created_at"),
            expires_at: r.get("expires_at"),
        }
    }))
}

/// Marks a pending transaction expired. The `status = 'pending'` guard
/// keeps paid transactions terminal even if two polls race past the
/// expiry check together.
pub async fn expire_pix_if_pending(pool: &PgPool, tx_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE pix_transactions
           SET status = 'expired'
           WHERE id = $1 AND status = 'pending'"#,
    )
    .bind(tx_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Settlement write: transaction -> paid and the linked order -> paid,
/// both inside one database transaction. Either both land or neither
/// does. Returns `false` when the row was no longer pending (another
/// poll already settled or expired it).
pub async fn settle_pix_and_order(
    pool: &PgPool,
    tx_id: &str,
    order_id: Uuid,
    paid_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let mut db_tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"UPDATE pix_transactions
           SET status = 'paid'
           WHERE id = $1 AND status = 'pending'"#,
    )
    .bind(tx_id)
    .execute(&mut *db_tx)
    .await?;

    if updated.rows_affected() != 1 {
        db_tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query(
        r#"UPDATE orders
           SET payment_status = 'paid', status = 'confirmed', updated_at = $1
           WHERE id = $2"#,
    )
    .bind(paid_at)
    .bind(order_id)
    .execute(&mut *db_tx)
    .await?;

    db_tx.commit().await?;
    Ok(true)
}
