use actix::Actor;
use sqlx::PgPool;
use std::env;
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::sync::{Mutex, MutexGuard};

use marmita_billing::cache::{CacheConfig, SubscriptionCache, SystemClock};
use marmita_billing::plans::PlanCatalog;
use marmita_billing::{ws, AppState};

fn split_db_url(url: &str) -> Result<(String, String), String> {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base.to_string(), Some(query)),
        None => (url.to_string(), None),
    };

    let db_start = base
        .rfind('/')
        .ok_or_else(|| "invalid database url".to_string())?;
    if db_start + 1 >= base.len() {
        return Err("database name is empty".to_string());
    }

    let db_name = base[db_start + 1..].to_string();
    let mut admin_url = format!("{}postgres", &base[..db_start + 1]);
    if let Some(query) = query {
        admin_url = format!("{admin_url}?{query}");
    }

    Ok((admin_url, db_name))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

pub async fn init_test_db() -> TestDb {
    dotenvy::dotenv().ok();
    let test_url = env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let (admin_url, db_name) =
        split_db_url(&test_url).expect("invalid TEST_DATABASE_URL format");

    let lock = TEST_DB_LOCK.get_or_init(|| Mutex::new(()));
    let guard = lock.lock().await;

    let admin_pool = PgPool::connect(&admin_url)
        .await
        .expect("connect admin db");

    let _ = sqlx::query("SELECT pg_advisory_lock(424242)")
        .execute(&admin_pool)
        .await;

    let quoted_name = quote_identifier(&db_name);
    let drop_sql = format!("DROP DATABASE IF EXISTS {quoted_name} WITH (FORCE)");
    let create_sql = format!("CREATE DATABASE {quoted_name}");

    let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
    let create_result = sqlx::query(&create_sql).execute(&admin_pool).await;
    if let Err(e) = create_result {
        eprintln!("create test db error: {e}");
        let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
        sqlx::query(&create_sql)
            .execute(&admin_pool)
            .await
            .expect("create test db retry");
    }

    let _ = sqlx::query("SELECT pg_advisory_unlock(424242)")
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;

    let pool = PgPool::connect(&test_url)
        .await
        .expect("connect test db");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    TestDb { pool, _guard: guard }
}

/// Test AppState: plan catalog with known price ids, no PSP configured,
/// and the Stripe base pointed at an unroutable address so nothing in a
/// test run ever reaches the real provider.
pub fn build_state(pool: PgPool, webhook_secret: &str, strict_mode: bool) -> AppState {
    env::set_var("JWT_SECRET", "test-jwt-secret");
    env::set_var("STRIPE_API_BASE", "http://127.0.0.1:9");

    let cache = SubscriptionCache::new(
        CacheConfig {
            ttl_minutes: 30,
            strict_mode,
            grace_period_hours: 24,
        },
        Arc::new(SystemClock),
    );

    AppState {
        pool,
        ws_hub: ws::WsHub::new().start(),
        stripe_secret_key: "sk_test_dummy".to_string(),
        stripe_webhook_secret: webhook_secret.to_string(),
        plans: PlanCatalog::new(
            "price_trial_123".to_string(),
            "price_monthly_123".to_string(),
            "price_annual_123".to_string(),
        ),
        pix_key: "pagamentos@marmita.com.br".to_string(),
        pix_merchant_name: "Marmita Delivery".to_string(),
        pix_merchant_city: "Sao Paulo".to_string(),
        pix_psp_base_url: None,
        pix_psp_api_key: None,
        app_base_url: "http://localhost:3000".to_string(),
        subscription_cache: Arc::new(cache),
    }
}
