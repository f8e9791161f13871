use actix_web::test::TestRequest;
use actix_web::{test, web, App};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use marmita_billing::api::auth::{generate_jwt, login, register, JwtMiddleware};
use marmita_billing::api::subscription::get_subscription_status;

mod support;

async fn insert_user(pool: &sqlx::PgPool, email: &str) -> i32 {
    sqlx::query(
        r#"INSERT INTO users (username, email, password_hash)
           VALUES ($1, $2, 'test-hash')
           RETURNING id"#,
    )
    .bind(format!("user_{}", Uuid::new_v4()))
    .bind(email)
    .fetch_one(pool)
    .await
    .expect("insert user")
    .get("id")
}

#[actix_web::test]
async fn register_seeds_inactive_subscription_record() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let suffix = Uuid::new_v4().to_string();
    let email = format!("signup_{suffix}@marmita.com.br");

    let state = web::Data::new(support::build_state(pool.clone(), "whsec_test", false));
    let app = test::init_service(
        App::new()
            .app_data(state.clone())
            .service(register)
            .service(login),
    )
    .await;

    let req = TestRequest::post()
        .uri("/auth/register")
        .set_json(serde_json::json!({
            "email": email,
            "password": "senha-forte",
            "username": format!("user_{suffix}")
        }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: Value = test::read_body_json(resp).await;
    let user_id = body["user_id"].as_i64().expect("user_id") as i32;

    let row = sqlx::query("SELECT status, sync_source FROM subscriptions WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("select subscription");
    assert_eq!(row.get::<String, _>("status"), "inactive");
    assert_eq!(row.get::<Option<String>, _>("sync_source"), None);

    // And the credentials work.
    let req = TestRequest::post()
        .uri("/auth/login")
        .set_json(serde_json::json!({"email": email, "password": "senha-forte"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
}

#[actix_web::test]
async fn permissive_mode_pull_failure_returns_safe_default() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let suffix = Uuid::new_v4().to_string();

    let user_id = insert_user(pool, &format!("perm_{suffix}@marmita.com.br")).await;

    // Provider unreachable (support points STRIPE_API_BASE at an
    // unroutable address), permissive mode, empty cache.
    let state = web::Data::new(support::build_state(pool.clone(), "whsec_test", false));
    let app = test::init_service(
        App::new().app_data(state.clone()).service(
            web::scope("/api")
                .wrap(JwtMiddleware)
                .service(get_subscription_status),
        ),
    )
    .await;
    let token = generate_jwt(user_id).expect("jwt");

    let req = TestRequest::get()
        .uri("/api/subscription")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["subscribed"].as_bool(), Some(false));
    assert_eq!(body["status"].as_str(), Some("error"));
    assert_eq!(body["needs_refresh"].as_bool(), Some(false));
}

#[actix_web::test]
async fn fresh_cache_entry_is_served_without_a_pull() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let suffix = Uuid::new_v4().to_string();

    let user_id = insert_user(pool, &format!("cached_{suffix}@marmita.com.br")).await;

    // Strict mode would 503 on any pull; a fresh cache entry must be
    // answered before the provider is ever consulted.
    let state = web::Data::new(support::build_state(pool.clone(), "whsec_test", true));
    state.subscription_cache.store(
        user_id,
        &marmita_billing::cache::SubscriptionAccess {
            subscribed: true,
            status: marmita_billing::models::SubscriptionStatus::Active,
            plan_name: Some("Mensal".to_string()),
            plan_price: Some("34.90".to_string()),
            expires_at: None,
            needs_refresh: false,
        },
    );

    let app = test::init_service(
        App::new().app_data(state.clone()).service(
            web::scope("/api")
                .wrap(JwtMiddleware)
                .service(get_subscription_status),
        ),
    )
    .await;
    let token = generate_jwt(user_id).expect("jwt");

    let req = TestRequest::get()
        .uri("/api/subscription")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["subscribed"].as_bool(), Some(true));
    assert_eq!(body["status"].as_str(), Some("active"));
    assert_eq!(body["plan_name"].as_str(), Some("Mensal"));
}

#[actix_web::test]
async fn strict_mode_pull_failure_is_unknown_not_denied() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let suffix = Uuid::new_v4().to_string();

    let user_id = insert_user(pool, &format!("strict_{suffix}@marmita.com.br")).await;

    let state = web::Data::new(support::build_state(pool.clone(), "whsec_test", true));
    let app = test::init_service(
        App::new().app_data(state.clone()).service(
            web::scope("/api")
                .wrap(JwtMiddleware)
                .service(get_subscription_status),
        ),
    )
    .await;
    let token = generate_jwt(user_id).expect("jwt");

    let req = TestRequest::get()
        .uri("/api/subscription")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 503);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["retry"].as_bool(), Some(true));
}

#[actix_web::test]
async fn missing_credential_is_unauthorized_not_unsubscribed() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;

    let state = web::Data::new(support::build_state(pool.clone(), "whsec_test", false));
    let app = test::init_service(
        App::new().app_data(state.clone()).service(
            web::scope("/api")
                .wrap(JwtMiddleware)
                .service(get_subscription_status),
        ),
    )
    .await;

    let req = TestRequest::get().uri("/api/subscription").to_request();
    let resp = test::try_call_service(&app, req).await;
    let err = resp.expect_err("request should be rejected");
    assert_eq!(
        err.as_response_error().status_code().as_u16(),
        401
    );
}
