use actix_web::test::TestRequest;
use actix_web::{test, web, App};
use chrono::{Duration, Utc};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use marmita_billing::api::auth::{generate_jwt, JwtMiddleware};
use marmita_billing::api::pix::{create_pix_payment, pix_status};

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

async fn insert_order(pool: &sqlx::PgPool, user_id: i32, total: &str) -> Uuid {
    sqlx::query(
        r#"INSERT INTO orders (user_id, total, status, payment_status)
           VALUES ($1, $2::numeric, 'pending', 'unpaid')
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(total)
    .fetch_one(pool)
    .await
    .expect("insert order")
    .get("id")
}

macro_rules! pix_app {
    ($state:expr) => {
        test::init_service(
            App::new().app_data($state.clone()).service(
                web::scope("/api")
                    .wrap(JwtMiddleware)
                    .service(create_pix_payment)
                    .service(pix_status),
            ),
        )
        .await
    };
}

#[actix_web::test]
async fn create_pix_code_then_poll_is_pending() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let suffix = Uuid::new_v4().to_string();

    let user_id = insert_user(pool, &format!("pix_{suffix}@marmita.com.br")).await;
    let order_id = insert_order(pool, user_id, "45.90").await;

    let state = web::Data::new(support::build_state(pool.clone(), "whsec_test", false));
    let app = pix_app!(state);
    let token = generate_jwt(user_id).expect("jwt");

    let req = TestRequest::post()
        .uri("/api/pix")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(serde_json::json!({"order_id": order_id}))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: Value = test::read_body_json(resp).await;

    let tx_id = body["transaction_id"].as_str().expect("transaction_id");
    assert!(tx_id.starts_with("PIX-"));
    let order_suffix = order_id.simple().to_string();
    assert!(tx_id.ends_with(&order_suffix[order_suffix.len() - 8..]));

    let br_code = body["br_code"].as_str().expect("br_code");
    assert!(br_code.starts_with("000201"));
    assert!(br_code.contains("540545.90"));
    assert!(br_code.contains("br.gov.bcb.pix"));
    assert_eq!(body["amount"].as_str(), Some("45.90"));
    assert!(body["qr_code_url"]
        .as_str()
        .unwrap()
        .starts_with("https://api.qrserver.com/"));

    let status: String = sqlx::query("SELECT status FROM pix_transactions WHERE id = $1")
        .bind(tx_id)
        .fetch_one(pool)
        .await
        .expect("select pix tx")
        .get("status");
    assert_eq!(status, "pending");

    // Settlement source unreachable in tests: the poll stays pending.
    let req = TestRequest::get()
        .uri(&format!("/api/pix/{tx_id}/status"))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"].as_str(), Some("pending"));
}

#[actix_web::test]
async fn pending_transaction_past_deadline_expires_and_stays_expired() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let suffix = Uuid::new_v4().to_string();

    let user_id = insert_user(pool, &format!("exp_{suffix}@marmita.com.br")).await;
    let order_id = insert_order(pool, user_id, "23.50").await;

    let tx_id = format!("PIX-1700000000000-{}", &suffix[..8]);
    let created_at = Utc::now() - Duration::minutes(45);
    sqlx::query(
        r#"INSERT INTO pix_transactions
               (id, order_id, user_id, amount, payload_text, status, created_at, expires_at)
           VALUES ($1, $2, $3, 23.50, 'payload', 'pending', $4, $5)"#,
    )
    .bind(&tx_id)
    .bind(order_id)
    .bind(user_id)
    .bind(created_at)
    .bind(created_at + Duration::minutes(30))
    .execute(pool)
    .await
    .expect("insert pix tx");

    let state = web::Data::new(support::build_state(pool.clone(), "whsec_test", false));
    let app = pix_app!(state);
    let token = generate_jwt(user_id).expect("jwt");

    for _ in 0..2 {
        let req = TestRequest::get()
            .uri(&format!("/api/pix/{tx_id}/status"))
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"].as_str(), Some("expired"));
    }

    let status: String = sqlx::query("SELECT status FROM pix_transactions WHERE id = $1")
        .bind(&tx_id)
        .fetch_one(pool)
        .await
        .expect("select pix tx")
        .get("status");
    assert_eq!(status, "expired");

    // Expiry never settles the order.
    let payment_status: String = sqlx::query("SELECT payment_status FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_one(pool)
        .await
        .expect("select order")
        .get("payment_status");
    assert_eq!(payment_status, "unpaid");
}

#[actix_web::test]
async fn cannot_generate_code_for_another_users_order() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let suffix = Uuid::new_v4().to_string();

    let owner = insert_user(pool, &format!("owner_{suffix}@marmita.com.br")).await;
    let intruder = insert_user(pool, &format!("intruder_{suffix}@marmita.com.br")).await;
    let order_id = insert_order(pool, owner, "12.00").await;

    let state = web::Data::new(support::build_state(pool.clone(), "whsec_test", false));
    let app = pix_app!(state);
    let token = generate_jwt(intruder).expect("jwt");

    let req = TestRequest::post()
        .uri("/api/pix")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(serde_json::json!({"order_id": order_id}))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 404);
}

#[actix_web::test]
async fn already_paid_order_is_rejected() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let suffix = Uuid::new_v4().to_string();

    let user_id = insert_user(pool, &format!("paid_{suffix}@marmita.com.br")).await;
    let order_id = insert_order(pool, user_id, "80.00").await;
    sqlx::query("UPDATE orders SET payment_status = 'paid', status = 'confirmed' WHERE id = $1")
        .bind(order_id)
        .execute(pool)
        .await
        .expect("mark order paid");

    let state = web::Data::new(support::build_state(pool.clone(), "whsec_test", false));
    let app = pix_app!(state);
    let token = generate_jwt(user_id).expect("jwt");

    let req = TestRequest::post()
        .uri("/api/pix")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(serde_json::json!({"order_id": order_id}))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
}
