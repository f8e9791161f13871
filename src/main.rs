// src/main.rs
use std::env;
use std::sync::Arc;

use actix::Actor;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use dotenvy::dotenv;
use sqlx::PgPool;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use marmita_billing::cache::{CacheConfig, SubscriptionCache, SystemClock};
use marmita_billing::plans::PlanCatalog;
use marmita_billing::{api, docs, ws, AppState};

async fn index() -> impl Responder {
    HttpResponse::Ok().body("Service ready!")
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let stripe_secret_key = env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY required");
    let stripe_webhook_secret =
        env::var("STRIPE_WEBHOOK_SECRET").expect("STRIPE_WEBHOOK_SECRET required");

    let plans = PlanCatalog::new(
        env::var("STRIPE_PRICE_TRIAL").expect("STRIPE_PRICE_TRIAL required"),
        env::var("STRIPE_PRICE_MONTHLY").expect("STRIPE_PRICE_MONTHLY required"),
        env::var("STRIPE_PRICE_ANNUAL").expect("STRIPE_PRICE_ANNUAL required"),
    );

    let pix_key = env::var("PIX_KEY").expect("PIX_KEY required");
    let pix_merchant_name = env::var("PIX_MERCHANT_NAME").expect("PIX_MERCHANT_NAME required");
    let pix_merchant_city = env::var("PIX_MERCHANT_CITY").expect("PIX_MERCHANT_CITY required");
    let pix_psp_base_url = env::var("PIX_PSP_BASE_URL").ok();
    let pix_psp_api_key = env::var("PIX_PSP_API_KEY").ok();

    let app_base_url =
        env::var("APP_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    // The access-guard configuration is fully explicit: no hidden
    // defaults for TTL, strictness or the grace window.
    let cache_config = CacheConfig {
        ttl_minutes: env::var("SUBSCRIPTION_CACHE_TTL_MINUTES")
            .expect("SUBSCRIPTION_CACHE_TTL_MINUTES required")
            .parse()
            .expect("SUBSCRIPTION_CACHE_TTL_MINUTES must be an integer"),
        strict_mode: env::var("SUBSCRIPTION_STRICT_MODE")
            .expect("SUBSCRIPTION_STRICT_MODE required")
            .parse()
            .expect("SUBSCRIPTION_STRICT_MODE must be true or false"),
        grace_period_hours: env::var("SUBSCRIPTION_GRACE_HOURS")
            .expect("SUBSCRIPTION_GRACE_HOURS required")
            .parse()
            .expect("SUBSCRIPTION_GRACE_HOURS must be an integer"),
    };
    let subscription_cache = Arc::new(SubscriptionCache::new(cache_config, Arc::new(SystemClock)));

    let ws_hub = ws::WsHub::new().start();

    let state = web::Data::new(AppState {
        pool,
        ws_hub,
        stripe_secret_key,
        stripe_webhook_secret,
        plans,
        pix_key,
        pix_merchant_name,
        pix_merchant_city,
        pix_psp_base_url,
        pix_psp_api_key,
        app_base_url,
        subscription_cache,
    });

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/", web::get().to(index))
            .service(
                SwaggerUi::new("/docs/{_:.*}")
                    .url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
            )
            // Public auth routes
            .service(api::auth::register)
            .service(api::auth::login)
            // Protected routes
            .service(
                web::scope("/api")
                    .wrap(api::auth::JwtMiddleware)
                    .service(api::auth::logout)
                    .service(api::subscription::get_subscription_status)
                    .service(api::subscription::create_checkout)
                    .service(api::pix::create_pix_payment)
                    .service(api::pix::pix_status),
            )
            // Provider webhook (public, signature-verified)
            .service(api::webhooks_stripe::stripe_webhook)
            // Subscription change feed
            .route("/ws/subscription", web::get().to(ws::subscription_ws))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
