pub mod api;
pub mod cache;
pub mod db;
pub mod docs;
pub mod models;
pub mod pix_code;
pub mod plans;
pub mod reconciler;
pub mod ws;

use std::sync::Arc;

use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub ws_hub: actix::Addr<ws::WsHub>,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub plans: plans::PlanCatalog,
    pub pix_key: String,
    pub pix_merchant_name: String,
    pub pix_merchant_city: String,
    pub pix_psp_base_url: Option<String>,
    pub pix_psp_api_key: Option<String>,
    pub app_base_url: String,
    pub subscription_cache: Arc<cache::SubscriptionCache>,
}
