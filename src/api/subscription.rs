// src/api/subscription.rs

use actix_web::web::ReqData;
use actix_web::{get, post, web, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::api::stripe_client::{self, CreateCheckoutSessionRequest};
use crate::cache;
use crate::{db, AppState};

#[utoipa::path(
    get,
    path = "/api/subscription",
    tag = "subscription",
    responses(
        (status = 200, description = "Current access verdict", body = crate::cache::SubscriptionAccess),
        (status = 503, description = "Strict mode: verification failed, outcome unknown")
    )
)]
#[get("/subscription")]
pub async fn get_subscription_status(
    state: web::Data<AppState>,
    user_id: ReqData<i32>,
) -> impl Responder {
    match cache::check_subscription(&state, *user_id).await {
        Ok(access) => HttpResponse::Ok().json(access),
        Err(e) => {
            // Unknown, not denied: the client should retry, not treat
            // the user as unsubscribed.
            log::warn!("strict subscription check failed user_id={}: {e}", *user_id);
            HttpResponse::ServiceUnavailable().json(json!({
                "error": "temporarily unable to verify subscription",
                "retry": true
            }))
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCheckoutRequest {
    /// trial | monthly | annual
    pub plan_type: String,
}

#[utoipa::path(
    post,
    path = "/api/subscription/checkout",
    tag = "subscription",
    request_body = CreateCheckoutRequest,
    responses(
        (status = 200, description = "Checkout session created, redirect URL returned"),
        (status = 400, description = "Unknown plan type"),
        (status = 500, description = "Price misconfigured or provider error")
    )
)]
#[post("/subscription/checkout")]
pub async fn create_checkout(
    state: web::Data<AppState>,
    user_id: ReqData<i32>,
    payload: web::Json<CreateCheckoutRequest>,
) -> impl Responder {
    let user_id = *user_id;

    let Some(plan) = state.plans.by_plan_type(&payload.plan_type) else {
        return HttpResponse::BadRequest().json(json!({"error": "unknown plan type"}));
    };

    if plan.price_id.is_empty() {
        log::error!("price id for plan {} is not configured", payload.plan_type);
        return HttpResponse::InternalServerError().finish();
    }

    let email = match db::get_user_email(&state.pool, user_id).await {
        Ok(Some(e)) => e,
        Ok(None) => return HttpResponse::BadRequest().json(json!({"error": "user not found"})),
        Err(e) => {
            log::error!("select user email error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    // The configured price must exist, be active, and live in the same
    // mode (test vs live) as the secret key before anyone is redirected.
    let price = match stripe_client::get_price(&state.stripe_secret_key, &plan.price_id).await {
        Ok(p) => p,
        Err(e) => {
            log::error!("price lookup failed for {}: {e}", plan.price_id);
            return HttpResponse::InternalServerError().finish();
        }
    };

    if !price.active {
        log::error!("configured price {} is inactive", price.id);
        return HttpResponse::InternalServerError().finish();
    }

    if price.livemode != stripe_client::key_is_live(&state.stripe_secret_key) {
        log::error!(
            "price {} mode (livemode={}) does not match the configured secret key",
            price.id,
            price.livemode
        );
        return HttpResponse::InternalServerError().finish();
    }

    let session = match stripe_client::create_checkout_session(
        &state.stripe_secret_key,
        CreateCheckoutSessionRequest {
            price_id: plan.price_id.clone(),
            customer_email: email,
            success_url: format!("{}/assinatura/sucesso", state.app_base_url),
            cancel_url: format!("{}/assinatura", state.app_base_url),
            user_id,
        },
    )
    .await
    {
        Ok(s) => s,
        Err(e) => {
            log::error!("checkout session create failed user_id={user_id}: {e}");
            return HttpResponse::BadGateway().json(json!({
                "error": "checkout session create failed"
            }));
        }
    };

    let Some(url) = session.url else {
        log::error!("checkout session {} has no redirect url", session.id);
        return HttpResponse::InternalServerError().finish();
    };

    log::info!(
        "checkout session created user_id={user_id} plan={} session={}",
        payload.plan_type,
        session.id
    );

    HttpResponse::Ok().json(json!({"url": url, "session_id": session.id}))
}
