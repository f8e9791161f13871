// src/api/pix.rs
//
// PIX payment lifecycle: code generation at checkout and the status
// poll the payment screen runs until the code is paid or expires.

use actix_web::web::ReqData;
use actix_web::{get, post, web, HttpResponse, Responder};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{PixStatus, PixTransaction};
use crate::pix_code::{self, PixCodeRequest};
use crate::{db, AppState};

const PIX_EXPIRATION_MINUTES: i64 = 30;
const QR_RENDER_BASE: &str = "https://api.qrserver.com/v1/create-qr-code/";

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePixRequest {
    pub order_id: Uuid,
}

fn last8(order_id: Uuid) -> String {
    let simple = order_id.simple().to_string();
    simple[simple.len() - 8..].to_string()
}

fn qr_code_url(payload: &str) -> Result<String, String> {
    let query = serde_urlencoded::to_string([("size", "300x300"), ("data", payload)])
        .map_err(|e| e.to_string())?;
    Ok(format!("{QR_RENDER_BASE}?{query}"))
}

#[utoipa::path(
    post,
    path = "/api/pix",
    tag = "pix",
    request_body = CreatePixRequest,
    responses(
        (status = 200, description = "PIX code generated"),
        (status = 400, description = "Order already paid or invalid"),
        (status = 404, description = "Order not found"),
        (status = 500, description = "Server error")
    )
)]
#[post("/pix")]
pub async fn create_pix_payment(
    state: web::Data<AppState>,
    user_id: ReqData<i32>,
    payload: web::Json<CreatePixRequest>,
) -> impl Responder {
    let user_id = *user_id;
    let order_id = payload.order_id;

    let order = match db::get_order_for_user(&state.pool, order_id, user_id).await {
        Ok(Some(o)) => o,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({"error": "order not found"}));
        }
        Err(e) => {
            log::error!("create_pix get order error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    if order.payment_status == "paid" {
        return HttpResponse::BadRequest().json(json!({"error": "order already paid"}));
    }

    let amount: f64 = match order.total.parse() {
        Ok(v) => v,
        Err(e) => {
            log::error!("order {} has unparseable total {}: {e}", order.id, order.total);
            return HttpResponse::InternalServerError().finish();
        }
    };

    let created_at = Utc::now();
    let tx_id = format!("PIX-{}-{}", created_at.timestamp_millis(), last8(order_id));

    let br_code = match pix_code::build_payload(&PixCodeRequest {
        payee_key: &state.pix_key,
        payee_name: &state.pix_merchant_name,
        payee_city: &state.pix_merchant_city,
        amount,
        transaction_id: &tx_id,
        description: Some(&format!("Pedido {}", last8(order_id))),
    }) {
        Ok(p) => p,
        Err(e) => {
            log::error!("pix payload build failed: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let qr_code_url = match qr_code_url(&br_code) {
        Ok(u) => u,
        Err(e) => {
            log::error!("qr url encode failed: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let tx = PixTransaction {
        id: tx_id,
        order_id,
        user_id,
        amount: order.total.clone(),
        payload_text: br_code,
        status: PixStatus::Pending,
        created_at,
        expires_at: created_at + Duration::minutes(PIX_EXPIRATION_MINUTES),
    };

    if let Err(e) = db::insert_pix_transaction(&state.pool, &tx).await {
        log::error!("insert pix transaction error: {e}");
        return HttpResponse::InternalServerError().finish();
    }

    log::info!(
        "pix code generated tx_id={} order_id={} amount={}",
        tx.id,
        tx.order_id,
        tx.amount
    );

    HttpResponse::Ok().json(json!({
        "transaction_id": tx.id,
        "br_code": tx.payload_text,
        "qr_code_url": qr_code_url,
        "amount": tx.amount,
        "expires_at": tx.expires_at,
    }))
}

fn status_response(status: PixStatus) -> HttpResponse {
    let message = match status {
        PixStatus::Pending => "Aguardando pagamento",
        PixStatus::Paid => "Pagamento confirmado",
        PixStatus::Expired => "Código PIX expirado",
    };
    HttpResponse::Ok().json(json!({"status": status, "message": message}))
}

#[utoipa::path(
    get,
    path = "/api/pix/{transaction_id}/status",
    tag = "pix",
    params(("transaction_id" = String, Path, description = "PIX transaction id")),
    responses(
        (status = 200, description = "Current transaction status"),
        (status = 404, description = "Transaction not found")
    )
)]
#[get("/pix/{transaction_id}/status")]
pub async fn pix_status(
    state: web::Data<AppState>,
    user_id: ReqData<i32>,
    path: web::Path<String>,
) -> impl Responder {
    let user_id = *user_id;
    let tx_id = path.into_inner();

    let tx = match db::get_pix_transaction_for_user(&state.pool, &tx_id, user_id).await {
        Ok(Some(tx)) => tx,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({"error": "transaction not found"}));
        }
        Err(e) => {
            log::error!("pix_status select error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    // Terminal states short-circuit: no further writes, ever.
    if tx.status.is_terminal() {
        return status_response(tx.status);
    }

    // Expiry is authoritative over any settlement confirmation that
    // arrives after the deadline.
    let now = Utc::now();
    if now > tx.expires_at {
        match db::expire_pix_if_pending(&state.pool, &tx.id).await {
            Ok(true) => return status_response(PixStatus::Expired),
            Ok(false) => return reload_terminal_status(&state, &tx.id, user_id).await,
            Err(e) => {
                log::error!("pix expire write error tx_id={}: {e}", tx.id);
                return HttpResponse::InternalServerError().finish();
            }
        }
    }

    match fetch_settlement_status(&state, &tx.id).await {
        Ok(SettlementStatus::Paid) => {
            match db::settle_pix_and_order(&state.pool, &tx.id, tx.order_id, now).await {
                Ok(true) => {
                    log::info!("pix settled tx_id={} order_id={}", tx.id, tx.order_id);
                    status_response(PixStatus::Paid)
                }
                // Another poll got there first; report whatever it wrote.
                Ok(false) => reload_terminal_status(&state, &tx.id, user_id).await,
                Err(e) => {
                    log::error!("pix settle write error tx_id={}: {e}", tx.id);
                    HttpResponse::InternalServerError().finish()
                }
            }
        }
        Ok(SettlementStatus::Pending) => status_response(PixStatus::Pending),
        Err(e) => {
            // Settlement source unreachable: the outcome is unknown,
            // which is not a confirmation and not a denial.
            log::warn!("pix settlement check failed tx_id={}: {e}", tx.id);
            status_response(PixStatus::Pending)
        }
    }
}

async fn reload_terminal_status(state: &AppState, tx_id: &str, user_id: i32) -> HttpResponse {
    match db::get_pix_transaction_for_user(&state.pool, tx_id, user_id).await {
        Ok(Some(tx)) => status_response(tx.status),
        Ok(None) => HttpResponse::NotFound().json(json!({"error": "transaction not found"})),
        Err(e) => {
            log::error!("pix_status reload error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

enum SettlementStatus {
    Paid,
    Pending,
}

#[derive(Debug, Deserialize)]
struct PspChargeResponse {
    status: Option<String>,
}

/// Authoritative settlement query against the PSP, by transaction id.
async fn fetch_settlement_status(
    state: &AppState,
    tx_id: &str,
) -> Result<SettlementStatus, String> {
    let (Some(base_url), Some(api_key)) = (
        state.pix_psp_base_url.as_deref(),
        state.pix_psp_api_key.as_deref(),
    ) else {
        return Err("PIX PSP is not configured".to_string());
    };

    let url = format!("{}/v2/cob/{tx_id}", base_url.trim_end_matches('/'));
    let resp = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| e.to_string())?
        .get(&url)
        .bearer_auth(api_key)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = resp.status();
    let text = resp.text().await.map_err(|e| e.to_string())?;
    if !status.is_success() {
        return Err(format!("psp status error status={status} body={text}"));
    }

    let parsed: PspChargeResponse =
        serde_json::from_str(&text).map_err(|e| format!("parse error: {e}; body={text}"))?;

    match parsed.status.as_deref() {
        Some("CONCLUIDA") => Ok(SettlementStatus::Paid),
        _ => Ok(SettlementStatus::Pending),
    }
}
