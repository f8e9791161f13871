use actix::{Actor, ActorContext, AsyncContext, Handler, Message, Recipient};
use actix_web::{Error, HttpRequest, HttpResponse, web};
use actix_web_actors::ws;
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::models::SubscriptionRecord;
use crate::AppState;

static NEXT_SESSION_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Message)]
#[rtype(result = "()")]
struct WsMessage(pub String);

#[derive(Message)]
#[rtype(result = "()")]
struct Connect {
    user_id: i32,
    session_id: usize,
    addr: Recipient<WsMessage>,
}

#[derive(Message)]
#[rtype(result = "()")]
struct Disconnect {
    user_id: i32,
    session_id: usize,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct NotifySubscription {
    pub user_id: i32,
    pub event: SubscriptionEvent,
}

#[derive(Clone, Debug, Serialize)]
pub struct SubscriptionEvent {
    pub event: &'static str,
    pub data: SubscriptionEventData,
}

#[derive(Clone, Debug, Serialize)]
pub struct SubscriptionEventData {
    pub status: String,
    pub plan_name: Option<String>,
    pub plan_price: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

pub struct WsHub {
    sessions: HashMap<i32, HashMap<usize, Recipient<WsMessage>>>,
}

impl WsHub {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Actor for WsHub {
    type Context = actix::Context<Self>;
}

impl Handler<Connect> for WsHub {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Self::Context) -> Self::Result {
        self.sessions
            .entry(msg.user_id)
            .or_default()
            .insert(msg.session_id, msg.addr);
    }
}

impl Handler<Disconnect> for WsHub {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Self::Context) -> Self::Result {
        if let Some(user_sessions) = self.sessions.get_mut(&msg.user_id) {
            user_sessions.remove(&msg.session_id);
            if user_sessions.is_empty() {
                self.sessions.remove(&msg.user_id);
            }
        }
    }
}

impl Handler<NotifySubscription> for WsHub {
    type Result = ();

    fn handle(&mut self, msg: NotifySubscription, _: &mut Self::Context) -> Self::Result {
        if let Some(user_sessions) = self.sessions.get(&msg.user_id) {
            if let Ok(payload) = serde_json::to_string(&msg.event) {
                for addr in user_sessions.values() {
                    let _ = addr.do_send(WsMessage(payload.clone()));
                }
            }
        }
    }
}

struct WsSession {
    user_id: i32,
    session_id: usize,
    hub: actix::Addr<WsHub>,
}

impl WsSession {
    fn new(user_id: i32, hub: actix::Addr<WsHub>) -> Self {
        Self {
            user_id,
            session_id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            hub,
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hub.do_send(Connect {
            user_id: self.user_id,
            session_id: self.session_id,
            addr: ctx.address().recipient(),
        });
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        self.hub.do_send(Disconnect {
            user_id: self.user_id,
            session_id: self.session_id,
        });
    }
}

impl Handler<WsMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: WsMessage, ctx: &mut Self::Context) -> Self::Result {
        ctx.text(msg.0);
    }
}

impl actix::StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match item {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Text(_)) => {}
            Ok(ws::Message::Binary(_)) => {}
            Ok(ws::Message::Continuation(_)) => {}
            Ok(ws::Message::Nop) => {}
            Err(_) => ctx.stop(),
        }
    }
}

#[derive(Deserialize)]
struct WsQuery {
    token: String,
}

#[derive(Deserialize)]
struct Claims {
    sub: i32,
    #[allow(dead_code)]
    exp: usize,
}

/// WebSocket feed of subscription changes for the authenticated user.
/// Browsers cannot set an Authorization header on the upgrade request,
/// so the JWT arrives as a query parameter.
pub async fn subscription_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let token = serde_urlencoded::from_str::<WsQuery>(req.query_string())
        .ok()
        .map(|q| q.token)
        .filter(|t| !t.is_empty());

    let Some(token) = token else {
        return Err(actix_web::error::ErrorUnauthorized("Missing token"));
    };

    let user_id = decode_user_id(&token)?;
    ws::start(WsSession::new(user_id, state.ws_hub.clone()), &req, stream)
}

fn decode_user_id(token: &str) -> Result<i32, Error> {
    let secret = std::env::var("JWT_SECRET")
        .map_err(|_| actix_web::error::ErrorInternalServerError("JWT secret not set"))?;
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
    .map(|data| data.claims.sub)
    .map_err(|_| actix_web::error::ErrorUnauthorized("Invalid token"))
}

/// Best-effort broadcast after a reconcile. A user with no open sessions
/// simply gets nothing; failures never propagate into the reconciler.
pub fn notify_subscription_changed(
    hub: &actix::Addr<WsHub>,
    record: &SubscriptionRecord,
) {
    let event = SubscriptionEvent {
        event: "subscription.updated",
        data: SubscriptionEventData {
            status: record.status.as_str().to_string(),
            plan_name: record.plan_name.clone(),
            plan_price: record.plan_price.clone(),
            expires_at: record.current_period_end,
            cancel_at_period_end: record.cancel_at_period_end,
        },
    };

    hub.do_send(NotifySubscription {
        user_id: record.user_id,
        event,
    });
}
