use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::auth::register,
        crate::api::auth::login,
        crate::api::subscription::get_subscription_status,
        crate::api::subscription::create_checkout,
        crate::api::pix::create_pix_payment,
        crate::api::pix::pix_status,
        crate::api::webhooks_stripe::stripe_webhook
    ),
    components(
        schemas(
            crate::api::auth::RegisterRequest,
            crate::api::auth::LoginRequest,
            crate::api::auth::AuthResponse,
            crate::api::subscription::CreateCheckoutRequest,
            crate::api::pix::CreatePixRequest,
            crate::cache::SubscriptionAccess,
            crate::models::SubscriptionStatus,
            crate::models::PixStatus
        )
    ),
    tags(
        (name = "auth", description = "Authentication"),
        (name = "subscription", description = "Subscription status and checkout"),
        (name = "pix", description = "PIX payment codes"),
        (name = "webhooks", description = "Callbacks from the billing provider")
    )
)]
pub struct ApiDoc;
