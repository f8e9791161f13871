pub mod auth;
pub mod pix;
pub mod stripe;
pub mod stripe_client;
pub mod subscription;
pub mod webhooks_stripe;
