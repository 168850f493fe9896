use super::handlers::{self, types};
use super::models;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::users::register,
        handlers::users::verify_otp,
        handlers::users::resend_otp,
        handlers::users::migrate_user,
        handlers::users::list_users,
    ),
    components(schemas(
        handlers::health::Health,
        types::RegisterRequest,
        types::RegisterResponse,
        types::VerifyOtpRequest,
        types::ResendOtpResponse,
        types::MigrateRequest,
        types::MigrateResponse,
        models::User,
    )),
    tags(
        (name = "users", description = "Registration, OTP verification and migration"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
