//! Registration, OTP and migration endpoints.

use super::{
    normalize_email,
    types::{
        MigrateRequest, MigrateResponse, RegisterRequest, RegisterResponse, ResendOtpResponse,
        VerifyOtpRequest,
    },
    valid_email, valid_full_name, valid_password, valid_phone_number, ApiConfig,
};
use crate::onboard::{
    error::ServiceError,
    models::User,
    service::{AccountService, Registration},
};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Extension, Path,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

fn payload<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ServiceError> {
    match payload {
        Ok(Json(payload)) => Ok(payload),
        Err(rejection) => {
            debug!("rejected payload: {}", rejection.body_text());
            Err(ServiceError::Validation(format!(
                "Invalid payload: {}",
                rejection.body_text()
            )))
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/users/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "User registered, OTP issued", body = RegisterResponse),
        (status = 400, description = "Invalid input, or email or phone number already in use", body = String),
    ),
    tag = "users"
)]
#[instrument(skip(service, config, request))]
pub async fn register(
    service: Extension<Arc<AccountService>>,
    config: Extension<Arc<ApiConfig>>,
    request: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let request = payload(request)?;

    let email = normalize_email(&request.email);
    let phone_number = request.phone_number.trim().to_string();

    if !valid_full_name(&request.full_name) {
        return Err(ServiceError::Validation("Invalid full name".to_string()));
    }

    if !valid_email(&email) {
        return Err(ServiceError::Validation("Invalid email".to_string()));
    }

    if !valid_phone_number(&phone_number) {
        return Err(ServiceError::Validation("Invalid phone number".to_string()));
    }

    if !valid_password(request.password.expose_secret()) {
        return Err(ServiceError::Validation("Invalid password".to_string()));
    }

    let registered = service
        .register(Registration {
            full_name: request.full_name.trim().to_string(),
            email,
            phone_number,
            password: request.password,
        })
        .await?;

    Ok(Json(RegisterResponse {
        message: "User registered successfully. OTP generated.".to_string(),
        user_id: registered.user.id,
        otp_code: config.expose_otp.then_some(registered.otp.code),
    }))
}

#[utoipa::path(
    post,
    path = "/api/users/verify-otp",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "OTP verified, user is now verified", body = String, content_type = "text/plain"),
        (status = 400, description = "Invalid input, or invalid or expired OTP", body = String),
        (status = 404, description = "User not found", body = String),
    ),
    tag = "users"
)]
#[instrument(skip(service, request))]
pub async fn verify_otp(
    service: Extension<Arc<AccountService>>,
    request: Result<Json<VerifyOtpRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let request = payload(request)?;

    service.verify_otp(request.user_id, &request.otp_code).await?;

    Ok((
        StatusCode::OK,
        "OTP verified successfully. User is now verified.".to_string(),
    ))
}

#[utoipa::path(
    post,
    path = "/api/users/resend-otp/{userId}",
    params(
        ("userId" = i64, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "Previous OTPs invalidated, new OTP issued", body = ResendOtpResponse),
        (status = 400, description = "Invalid user id", body = String),
        (status = 404, description = "User not found", body = String),
    ),
    tag = "users"
)]
#[instrument(skip(service, config, user_id))]
pub async fn resend_otp(
    service: Extension<Arc<AccountService>>,
    config: Extension<Arc<ApiConfig>>,
    user_id: Result<Path<i64>, PathRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let user_id = match user_id {
        Ok(Path(user_id)) => user_id,
        Err(rejection) => {
            return Err(ServiceError::Validation(format!(
                "Invalid user id: {}",
                rejection.body_text()
            )))
        }
    };

    let otp = service.resend_otp(user_id).await?;

    Ok(Json(ResendOtpResponse {
        message: "OTP resent successfully.".to_string(),
        otp_code: config.expose_otp.then_some(otp.code),
    }))
}

#[utoipa::path(
    post,
    path = "/api/users/migrate",
    request_body = MigrateRequest,
    responses(
        (status = 200, description = "Migration recorded", body = MigrateResponse),
        (status = 400, description = "Invalid input", body = String),
        (status = 404, description = "New system user not found", body = String),
    ),
    tag = "users"
)]
#[instrument(skip(service, request))]
pub async fn migrate_user(
    service: Extension<Arc<AccountService>>,
    request: Result<Json<MigrateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let request = payload(request)?;

    let old_system_user_id = request.old_system_user_id.trim().to_string();
    if old_system_user_id.is_empty() {
        return Err(ServiceError::Validation(
            "Invalid old system user id".to_string(),
        ));
    }

    let record = service
        .migrate_user(old_system_user_id, request.new_system_user_id)
        .await?;

    Ok(Json(MigrateResponse {
        message: "User migrated successfully.".to_string(),
        old_system_user_id: record.old_system_user_id,
        new_system_user_id: record.new_system_user_id,
    }))
}

#[utoipa::path(
    get,
    path = "/api/users",
    responses(
        (status = 200, description = "Every registered user", body = [User]),
        (status = 401, description = "Missing or wrong admin token", body = String),
    ),
    tag = "users"
)]
#[instrument(skip(service, config, headers))]
pub async fn list_users(
    service: Extension<Arc<AccountService>>,
    config: Extension<Arc<ApiConfig>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServiceError> {
    if !config.authorized(&headers) {
        warn!("rejected user listing without a valid admin token");
        return Err(ServiceError::Unauthorized);
    }

    Ok(Json(service.list_users().await?))
}
