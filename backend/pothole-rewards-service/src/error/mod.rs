use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RewardsError {
    #[error("Too many submissions: {0}")]
    RateLimited(String),

    #[error("Too many reports around the same location in a short time")]
    SpamDetected,

    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Invalid image data: {0}")]
    InvalidImage(String),

    #[error("Duplicate pothole image")]
    DuplicateImage,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient points: requested {requested}, available {available}")]
    InsufficientPoints { requested: i64, available: i64 },

    #[error("Payout provider error: {0}")]
    PayoutProviderError(String),

    #[error("Image decode error: {0}")]
    DecodeError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Settlement already in progress for redemption {0}")]
    SettlementInProgress(Uuid),

    #[error("Payout {reference} sent for redemption {redemption_id} but the ledger was not updated")]
    SettlementIncomplete { redemption_id: Uuid, reference: String },

    #[error("Settlement of redemption {0} could not be closed and still holds its points")]
    SettlementUnresolved(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RewardsError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RewardsError::RateLimited(_) => "RateLimited",
            RewardsError::SpamDetected => "SpamDetected",
            RewardsError::InvalidRegion(_) => "InvalidRegion",
            RewardsError::InvalidImage(_) => "InvalidImage",
            RewardsError::DuplicateImage => "DuplicateImage",
            RewardsError::InvalidAmount(_) => "InvalidAmount",
            RewardsError::InsufficientPoints { .. } => "InsufficientPoints",
            RewardsError::PayoutProviderError(_) => "PayoutProviderError",
            RewardsError::DecodeError(_) => "DecodeError",
            RewardsError::InvalidInput(_) => "InvalidInput",
            RewardsError::NotFound(_) => "NotFound",
            RewardsError::Forbidden(_) => "Forbidden",
            RewardsError::SettlementInProgress(_) => "SettlementInProgress",
            RewardsError::SettlementIncomplete { .. } => "SettlementIncomplete",
            RewardsError::SettlementUnresolved(_) => "SettlementUnresolved",
            RewardsError::Database(_)
            | RewardsError::Migration(_)
            | RewardsError::Redis(_)
            | RewardsError::Config(_)
            | RewardsError::Internal(_) => "Internal",
        }
    }

    /// Caused by the caller's input or state rather than by the service
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl ResponseError for RewardsError {
    fn status_code(&self) -> StatusCode {
        match self {
            RewardsError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            RewardsError::SpamDetected
            | RewardsError::InvalidRegion(_)
            | RewardsError::InvalidImage(_)
            | RewardsError::DuplicateImage
            | RewardsError::InvalidAmount(_)
            | RewardsError::InsufficientPoints { .. }
            | RewardsError::DecodeError(_)
            | RewardsError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RewardsError::NotFound(_) => StatusCode::NOT_FOUND,
            RewardsError::Forbidden(_) => StatusCode::FORBIDDEN,
            RewardsError::SettlementInProgress(_) => StatusCode::CONFLICT,
            RewardsError::PayoutProviderError(_) => StatusCode::BAD_GATEWAY,
            RewardsError::SettlementIncomplete { .. }
            | RewardsError::SettlementUnresolved(_)
            | RewardsError::Database(_)
            | RewardsError::Migration(_)
            | RewardsError::Redis(_)
            | RewardsError::Config(_)
            | RewardsError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "Request failed: {}", self);
        }

        // Infrastructure details stay in the logs.
        let message = match self {
            RewardsError::Database(_)
            | RewardsError::Migration(_)
            | RewardsError::Redis(_)
            | RewardsError::Config(_)
            | RewardsError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        HttpResponse::build(status).json(serde_json::json!({
            "success": false,
            "error": self.kind(),
            "message": message,
        }))
    }
}

pub type Result<T> = std::result::Result<T, RewardsError>;
