pub mod content_validator;
pub mod device_fingerprint;
pub mod geo_spam_detector;
pub mod image_hasher;
pub mod intake;
pub mod ledger;
pub mod payout;
pub mod rate_limiter;
pub mod redemption;
pub mod review;

pub use content_validator::{ContentValidator, StubContentValidator};
pub use device_fingerprint::{client_ip, derive_device_id};
pub use geo_spam_detector::{haversine_distance, GeoSpamDetector};
pub use intake::{ReportImage, ReportIntake, SubmitReport};
pub use ledger::PointsLedger;
pub use payout::{AirtimeClient, PayoutProvider, PayoutReceipt};
pub use rate_limiter::RateLimiter;
pub use redemption::{normalize_ghana_phone, RedemptionWorkflow};
pub use review::{ReviewEngine, ReviewOutcome};
