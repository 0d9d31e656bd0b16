use crate::clock::Clock;
use crate::config::{ContentConfig, SpamConfig};
use crate::db::ReportStore;
use crate::error::{Result, RewardsError};
use crate::metrics;
use crate::models::{ContentVerdict, GeoPoint, NewReport, Region, Report};
use crate::services::{
    derive_device_id, image_hasher, ContentValidator, GeoSpamDetector, PointsLedger, RateLimiter,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;
use tokio::time::timeout;
use uuid::Uuid;

const MAX_DEVICE_ID_LEN: usize = 128;

/// Image as it arrived from the client
#[derive(Debug, Clone)]
pub enum ReportImage {
    Bytes(Vec<u8>),
    /// Raw base64 or a `data:<mime>;base64,` URL
    Base64(String),
}

impl ReportImage {
    fn into_bytes(self) -> Result<Vec<u8>> {
        let bytes = match self {
            ReportImage::Bytes(bytes) => bytes,
            ReportImage::Base64(encoded) => {
                let data = encoded.rsplit(',').next().unwrap_or(&encoded).trim();
                STANDARD
                    .decode(data)
                    .map_err(|_| RewardsError::InvalidImage("Invalid image data".to_string()))?
            }
        };
        if bytes.is_empty() {
            return Err(RewardsError::InvalidImage("Empty image".to_string()));
        }
        Ok(bytes)
    }
}

impl From<Vec<u8>> for ReportImage {
    fn from(bytes: Vec<u8>) -> Self {
        ReportImage::Bytes(bytes)
    }
}

/// A report as received from the client
#[derive(Debug, Clone)]
pub struct SubmitReport {
    pub user_id: Uuid,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub image: ReportImage,
    pub latitude: f64,
    pub longitude: f64,
    pub region: String,
    pub severity: i16,
    pub device_id: Option<String>,
}

/// Runs the anti-abuse checks in order and persists the surviving report
pub struct ReportIntake {
    reports: Arc<dyn ReportStore>,
    ledger: Arc<PointsLedger>,
    rate_limiter: Arc<RateLimiter>,
    spam_detector: Arc<GeoSpamDetector>,
    validator: Arc<dyn ContentValidator>,
    clock: Arc<dyn Clock>,
    spam: SpamConfig,
    content: ContentConfig,
}

impl ReportIntake {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reports: Arc<dyn ReportStore>,
        ledger: Arc<PointsLedger>,
        rate_limiter: Arc<RateLimiter>,
        spam_detector: Arc<GeoSpamDetector>,
        validator: Arc<dyn ContentValidator>,
        clock: Arc<dyn Clock>,
        spam: SpamConfig,
        content: ContentConfig,
    ) -> Self {
        Self {
            reports,
            ledger,
            rate_limiter,
            spam_detector,
            validator,
            clock,
            spam,
            content,
        }
    }

    pub async fn submit(&self, input: SubmitReport) -> Result<Report> {
        let user_id = input.user_id;
        let result = self.run(input).await;

        match &result {
            Ok(report) => {
                metrics::record_submission("accepted");
                tracing::info!(
                    report_id = %report.id,
                    user_id = %user_id,
                    region = %report.region,
                    severity = report.severity,
                    ai_valid = report.ai_valid,
                    "Report submitted"
                );
            }
            Err(e) => {
                metrics::record_submission(e.kind());
                if e.is_client_error() {
                    tracing::warn!(user_id = %user_id, kind = e.kind(), "Report rejected: {}", e);
                } else {
                    tracing::error!(user_id = %user_id, "Report submission failed: {}", e);
                }
            }
        }

        result
    }

    async fn run(&self, input: SubmitReport) -> Result<Report> {
        self.rate_limiter
            .check_submission(input.user_id, input.client_ip.as_deref())
            .await?;

        let location = GeoPoint::new(input.latitude, input.longitude);
        if self.spam_detector.is_spam(input.user_id, location).await? {
            return Err(RewardsError::SpamDetected);
        }

        let region: Region = input
            .region
            .parse()
            .map_err(|_| RewardsError::InvalidRegion(input.region.clone()))?;
        if !(1..=5).contains(&input.severity) {
            return Err(RewardsError::InvalidInput(format!(
                "Severity must be between 1 and 5, got {}",
                input.severity
            )));
        }
        if !location.is_valid() {
            return Err(RewardsError::InvalidInput(format!(
                "Coordinates out of range: {}, {}",
                input.latitude, input.longitude
            )));
        }

        let image = input.image.into_bytes()?;
        let fingerprint = image_hasher::fingerprint(&image).map_err(|e| match e {
            RewardsError::DecodeError(msg) => RewardsError::InvalidImage(msg),
            other => other,
        })?;

        if self.is_duplicate(&fingerprint).await? {
            return Err(RewardsError::DuplicateImage);
        }

        let verdict = self.validate_content(&image).await;

        let device_id = input
            .device_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| id.chars().take(MAX_DEVICE_ID_LEN).collect())
            .unwrap_or_else(|| {
                derive_device_id(input.user_agent.as_deref(), input.client_ip.as_deref())
            });

        self.ledger.open_account(input.user_id, None).await?;

        let report = Report::new(
            NewReport {
                owner_id: input.user_id,
                image_fingerprint: fingerprint,
                location,
                region,
                severity: input.severity,
                verdict,
                submitted_ip: input.client_ip,
                device_id,
            },
            self.clock.now(),
        );

        self.reports.insert_report(report).await
    }

    async fn is_duplicate(&self, fingerprint: &str) -> Result<bool> {
        let max_distance = self.spam.duplicate_max_distance;
        if max_distance == 0 {
            return self.reports.fingerprint_exists(fingerprint).await;
        }

        let known = self.reports.all_fingerprints().await?;
        Ok(known.iter().any(|existing| {
            image_hasher::hamming_distance(existing, fingerprint)
                .map_or(false, |d| d <= max_distance)
        }))
    }

    /// A validator that errors or overruns its budget yields an invalid verdict
    async fn validate_content(&self, image: &[u8]) -> ContentVerdict {
        let rejected = ContentVerdict {
            is_valid: false,
            score: 0.0,
        };

        match timeout(self.content.validation_timeout(), self.validator.validate(image)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                tracing::warn!("Content validation failed: {}", e);
                rejected
            }
            Err(_) => {
                tracing::warn!(
                    "Content validation timed out after {}ms",
                    self.content.validation_timeout_ms
                );
                rejected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{RateLimitConfig, RewardsConfig};
    use crate::db::{LedgerStore, MemoryCounterStore, MemoryStore};
    use crate::models::ReportStatus;
    use crate::services::content_validator::{MockContentValidator, StubContentValidator};
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use std::io::Cursor;

    const ACCRA: (f64, f64) = (5.6037, -0.1870);

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        intake: ReportIntake,
    }

    fn fixture_with(validator: Arc<dyn ContentValidator>, spam: SpamConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let ledger = Arc::new(PointsLedger::new(
            store.clone(),
            clock.clone(),
            RewardsConfig::default(),
        ));
        let limiter = Arc::new(RateLimiter::new(
            Arc::new(MemoryCounterStore::new(clock.clone())),
            RateLimitConfig::default(),
        ));
        let detector = Arc::new(GeoSpamDetector::new(
            store.clone(),
            clock.clone(),
            spam.clone(),
        ));
        let intake = ReportIntake::new(
            store.clone(),
            ledger,
            limiter,
            detector,
            validator,
            clock.clone(),
            spam,
            ContentConfig::default(),
        );
        Fixture {
            store,
            clock,
            intake,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            Arc::new(StubContentValidator::default()),
            SpamConfig::default(),
        )
    }

    /// Distinct image per seed: a bright square at a seed-dependent spot
    fn image(seed: u32) -> Vec<u8> {
        let ox = (seed * 7) % 48;
        let oy = (seed * 13) % 48;
        let img = GrayImage::from_fn(64, 64, |x, y| {
            let inside = x >= ox && x < ox + 16 && y >= oy && y < oy + 16;
            Luma([if inside { 250 } else { 10 }])
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn submission(user_id: Uuid, seed: u32) -> SubmitReport {
        SubmitReport {
            user_id,
            client_ip: Some("41.66.0.9".to_string()),
            user_agent: Some("PotholeApp/1.0".to_string()),
            image: image(seed).into(),
            latitude: ACCRA.0,
            longitude: ACCRA.1,
            region: "Greater Accra".to_string(),
            severity: 3,
            device_id: None,
        }
    }

    #[tokio::test]
    async fn test_valid_submission_is_pending() {
        let fx = fixture();
        let user = Uuid::new_v4();

        let report = fx.intake.submit(submission(user, 1)).await.unwrap();

        assert_eq!(report.status, ReportStatus::Pending);
        assert_eq!(report.owner_id, Some(user));
        assert_eq!(report.points_awarded, 0);
        assert!(!report.is_spam);
        assert_eq!(report.device_id.len(), 64);
        assert_eq!(report.submitted_ip.as_deref(), Some("41.66.0.9"));
        assert_eq!(fx.store.get_account(user).await.unwrap().points_balance, 0);
    }

    #[tokio::test]
    async fn test_supplied_device_id_is_kept() {
        let fx = fixture();
        let mut input = submission(Uuid::new_v4(), 1);
        input.device_id = Some(" handset-42 ".to_string());

        let report = fx.intake.submit(input).await.unwrap();
        assert_eq!(report.device_id, "handset-42");
    }

    #[tokio::test]
    async fn test_unknown_region_is_rejected() {
        let fx = fixture();
        let mut input = submission(Uuid::new_v4(), 1);
        input.region = "Atlantis".to_string();

        let result = fx.intake.submit(input).await;
        assert!(matches!(result, Err(RewardsError::InvalidRegion(r)) if r == "Atlantis"));
        assert_eq!(fx.store.report_count(), 0);
    }

    #[tokio::test]
    async fn test_severity_out_of_range_is_rejected() {
        let fx = fixture();
        let mut input = submission(Uuid::new_v4(), 1);
        input.severity = 9;

        assert!(matches!(
            fx.intake.submit(input).await,
            Err(RewardsError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_undecodable_image_is_invalid() {
        let fx = fixture();
        let mut input = submission(Uuid::new_v4(), 1);
        input.image = b"not a png".to_vec().into();

        assert!(matches!(
            fx.intake.submit(input).await,
            Err(RewardsError::InvalidImage(_))
        ));
        assert_eq!(fx.store.report_count(), 0);
    }

    #[test]
    fn test_base64_image_accepts_data_url() {
        let encoded = STANDARD.encode(b"\x89PNG");
        assert_eq!(
            ReportImage::Base64(encoded.clone()).into_bytes().unwrap(),
            b"\x89PNG"
        );
        assert_eq!(
            ReportImage::Base64(format!("data:image/png;base64,{}", encoded))
                .into_bytes()
                .unwrap(),
            b"\x89PNG"
        );
        assert!(matches!(
            ReportImage::Base64("***".into()).into_bytes(),
            Err(RewardsError::InvalidImage(_))
        ));
        assert!(matches!(
            ReportImage::Bytes(Vec::new()).into_bytes(),
            Err(RewardsError::InvalidImage(_))
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_precedes_image_decoding() {
        let fx = fixture();
        let user = Uuid::new_v4();
        for seed in 0..3 {
            let mut input = submission(user, seed);
            input.latitude += f64::from(seed) * 0.01;
            fx.intake.submit(input).await.unwrap();
        }

        let mut input = submission(user, 10);
        input.image = ReportImage::Base64("%%% not base64 %%%".to_string());
        assert!(matches!(
            fx.intake.submit(input).await,
            Err(RewardsError::RateLimited(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_image_is_rejected() {
        let fx = fixture();
        fx.intake.submit(submission(Uuid::new_v4(), 5)).await.unwrap();

        let result = fx.intake.submit(submission(Uuid::new_v4(), 5)).await;

        assert!(matches!(result, Err(RewardsError::DuplicateImage)));
        assert_eq!(fx.store.report_count(), 1);
    }

    #[tokio::test]
    async fn test_near_duplicate_within_distance_is_rejected() {
        let spam = SpamConfig {
            duplicate_max_distance: 1024,
            ..SpamConfig::default()
        };
        let fx = fixture_with(Arc::new(StubContentValidator::default()), spam);
        fx.intake.submit(submission(Uuid::new_v4(), 1)).await.unwrap();

        let result = fx.intake.submit(submission(Uuid::new_v4(), 2)).await;
        assert!(matches!(result, Err(RewardsError::DuplicateImage)));
    }

    #[tokio::test]
    async fn test_rate_limit_precedes_other_checks() {
        let fx = fixture();
        let user = Uuid::new_v4();
        for seed in 0..3 {
            let mut input = submission(user, seed);
            input.latitude += f64::from(seed) * 0.01;
            fx.intake.submit(input).await.unwrap();
        }

        let mut input = submission(user, 10);
        input.region = "Atlantis".to_string();
        assert!(matches!(
            fx.intake.submit(input).await,
            Err(RewardsError::RateLimited(_))
        ));
    }

    #[tokio::test]
    async fn test_fourth_nearby_report_is_spam() {
        let fx = fixture();
        let user = Uuid::new_v4();
        for seed in 0..3 {
            fx.intake.submit(submission(user, seed)).await.unwrap();
        }

        // Past the 60 s rate window, inside the 5 min spam window
        fx.clock.advance(chrono::Duration::seconds(61));
        let result = fx.intake.submit(submission(user, 3)).await;
        assert!(matches!(result, Err(RewardsError::SpamDetected)));

        fx.clock.advance(chrono::Duration::minutes(5));
        assert!(fx.intake.submit(submission(user, 3)).await.is_ok());
    }

    #[tokio::test]
    async fn test_validator_verdict_sets_spam_flag() {
        let mut validator = MockContentValidator::new();
        validator.expect_validate().times(1).returning(|_| {
            Ok(ContentVerdict {
                is_valid: false,
                score: 0.12,
            })
        });
        let fx = fixture_with(Arc::new(validator), SpamConfig::default());

        let report = fx.intake.submit(submission(Uuid::new_v4(), 1)).await.unwrap();

        assert!(!report.ai_valid);
        assert!(report.is_spam);
        assert_eq!(report.ai_score, 0.12);
    }

    #[tokio::test]
    async fn test_validator_error_counts_as_invalid() {
        let mut validator = MockContentValidator::new();
        validator
            .expect_validate()
            .returning(|_| Err(RewardsError::Internal("model offline".into())));
        let fx = fixture_with(Arc::new(validator), SpamConfig::default());

        let report = fx.intake.submit(submission(Uuid::new_v4(), 1)).await.unwrap();

        assert!(!report.ai_valid);
        assert_eq!(report.ai_score, 0.0);
    }
}
