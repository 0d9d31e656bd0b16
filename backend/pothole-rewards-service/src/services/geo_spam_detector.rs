use crate::clock::Clock;
use crate::config::SpamConfig;
use crate::db::ReportStore;
use crate::error::Result;
use crate::models::GeoPoint;
use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance in meters between two WGS84 points
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    EARTH_RADIUS_METERS * 2.0 * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Flags bursts of one user's reports clustered in space and time.
///
/// Recomputed per submission from the user's own recent reports; no cluster
/// state is kept between calls.
pub struct GeoSpamDetector {
    reports: Arc<dyn ReportStore>,
    clock: Arc<dyn Clock>,
    config: SpamConfig,
}

impl GeoSpamDetector {
    pub fn new(reports: Arc<dyn ReportStore>, clock: Arc<dyn Clock>, config: SpamConfig) -> Self {
        Self {
            reports,
            clock,
            config,
        }
    }

    pub async fn is_spam(&self, user_id: Uuid, candidate: GeoPoint) -> Result<bool> {
        let since = self.clock.now() - Duration::seconds(self.config.window_seconds);
        let recent = self.reports.recent_locations(user_id, since).await?;

        let nearby = count_within(&recent, candidate, self.config.radius_meters);
        let spam = nearby >= self.config.nearby_threshold;

        if spam {
            tracing::debug!(
                user_id = %user_id,
                nearby,
                recent = recent.len(),
                "Spam indicator: clustered submissions"
            );
        }

        Ok(spam)
    }
}

fn count_within(points: &[GeoPoint], center: GeoPoint, radius_meters: f64) -> usize {
    points
        .iter()
        .filter(|p| haversine_distance(**p, center) <= radius_meters)
        .count()
}
