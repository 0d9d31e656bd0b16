use crate::error::Result;
use crate::models::ContentVerdict;
use async_trait::async_trait;

/// Decides whether an image plausibly shows a pothole
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentValidator: Send + Sync {
    async fn validate(&self, image_bytes: &[u8]) -> Result<ContentVerdict>;
}

/// Accept-everything validator used until a server-side classifier is wired in.
///
/// Clients run their own detector before upload; this only records a
/// confidence so reviewers can sort the queue.
#[derive(Debug, Clone, Default)]
pub struct StubContentValidator {
    bypass: bool,
}

impl StubContentValidator {
    pub fn new(bypass: bool) -> Self {
        Self { bypass }
    }
}

#[async_trait]
impl ContentValidator for StubContentValidator {
    async fn validate(&self, _image_bytes: &[u8]) -> Result<ContentVerdict> {
        let score = if self.bypass { 0.99 } else { 0.95 };
        Ok(ContentVerdict {
            is_valid: true,
            score,
        })
    }
}
