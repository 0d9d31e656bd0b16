use crate::config::PayoutConfig;
use crate::error::{Result, RewardsError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Confirmation from the payout provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutReceipt {
    pub reference: String,
}

/// Sends airtime to a phone number. Any error is a definite failure; retries
/// are the provider's business.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayoutProvider: Send + Sync {
    async fn send_airtime(&self, phone: &str, amount: i64) -> Result<PayoutReceipt>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Recipient<'a> {
    phone_number: &'a str,
    amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AirtimeResponse {
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    responses: Vec<AirtimeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AirtimeEntry {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Africa's Talking style airtime API client
pub struct AirtimeClient {
    http: reqwest::Client,
    config: PayoutConfig,
}

impl AirtimeClient {
    pub fn new(config: PayoutConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RewardsError::Config(format!("Failed to build payout client: {}", e)))?;

        Ok(Self { http, config })
    }

    fn recipients(&self, phone: &str, amount: i64) -> Result<String> {
        let recipient = Recipient {
            phone_number: phone,
            amount: format!("{} {}.00", self.config.currency, amount),
        };
        serde_json::to_string(&[recipient])
            .map_err(|e| RewardsError::Internal(format!("Failed to encode recipients: {}", e)))
    }
}

/// The provider sends the literal string "None" when there is no error
fn is_error_message(message: Option<&str>) -> bool {
    message
        .map(str::trim)
        .map_or(false, |m| !m.is_empty() && !m.eq_ignore_ascii_case("none"))
}

fn interpret(response: AirtimeResponse) -> Result<PayoutReceipt> {
    if is_error_message(response.error_message.as_deref()) {
        return Err(RewardsError::PayoutProviderError(
            response.error_message.unwrap_or_default(),
        ));
    }

    let entry = response
        .responses
        .into_iter()
        .next()
        .ok_or_else(|| RewardsError::PayoutProviderError("No recipient response".to_string()))?;

    if is_error_message(entry.error_message.as_deref()) {
        return Err(RewardsError::PayoutProviderError(
            entry.error_message.unwrap_or_default(),
        ));
    }

    match entry.request_id {
        Some(reference) if !reference.trim().is_empty() => Ok(PayoutReceipt { reference }),
        _ => Err(RewardsError::PayoutProviderError(
            "Missing request id".to_string(),
        )),
    }
}

#[async_trait]
impl PayoutProvider for AirtimeClient {
    async fn send_airtime(&self, phone: &str, amount: i64) -> Result<PayoutReceipt> {
        let recipients = self.recipients(phone, amount)?;
        let form = [
            ("username", self.config.username.as_str()),
            ("recipients", recipients.as_str()),
        ];

        let response = self
            .http
            .post(&self.config.api_url)
            .header("apiKey", &self.config.api_key)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| RewardsError::PayoutProviderError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RewardsError::PayoutProviderError(format!(
                "Provider returned {}",
                status
            )));
        }

        let body: AirtimeResponse = response
            .json()
            .await
            .map_err(|e| RewardsError::PayoutProviderError(e.to_string()))?;

        interpret(body)
    }
}
