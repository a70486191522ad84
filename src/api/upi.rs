//! UPI VPA verification and IFSC bank lookup provider.
//!
//! Hauler step 4 requires a verified VPA when the provider is enabled; with
//! the provider disabled, format validation alone suffices and lookups return
//! nothing. Provider calls carry their own bounded timeout.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpiVerification {
    pub valid: bool,
    pub account_holder: Option<String>,
}

#[async_trait]
pub trait UpiClient: Send + Sync {
    /// Check that a VPA resolves to a live account.
    async fn verify_vpa(&self, vpa: &str) -> Result<UpiVerification>;

    /// Resolve an IFSC code to its bank name, if known.
    async fn lookup_ifsc(&self, ifsc: &str) -> Result<Option<String>>;
}

/// Used when the provider is disabled by configuration: format checks have
/// already passed, so every VPA is accepted and lookups yield nothing.
#[derive(Clone, Debug)]
pub struct DisabledUpiClient;

#[async_trait]
impl UpiClient for DisabledUpiClient {
    async fn verify_vpa(&self, _vpa: &str) -> Result<UpiVerification> {
        Ok(UpiVerification {
            valid: true,
            account_holder: None,
        })
    }

    async fn lookup_ifsc(&self, _ifsc: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

pub struct HttpUpiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpUpiClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: String, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .context("failed to build upi http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct VpaResponse {
    valid: bool,
    #[serde(default)]
    account_holder: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IfscResponse {
    #[serde(rename = "BANK")]
    bank: Option<String>,
}

#[async_trait]
impl UpiClient for HttpUpiClient {
    async fn verify_vpa(&self, vpa: &str) -> Result<UpiVerification> {
        let url = format!("{}/vpa/verify", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "vpa": vpa }))
            .send()
            .await
            .context("upi provider request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("upi provider returned {}", response.status()));
        }
        let body: VpaResponse = response
            .json()
            .await
            .context("malformed upi provider response")?;
        Ok(UpiVerification {
            valid: body.valid,
            account_holder: body.account_holder,
        })
    }

    async fn lookup_ifsc(&self, ifsc: &str) -> Result<Option<String>> {
        let url = format!("{}/ifsc/{ifsc}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("ifsc lookup request failed")?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!("ifsc provider returned {}", response.status()));
        }
        let body: IfscResponse = response
            .json()
            .await
            .context("malformed ifsc provider response")?;
        Ok(body.bank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_client_accepts_and_yields_nothing() -> Result<()> {
        let client = DisabledUpiClient;
        let verification = client.verify_vpa("ravi@oksbi").await?;
        assert!(verification.valid);
        assert_eq!(verification.account_holder, None);
        assert_eq!(client.lookup_ifsc("SBIN0001234").await?, None);
        Ok(())
    }
}
