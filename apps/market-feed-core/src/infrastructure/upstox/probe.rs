//! HTTP Credential Probe
//!
//! Verifies a credential by calling a cheap authenticated endpoint (the user
//! profile) with the credential as bearer token.

use std::time::Duration;

use async_trait::async_trait;

use crate::application::ports::{HealthProbe, ProbeOutcome};
use crate::domain::credential::Credential;
use crate::infrastructure::config::CredentialSettings;

/// Probe construction failure.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// HTTP client could not be built.
    #[error("failed to build probe client: {0}")]
    Client(#[from] reqwest::Error),
}

/// [`HealthProbe`] over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpHealthProbe {
    /// Create a probe calling `url` with the given timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Client`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Create a probe from the credential settings.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Client`] if the HTTP client cannot be built.
    pub fn from_settings(settings: &CredentialSettings) -> Result<Self, ProbeError> {
        Self::new(settings.probe_url.clone(), settings.probe_timeout)
    }

    /// Probed endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, credential: &Credential) -> ProbeOutcome {
        let response = self
            .client
            .get(&self.url)
            .bearer_auth(credential.secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await;

        match response {
            Ok(response) => {
                let outcome = ProbeOutcome::from_status(response.status().as_u16());
                tracing::debug!(
                    credential = credential.id(),
                    status = response.status().as_u16(),
                    outcome = ?outcome,
                    "Credential probed"
                );
                outcome
            }
            Err(err) => {
                let reason = if err.is_timeout() {
                    "timeout".to_string()
                } else if err.is_connect() {
                    format!("connect: {err}")
                } else {
                    err.to_string()
                };
                tracing::debug!(
                    credential = credential.id(),
                    reason = %reason,
                    "Credential probe failed"
                );
                ProbeOutcome::Indeterminate { reason }
            }
        }
    }
}
