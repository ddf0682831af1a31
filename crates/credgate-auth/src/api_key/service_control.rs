//! Service Control API key checks
//!
//! `services.check` answers whether a consumer (here `api_key:<key>`) may
//! call a managed service. An empty `checkErrors` list means the key is
//! valid; otherwise each entry's `detail` describes one problem.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use percent_encoding::utf8_percent_encode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use super::{AuthorizationCheck, CheckOutcome};
use crate::config::{PATH_SEGMENT, SERVICE_CONTROL_BASE_URL};
use crate::error::{AuthError, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckRequest<'a> {
    operation: Operation<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Operation<'a> {
    operation_id: &'a str,
    operation_name: String,
    consumer_id: String,
    start_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckResponse {
    #[serde(default)]
    check_errors: Vec<CheckError>,
}

#[derive(Debug, Deserialize)]
struct CheckError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

impl CheckError {
    fn describe(self) -> String {
        match (self.detail, self.code) {
            (Some(detail), _) if !detail.is_empty() => detail,
            (_, Some(code)) => code,
            _ => "unspecified check error".to_string(),
        }
    }
}

/// Checks API keys with the Service Control API.
#[derive(Clone)]
pub struct ServiceControlClient {
    base_url: String,
    access_token: SecretString,
    http_client: reqwest::Client,
}

impl fmt::Debug for ServiceControlClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceControlClient")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl ServiceControlClient {
    /// Create a client authenticating with the OAuth `access_token`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the HTTP client cannot be built.
    pub fn new(access_token: SecretString, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Configuration(format!("HTTP client build failed: {e}")))?;

        Ok(Self {
            base_url: SERVICE_CONTROL_BASE_URL.to_string(),
            access_token,
            http_client,
        })
    }

    /// Send checks to `base_url` instead of the public endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn check_url(&self, scope: &str) -> String {
        format!(
            "{}/v1/services/{}:check",
            self.base_url,
            utf8_percent_encode(scope, PATH_SEGMENT)
        )
    }
}

#[async_trait]
impl AuthorizationCheck for ServiceControlClient {
    async fn check(&self, scope: &str, api_key: &str) -> Result<CheckOutcome> {
        let operation_id = Uuid::new_v4().to_string();
        let request = CheckRequest {
            operation: Operation {
                operation_id: &operation_id,
                operation_name: format!("check:{operation_id}"),
                consumer_id: format!("api_key:{api_key}"),
                start_time: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            },
        };

        debug!(scope, operation_id = %operation_id, "Sending services.check");

        let response = self
            .http_client
            .post(self.check_url(scope))
            .bearer_auth(self.access_token.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(scope, error = %e, "Service Control request failed");
                AuthError::Fetch(format!("Service Control API call failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(scope, status = %status, "Service Control returned error status");
            return Err(AuthError::Fetch(format!(
                "Service Control API returned status {status}"
            )));
        }

        let body: CheckResponse = response.json().await.map_err(|e| {
            AuthError::Fetch(format!("Service Control response parse failed: {e}"))
        })?;

        if body.check_errors.is_empty() {
            Ok(CheckOutcome::Valid)
        } else {
            Ok(CheckOutcome::Rejected(
                body.check_errors.into_iter().map(CheckError::describe).collect(),
            ))
        }
    }
}
