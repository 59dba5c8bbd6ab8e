//! JSON-over-HTTP client for an external advisory service.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::oracle::{InterventionRequest, Oracle, OracleError, Phase, ProblemSummary, SwapSuggestion};

/// Posts to `{base}/v1/strategy` and `{base}/v1/intervention`.
#[derive(Clone)]
pub struct HttpOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOracle {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, OracleError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, text));
        }
        response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))
    }
}

/// 503s and bodies that say "overloaded" are worth retrying; nothing else is.
fn classify_failure(status: StatusCode, body: String) -> OracleError {
    let message = format!("{}: {}", status, body);
    if status == StatusCode::SERVICE_UNAVAILABLE || body.to_lowercase().contains("overloaded") {
        OracleError::Overloaded(message)
    } else {
        OracleError::Unavailable(message)
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn phase_strategy(&self, summary: &ProblemSummary) -> Result<Vec<Phase>, OracleError> {
        self.post("/v1/strategy", summary).await
    }

    async fn propose_intervention(
        &self,
        request: &InterventionRequest,
    ) -> Result<Option<SwapSuggestion>, OracleError> {
        self.post("/v1/intervention", request).await
    }
}
