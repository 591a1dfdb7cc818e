//! Best-effort forwarding of analysis results to the downstream backend.

use std::time::Duration;

use chrono::{DateTime, Local};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::annotate::{ModelSource, PredictionResult, Severity};
use crate::error::Result;

pub const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(10);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const API_KEY_HEADER: &str = "x-api-key";
const UNKNOWN_ID: &str = "unknown";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisSummary<'a> {
    prediction: &'a str,
    prediction_fr: &'a str,
    confidence: f32,
    disease_detected: bool,
    severity: Severity,
    recommendations: &'a [String],
    should_water: bool,
    model_used: ModelSource,
    analysed_at: DateTime<Local>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisPayload<'a> {
    capteur_id: &'a str,
    user_id: &'a str,
    analysis_result: AnalysisSummary<'a>,
    timestamp: DateTime<Local>,
}

/// What the backend answered on its health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BackendProbe {
    pub status_code: u16,
    pub response: Value,
}

#[derive(Clone)]
pub struct BackendClient {
    base_url: String,
    api_key: String,
    enabled: bool,
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, enabled: bool) -> Self {
        BackendClient {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            enabled,
            http: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn headers(&self) -> HeaderMap {
        let mut header_map = HeaderMap::new();
        match HeaderValue::from_str(&self.api_key) {
            Ok(value) => {
                header_map.insert(HeaderName::from_static(API_KEY_HEADER), value);
            }
            Err(_) => warn!("Backend API key is not a valid header value; sending without it"),
        }
        header_map
    }

    /// Posts `result` to the backend. Never fails: the outcome is the return value.
    pub async fn send_analysis(
        &self,
        result: &PredictionResult,
        capteur_id: Option<&str>,
        user_id: Option<&str>,
    ) -> bool {
        if !self.enabled {
            info!("Backend relay disabled");
            return true;
        }

        let payload = AnalysisPayload {
            capteur_id: capteur_id.unwrap_or(UNKNOWN_ID),
            user_id: user_id.unwrap_or(UNKNOWN_ID),
            analysis_result: AnalysisSummary {
                prediction: &result.prediction,
                prediction_fr: &result.prediction_fr,
                confidence: result.confidence,
                disease_detected: result.disease_detected,
                severity: result.severity,
                recommendations: &result.recommendations,
                should_water: result.should_water,
                model_used: result.model_used,
                analysed_at: result.timestamp,
            },
            timestamp: result.timestamp,
        };

        let url = format!("{}/api/analysis/receive", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(&payload)
            .timeout(ANALYSIS_TIMEOUT)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                error!("Failed to reach backend at {}: {}", url, err);
                return false;
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                warn!(
                    "Could not read backend response ({}): {}",
                    status.as_u16(),
                    err
                );
                String::new()
            }
        };
        if status.is_success() {
            match serde_json::from_str::<Value>(&body) {
                Ok(json) => info!("Results sent to backend ({}): {}", status.as_u16(), json),
                Err(_) => info!(
                    "Results sent to backend ({}), non-JSON response",
                    status.as_u16()
                ),
            }
            true
        } else {
            warn!("Backend error: {} - {}", status.as_u16(), body);
            false
        }
    }

    /// Calls the backend health endpoint.
    pub async fn probe(&self) -> Result<BackendProbe> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;

        let status_code = response.status().as_u16();
        let text = response.text().await?;
        let response = if status_code == 200 {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        Ok(BackendProbe {
            status_code,
            response,
        })
    }
}
