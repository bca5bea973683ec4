use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::analysis::client::{AnalysisRequest, AnalysisService};
use crate::analysis::report::{AnalysisError, CognitiveLoad, VoiceAnalysisReport};
use crate::config::Settings;

/// HTTP analysis backend. Posts the WAV body, expects a JSON report back.
pub struct RemoteAnalysisService {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl RemoteAnalysisService {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let endpoint = settings
            .analysis
            .endpoint
            .trim()
            .trim_end_matches('/')
            .to_string();
        if endpoint.is_empty() {
            anyhow::bail!(
                "Remote analysis needs an endpoint. Set analysis.endpoint in config."
            );
        }

        Ok(Self {
            http: Client::builder()
                .timeout(std::time::Duration::from_secs(
                    settings.analysis.timeout_secs.max(1),
                ))
                .build()
                .context("Failed to build analysis HTTP client")?,
            endpoint,
            api_key: settings.analysis.api_key.trim().to_string(),
        })
    }

    fn request_url(&self) -> String {
        format!("{}/v1/voice-analysis", self.endpoint)
    }
}

#[async_trait]
impl AnalysisService for RemoteAnalysisService {
    async fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> Result<VoiceAnalysisReport, AnalysisError> {
        let mut builder = self
            .http
            .post(self.request_url())
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .header("X-Recording-Id", request.recording_id.as_str())
            .header("X-Duration-Secs", request.duration_secs.to_string())
            .body(request.audio.as_ref().clone());

        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AnalysisError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Rejected(format!("{}: {}", status, body.trim())));
        }
        if !status.is_success() {
            return Err(AnalysisError::Unavailable(format!(
                "service returned {}",
                status
            )));
        }

        let payload: RemoteReport = response
            .json()
            .await
            .map_err(|e| AnalysisError::Malformed(e.to_string()))?;

        payload.into_report(request.duration_secs)
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteReport {
    #[serde(default)]
    duration: Option<u64>,
    #[serde(default)]
    transcript: String,
    speech_rate: u32,
    clarity_score: u32,
    confidence_level: u32,
    cognitive_load_indicator: String,
    #[serde(default)]
    risk_assessment: String,
    #[serde(default)]
    recommendations: Vec<String>,
}

impl RemoteReport {
    fn into_report(self, recorded_secs: u64) -> Result<VoiceAnalysisReport, AnalysisError> {
        let cognitive_load_level = self
            .cognitive_load_indicator
            .parse::<CognitiveLoad>()
            .map_err(AnalysisError::Malformed)?;

        Ok(VoiceAnalysisReport {
            duration_secs: self.duration.unwrap_or(recorded_secs),
            transcript: self.transcript,
            speech_rate_wpm: self.speech_rate,
            clarity_score_pct: self.clarity_score,
            confidence_level_pct: self.confidence_level,
            cognitive_load_level,
            risk_assessment: self.risk_assessment,
            recommendations: self.recommendations,
        })
    }
}
