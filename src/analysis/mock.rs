//! Simulated voice analysis
//!
//! Waits a fixed delay and returns plausible random scores. No signal
//! processing happens here.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::analysis::client::{AnalysisRequest, AnalysisService};
use crate::analysis::report::{AnalysisError, CognitiveLoad, VoiceAnalysisReport};
use crate::config::Settings;

const MOCK_TRANSCRIPT: &str =
    "The sun rises over the peaceful mountains, painting the sky with shades of orange and pink...";

const MOCK_RISK_ASSESSMENT: &str = "Based on the voice analysis, cognitive patterns appear within normal range. No immediate concerns detected.";

const MOCK_RECOMMENDATIONS: [&str; 4] = [
    "Continue regular voice monitoring",
    "Maintain healthy sleep schedule",
    "Engage in mentally stimulating activities",
    "Follow up in 3 months for reassessment",
];

pub struct MockAnalysisService {
    delay: Duration,
    rng: Mutex<StdRng>,
}

impl MockAnalysisService {
    pub fn new(delay: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            delay,
            rng: Mutex::new(rng),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            Duration::from_millis(settings.analysis.delay_ms),
            settings.analysis.seed,
        )
    }

    fn score(&self, duration_secs: u64) -> VoiceAnalysisReport {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        let cognitive_load_level = if rng.gen_bool(0.3) {
            CognitiveLoad::Medium
        } else {
            CognitiveLoad::Low
        };

        VoiceAnalysisReport {
            duration_secs,
            transcript: MOCK_TRANSCRIPT.to_string(),
            speech_rate_wpm: rng.gen_range(145..165),
            clarity_score_pct: rng.gen_range(80..95),
            confidence_level_pct: rng.gen_range(85..95),
            cognitive_load_level,
            risk_assessment: MOCK_RISK_ASSESSMENT.to_string(),
            recommendations: MOCK_RECOMMENDATIONS.iter().map(|r| r.to_string()).collect(),
        }
    }
}

#[async_trait]
impl AnalysisService for MockAnalysisService {
    async fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> Result<VoiceAnalysisReport, AnalysisError> {
        if request.audio.is_empty() {
            return Err(AnalysisError::Rejected("recording is empty".to_string()));
        }

        tracing::debug!(
            "mock analysis of {} ({} bytes, {}s)",
            request.recording_id,
            request.audio.len(),
            request.duration_secs
        );

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        Ok(self.score(request.duration_secs))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
