use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::analysis::mock::MockAnalysisService;
use crate::analysis::remote::RemoteAnalysisService;
use crate::analysis::report::{AnalysisError, VoiceAnalysisReport};
use crate::config::{AnalysisProvider, Settings};

/// A finalized recording submitted for analysis
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub recording_id: String,
    /// WAV encoded audio
    pub audio: Arc<Vec<u8>>,
    pub duration_secs: u64,
    pub sample_rate: u32,
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(&self, request: AnalysisRequest)
        -> Result<VoiceAnalysisReport, AnalysisError>;

    fn name(&self) -> &'static str;
}

/// Build an analysis service from runtime settings.
pub fn build_service(settings: &Settings) -> Result<Arc<dyn AnalysisService>> {
    match settings.analysis.provider {
        AnalysisProvider::Mock => Ok(Arc::new(MockAnalysisService::from_settings(settings))),
        AnalysisProvider::Remote => Ok(Arc::new(RemoteAnalysisService::from_settings(settings)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_build_mock_service() {
        let service = build_service(&Settings::default()).unwrap();
        assert_eq!(service.name(), "mock");
    }

    #[test]
    fn remote_provider_requires_endpoint() {
        let mut settings = Settings::default();
        settings.analysis.provider = AnalysisProvider::Remote;

        let err = match build_service(&settings) {
            Ok(_) => panic!("expected service creation to fail"),
            Err(e) => e.to_string(),
        };
        assert!(err.contains("analysis.endpoint"));
    }
}
