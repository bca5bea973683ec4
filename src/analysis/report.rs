use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Cognitive load indicator derived from the recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CognitiveLoad {
    Low,
    Medium,
    High,
}

impl CognitiveLoad {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl fmt::Display for CognitiveLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CognitiveLoad {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("Unknown cognitive load level: {}", other)),
        }
    }
}

/// Scored assessment of one recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceAnalysisReport {
    pub duration_secs: u64,
    pub transcript: String,
    pub speech_rate_wpm: u32,
    pub clarity_score_pct: u32,
    pub confidence_level_pct: u32,
    pub cognitive_load_level: CognitiveLoad,
    pub risk_assessment: String,
    pub recommendations: Vec<String>,
}

impl VoiceAnalysisReport {
    /// Check the documented contract of an analysis service response
    pub fn check_contract(&self) -> Result<(), AnalysisError> {
        for (name, value) in [
            ("clarity score", self.clarity_score_pct),
            ("confidence level", self.confidence_level_pct),
        ] {
            if value > 100 {
                return Err(AnalysisError::Malformed(format!(
                    "{} {} is outside 0-100",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Failures reported by an analysis service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// The service could not be reached or timed out
    #[error("Analysis service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the recording
    #[error("Analysis rejected: {0}")]
    Rejected(String),

    /// The service answered with something that is not a valid report
    #[error("Malformed analysis report: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> VoiceAnalysisReport {
        VoiceAnalysisReport {
            duration_secs: 12,
            transcript: "hello".to_string(),
            speech_rate_wpm: 150,
            clarity_score_pct: 90,
            confidence_level_pct: 88,
            cognitive_load_level: CognitiveLoad::Low,
            risk_assessment: "fine".to_string(),
            recommendations: vec![],
        }
    }

    #[test]
    fn percentages_over_100_break_contract() {
        assert!(report().check_contract().is_ok());

        let mut bad = report();
        bad.confidence_level_pct = 101;
        assert!(matches!(
            bad.check_contract(),
            Err(AnalysisError::Malformed(_))
        ));
    }

    #[test]
    fn cognitive_load_parses_case_insensitively() {
        assert_eq!("medium".parse::<CognitiveLoad>(), Ok(CognitiveLoad::Medium));
        assert!("extreme".parse::<CognitiveLoad>().is_err());
    }
}
