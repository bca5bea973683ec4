//! Voice analysis services
//!
//! The booking workflow hands a finalized recording to an
//! [`AnalysisService`] and stores the [`VoiceAnalysisReport`] it returns.
//! Two backends exist: a local mock that simulates latency and scores, and a
//! remote HTTP service.

mod client;
mod mock;
mod passage;
mod remote;
mod report;

pub use client::{build_service, AnalysisRequest, AnalysisService};
pub use mock::MockAnalysisService;
pub use passage::{passage_word_count, READING_PASSAGE};
pub use remote::RemoteAnalysisService;
pub use report::{AnalysisError, CognitiveLoad, VoiceAnalysisReport};
