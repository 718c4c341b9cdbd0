//! Detection pipeline and its analyzers.
//!
//! Each analyzer inspects one category of evidence and returns a partial
//! [`DetectionResult`]. The [`pipeline::DetectionPipeline`] merges them in a
//! fixed order and stops early on conclusive evidence.

pub mod behavioral;
pub mod client_report;
pub mod fingerprint;
pub mod header_analysis;
pub mod known_crawlers;
pub mod pipeline;
pub mod rate_limiter;
pub mod request_pattern;
pub mod stats;

use thiserror::Error;

use crate::models::detection::DetectionResult;
use crate::models::request::RequestContext;
use crate::storage::memory::StoreError;

/// Outcome of a single analyzer run.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Partial result; the pipeline keeps going.
    Continue(DetectionResult),
    /// Conclusive result; no further analyzers run.
    Terminal(DetectionResult),
}

impl Step {
    pub fn into_result(self) -> DetectionResult {
        match self {
            Step::Continue(r) | Step::Terminal(r) => r,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::Terminal(_))
    }
}

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Failed(String),
}

/// A pluggable evidence source.
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    fn analyze(&self, ctx: &RequestContext) -> Result<Step, AnalyzerError>;
}
