use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::settings::ClientReportConfig;
use crate::models::detection::DetectionResult;
use crate::models::request::RequestContext;
use crate::storage::memory::{get_json, put_json};

use super::pipeline::DetectionPipeline;

/// Built-in weights for signals raised by the in-page script.
pub const DEFAULT_SIGNAL_WEIGHTS: &[(&str, u32)] = &[
    ("webdriver", 80),
    ("headless", 70),
    ("no_languages", 40),
    ("mechanical_scrolling", 40),
    ("cookies_disabled", 30),
    ("no_plugins", 25),
];

/// Prefix applied to client-reported signal names so they never collide
/// with server-side signals.
pub const SIGNAL_PREFIX: &str = "client_";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("report has no signals field")]
    MissingSignals,

    #[error("report signals must be a list")]
    SignalsNotAList,

    #[error("report signals list is empty")]
    EmptySignals,

    #[error("report signal at index {0} is neither a name nor a {{name, weight}} object")]
    InvalidSignal(usize),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ReportedSignal {
    Name(String),
    Weighted {
        name: String,
        #[serde(default)]
        weight: Option<f64>,
    },
}

impl ReportedSignal {
    pub fn name(&self) -> &str {
        match self {
            ReportedSignal::Name(name) | ReportedSignal::Weighted { name, .. } => name,
        }
    }

    pub fn explicit_weight(&self) -> Option<f64> {
        match self {
            ReportedSignal::Name(_) => None,
            ReportedSignal::Weighted { weight, .. } => *weight,
        }
    }
}

/// Signals posted by the in-page script.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientReport {
    pub signals: Vec<ReportedSignal>,
    pub path: Option<String>,
    pub url: Option<String>,
}

impl ClientReport {
    pub fn from_slice(body: &[u8]) -> Result<Self, ReportError> {
        let value: Value = serde_json::from_slice(body)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ReportError> {
        let signals = match value.get("signals") {
            None | Some(Value::Null) => return Err(ReportError::MissingSignals),
            Some(Value::Array(items)) if items.is_empty() => return Err(ReportError::EmptySignals),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    serde_json::from_value::<ReportedSignal>(item.clone())
                        .ok()
                        .filter(|s| !s.name().trim().is_empty())
                        .ok_or(ReportError::InvalidSignal(i))
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(ReportError::SignalsNotAList),
        };

        let text = |field: &str| value.get(field).and_then(Value::as_str).map(str::to_string);

        Ok(Self {
            signals,
            path: text("path"),
            url: text("url"),
        })
    }
}

/// Turns client reports into detection results and folds them into the
/// cached detection for the reporting visitor.
pub struct ClientReportScorer {
    weights: HashMap<String, u32>,
    default_weight: u32,
}

impl ClientReportScorer {
    pub fn new(config: &ClientReportConfig) -> Self {
        let mut weights: HashMap<String, u32> = DEFAULT_SIGNAL_WEIGHTS
            .iter()
            .map(|(name, weight)| (name.to_string(), *weight))
            .collect();
        weights.extend(config.weights.iter().map(|(k, v)| (k.clone(), *v)));

        Self {
            weights,
            default_weight: config.default_weight,
        }
    }

    pub fn weight_for(&self, signal: &ReportedSignal) -> f64 {
        signal.explicit_weight().unwrap_or_else(|| {
            f64::from(
                self.weights
                    .get(signal.name())
                    .copied()
                    .unwrap_or(self.default_weight),
            )
        })
    }

    /// Score a report on its own. The sum is capped at 100.
    pub fn score(&self, report: &ClientReport) -> DetectionResult {
        let mut result = DetectionResult::new();
        for signal in &report.signals {
            let weight = self.weight_for(signal);
            result.add_signal(format!("{}{}", SIGNAL_PREFIX, signal.name()), weight, weight);
        }
        result
    }

    /// Parse, score and merge a report into the reporter's cached detection.
    /// Nothing is stored when the report is malformed.
    pub fn ingest(
        &self,
        pipeline: &DetectionPipeline,
        ctx: &RequestContext,
        body: &[u8],
    ) -> Result<DetectionResult, ReportError> {
        let report = ClientReport::from_slice(body)?;
        let reported = self.score(&report);

        // Attribute the report to the page it was raised on.
        let mut page = ctx.clone();
        if let Some(path) = report.path.as_deref().filter(|p| p.starts_with('/')) {
            page.method = "GET".to_string();
            page.path = path.to_string();
        }
        let key = pipeline.page_cache_key(&page);
        let store = pipeline.store().as_ref();

        let mut merged = match get_json::<DetectionResult>(store, &key) {
            Ok(Some(existing)) => existing,
            Ok(None) => DetectionResult::new().with_threshold(pipeline.threshold()),
            Err(e) => {
                warn!(ip = %ctx.client_ip, error = %e, "Detection cache unavailable for client report");
                DetectionResult::new().with_threshold(pipeline.threshold())
            }
        };
        merged.merge(reported);

        if let Err(e) = put_json(store, &key, &merged, pipeline.cache_ttl()) {
            warn!(ip = %ctx.client_ip, error = %e, "Failed to store client report result");
        }

        info!(
            ip = %ctx.client_ip,
            page = report.path.as_deref().unwrap_or("-"),
            signals = report.signals.len(),
            score = merged.score(),
            detected = merged.is_detected(),
            "Client report ingested"
        );

        Ok(merged)
    }
}
