use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const MAX_SCORE: u8 = 100;
pub const DEFAULT_THRESHOLD: u8 = 60;

/// Value attached to a named signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Flag(bool),
    Number(f64),
    Text(String),
    Structured(serde_json::Value),
}

impl SignalValue {
    /// Ranking weight used by [`DetectionResult::top_signals`].
    /// Non-numeric values count as 1.
    pub fn weight(&self) -> f64 {
        match self {
            SignalValue::Number(n) => *n,
            _ => 1.0,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<bool> for SignalValue {
    fn from(v: bool) -> Self {
        SignalValue::Flag(v)
    }
}

impl From<f64> for SignalValue {
    fn from(v: f64) -> Self {
        SignalValue::Number(v)
    }
}

impl From<u64> for SignalValue {
    fn from(v: u64) -> Self {
        SignalValue::Number(v as f64)
    }
}

impl From<usize> for SignalValue {
    fn from(v: usize) -> Self {
        SignalValue::Number(v as f64)
    }
}

impl From<&str> for SignalValue {
    fn from(v: &str) -> Self {
        SignalValue::Text(v.to_string())
    }
}

impl From<String> for SignalValue {
    fn from(v: String) -> Self {
        SignalValue::Text(v)
    }
}

impl From<serde_json::Value> for SignalValue {
    fn from(v: serde_json::Value) -> Self {
        SignalValue::Structured(v)
    }
}

/// Ordinal classification of a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Confidence {
    /// Fixed bands: 0-39 low, 40-59 medium, 60-79 high, 80-100 very high.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=39 => Confidence::Low,
            40..=59 => Confidence::Medium,
            60..=79 => Confidence::High,
            _ => Confidence::VeryHigh,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
            Confidence::VeryHigh => "very_high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_threshold() -> u8 {
    DEFAULT_THRESHOLD
}

/// Aggregated score and named signals for one request.
///
/// The score is kept in `[0, 100]` after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    score: u8,
    signals: BTreeMap<String, SignalValue>,
    #[serde(default = "default_threshold")]
    threshold: u8,
}

impl Default for DetectionResult {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionResult {
    pub fn new() -> Self {
        Self {
            score: 0,
            signals: BTreeMap::new(),
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold.min(MAX_SCORE);
        self
    }

    /// Record a signal and add `weight` to the score, clamping to `[0, 100]`.
    /// A signal with the same name is replaced.
    pub fn add_signal(&mut self, name: impl Into<String>, value: impl Into<SignalValue>, weight: f64) {
        self.signals.insert(name.into(), value.into());
        let next = (f64::from(self.score) + weight).round();
        self.score = next.clamp(0.0, f64::from(MAX_SCORE)) as u8;
    }

    /// Record a signal without touching the score.
    pub fn set_signal(&mut self, name: impl Into<String>, value: impl Into<SignalValue>) {
        self.signals.insert(name.into(), value.into());
    }

    /// Fold `other` into `self`: scores add (capped at 100) and `other`
    /// wins signal name collisions.
    pub fn merge(&mut self, other: DetectionResult) {
        let sum = u16::from(self.score) + u16::from(other.score);
        self.score = sum.min(u16::from(MAX_SCORE)) as u8;
        self.signals.extend(other.signals);
    }

    pub fn score(&self) -> u8 {
        self.score
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn signals(&self) -> &BTreeMap<String, SignalValue> {
        &self.signals
    }

    pub fn signal(&self, name: &str) -> Option<&SignalValue> {
        self.signals.get(name)
    }

    pub fn has_signal(&self, name: &str) -> bool {
        self.signals.contains_key(name)
    }

    pub fn confidence(&self) -> Confidence {
        Confidence::from_score(self.score)
    }

    pub fn is_detected(&self) -> bool {
        self.score >= self.threshold
    }

    /// The `n` heaviest signals, descending. Ties keep name order.
    pub fn top_signals(&self, n: usize) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .signals
            .iter()
            .map(|(name, value)| (name.as_str(), value.weight()))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(n);
        ranked
    }

    /// Outbound summary.
    pub fn report(&self) -> DetectionReport {
        DetectionReport {
            score: self.score,
            signals: self.signals.clone(),
            detected: self.is_detected(),
            confidence: self.confidence(),
        }
    }
}

/// Serialized form handed to callers and logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionReport {
    pub score: u8,
    pub signals: BTreeMap<String, SignalValue>,
    pub detected: bool,
    pub confidence: Confidence,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(score: f64) -> DetectionResult {
        let mut r = DetectionResult::new();
        r.add_signal("base", score, score);
        r
    }

    #[test]
    fn test_add_signal_clamps() {
        let mut r = DetectionResult::new();
        r.add_signal("a", true, 70.0);
        r.add_signal("b", true, 70.0);
        assert_eq!(r.score(), 100);
        r.add_signal("c", true, -250.0);
        assert_eq!(r.score(), 0);
        assert_eq!(r.signals().len(), 3);
    }

    #[test]
    fn test_score_stays_in_range_for_mixed_sequences() {
        let weights = [35.0, -10.0, 80.0, 12.5, -300.0, 99.0, 0.4, 150.0];
        let mut r = DetectionResult::new();
        for (i, w) in weights.iter().enumerate() {
            r.add_signal(format!("s{}", i), *w, *w);
            assert!(r.score() <= 100);
            let mut other = scored(w.abs().min(100.0));
            other.add_signal("extra", true, *w);
            r.merge(other);
            assert!(r.score() <= 100);
        }
    }

    #[test]
    fn test_merge_adds_and_other_wins() {
        let mut a = DetectionResult::new();
        a.add_signal("shared", 1.0, 30.0);
        a.add_signal("only_a", true, 5.0);
        let mut b = DetectionResult::new();
        b.add_signal("shared", 2.0, 40.0);
        b.add_signal("only_b", "x", 10.0);

        a.merge(b);
        assert_eq!(a.score(), 85);
        assert_eq!(a.signal("shared"), Some(&SignalValue::Number(2.0)));
        assert!(a.has_signal("only_a"));
        assert!(a.has_signal("only_b"));
    }

    #[test]
    fn test_merge_caps_at_100() {
        let mut a = scored(70.0);
        a.merge(scored(60.0));
        assert_eq!(a.score(), 100);
    }

    #[test]
    fn test_confidence_boundaries() {
        let cases = [
            (0, Confidence::Low),
            (39, Confidence::Low),
            (40, Confidence::Medium),
            (59, Confidence::Medium),
            (60, Confidence::High),
            (79, Confidence::High),
            (80, Confidence::VeryHigh),
            (100, Confidence::VeryHigh),
        ];
        for (score, expected) in cases {
            assert_eq!(Confidence::from_score(score), expected, "score {}", score);
            assert_eq!(scored(f64::from(score)).confidence(), expected);
        }
    }

    #[test]
    fn test_detected_uses_threshold() {
        assert!(!scored(59.0).is_detected());
        assert!(scored(60.0).is_detected());
        assert!(!scored(60.0).with_threshold(70).is_detected());
    }

    #[test]
    fn test_top_signals_order() {
        let mut r = DetectionResult::new();
        r.set_signal("flag", true);
        r.set_signal("beta", 10.0);
        r.set_signal("alpha", 10.0);
        r.set_signal("big", 30.0);
        r.set_signal("text", "gptbot");

        let top = r.top_signals(3);
        assert_eq!(top, vec![("big", 30.0), ("alpha", 10.0), ("beta", 10.0)]);
        let all = r.top_signals(10);
        assert_eq!(all[3..], [("flag", 1.0), ("text", 1.0)]);
    }

    #[test]
    fn test_serde_roundtrip_for_cache() {
        let mut r = DetectionResult::new().with_threshold(70);
        r.add_signal("n", 3u64, 30.0);
        r.set_signal("f", true);
        r.set_signal("t", "text");
        r.set_signal("s", serde_json::json!({"k": [1, 2]}));
        let v = serde_json::to_value(&r).unwrap();
        let back: DetectionResult = serde_json::from_value(v).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_report_shape() {
        let report = scored(85.0).report();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["score"], 85);
        assert_eq!(json["detected"], true);
        assert_eq!(json["confidence"], "very_high");
    }
}
