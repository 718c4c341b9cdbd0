use std::fmt;

use serde::{Deserialize, Serialize};

/// Response strategy applied to a scored request, in decreasing severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// 403 without touching the upstream.
    Block,
    /// Synthetic decoy page with trap links.
    Honeypot,
    /// Upstream response with HTML replaced by a placeholder.
    AlternateContent,
    /// Upstream response held for a minimum total time.
    Delay,
    /// Upstream response, protector applied in place.
    Monitor,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Block => "block",
            Strategy::Honeypot => "honeypot",
            Strategy::AlternateContent => "alternate_content",
            Strategy::Delay => "delay",
            Strategy::Monitor => "monitor",
        }
    }

    /// Parse a strategy name from configuration.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "block" => Some(Self::Block),
            "honeypot" => Some(Self::Honeypot),
            "alternate" | "alternate_content" | "alternate-content" => Some(Self::AlternateContent),
            "delay" => Some(Self::Delay),
            "monitor" => Some(Self::Monitor),
            _ => None,
        }
    }

    /// Whether the upstream is skipped entirely.
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, Strategy::Block | Strategy::Honeypot)
    }
}
