//! Turning a detection score into a response.

pub mod content;
pub mod engine;
pub mod honeypot;
pub mod strategy;

pub use content::{default_protector, ContentProtector, MarkerProtector, ProtectorChain, RobotsMetaProtector};
pub use engine::{Assessment, PreventionDecision, PreventionEngine};
pub use honeypot::{DecoyPageGenerator, HoneypotGenerator};
pub use strategy::Strategy;
