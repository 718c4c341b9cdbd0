pub mod detection;
pub mod request;

pub use detection::{Confidence, DetectionReport, DetectionResult, SignalValue};
pub use request::RequestContext;
