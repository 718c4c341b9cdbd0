pub mod defaults;
pub mod settings;

pub use settings::{FingerprintMode, PreventionMode, Settings};
