//! AI crawler detection and adaptive prevention.
//!
//! Requests are scored by a [`protection::pipeline::DetectionPipeline`] and
//! answered through a [`prevention::PreventionEngine`]. The [`proxy`] module
//! wires both into a reverse proxy.

pub mod clock;
pub mod config;
pub mod models;
pub mod prevention;
pub mod protection;
pub mod proxy;
pub mod storage;
