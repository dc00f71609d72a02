//! Prometheus exporter for the PHD2 auto-guider event stream.

pub mod client;
pub mod config;
pub mod export;
pub mod labels;
pub mod phd2;
pub mod sink;
