use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

/// OTLP transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    Http,
}

impl fmt::Display for OtlpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Grpc => "grpc",
            Self::Http => "http",
        })
    }
}

/// `[telemetry]`: optional span export over OTLP.
///
/// ```toml
/// [telemetry]
/// enabled = true
/// endpoint = "http://tempo:4317"
/// protocol = "grpc"
/// sample_ratio = 0.25
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub service_name: String,
    /// Fraction of traces kept, `0.0..=1.0`.
    pub sample_ratio: f64,
    pub protocol: OtlpProtocol,
    /// Exporter timeout in seconds.
    pub timeout_seconds: u64,
    /// Extra resource attributes attached to every span.
    pub resource_attributes: HashMap<String, String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:4317".to_owned(),
            service_name: "strongbox".to_owned(),
            sample_ratio: 1.0,
            protocol: OtlpProtocol::Grpc,
            timeout_seconds: 10,
            resource_attributes: HashMap::new(),
        }
    }
}
