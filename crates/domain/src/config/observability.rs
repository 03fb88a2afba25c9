use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observability (OpenTelemetry) configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// With no `otlp_endpoint` only structured JSON logs are emitted. Setting
/// it forwards every `tracing` span (one per run, one per HTTP request) to
/// an OTLP/gRPC collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// OTLP gRPC endpoint, e.g. `http://localhost:4317`.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// `service.name` resource attribute.
    #[serde(default = "d_service_name")]
    pub service_name: String,

    /// Fraction of traces kept (`TraceIdRatioBased`). Values outside
    /// `0.0..=1.0` are clamped.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
        }
    }
}

impl ObservabilityConfig {
    pub fn effective_sample_rate(&self) -> f64 {
        if self.sample_rate.is_nan() {
            return d_sample_rate();
        }
        self.sample_rate.clamp(0.0, 1.0)
    }

    /// The configured endpoint, if it is set and looks like an HTTP(S) URL.
    pub fn endpoint(&self) -> Option<&str> {
        self.otlp_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| e.starts_with("http://") || e.starts_with("https://"))
    }
}

fn d_service_name() -> String {
    "agentfleet".into()
}

fn d_sample_rate() -> f64 {
    1.0
}
