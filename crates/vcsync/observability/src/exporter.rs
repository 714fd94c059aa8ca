//! Text exposition of a metrics registry

use crate::error::{ObservabilityError, Result};
use prometheus::{Encoder, Registry, TextEncoder};

/// Render every metric in `registry` in the Prometheus text format
pub fn export_metrics(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| ObservabilityError::Encoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::IntGauge;

    #[test]
    fn test_export_metrics() {
        let registry = Registry::new();
        let gauge = IntGauge::new("vcsync_test_gauge", "A test gauge").unwrap();
        registry.register(Box::new(gauge.clone())).unwrap();
        gauge.set(7);

        let output = export_metrics(&registry).unwrap();
        assert!(output.contains("vcsync_test_gauge 7"));
    }
}
