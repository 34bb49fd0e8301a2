//! OpenTelemetry initialization
//!
//! Spans are exported over OTLP only when `OTEL_EXPORTER_OTLP_ENDPOINT` is
//! set. Attributes that may carry credentials or hostnames are scrubbed
//! before export.

use opentelemetry::trace::{TraceError, TraceResult};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::resource::Resource;
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::trace::{Config, Sampler, SpanProcessor};
use std::env;
use tracing_subscriber::{registry::LookupSpan, Layer};

/// Attribute key fragments whose values are never exported
const SENSITIVE_FRAGMENTS: &[&str] = &["password", "secret", "token", "jwt"];

/// Attributes that identify hosts on the home network
const HOST_ATTRIBUTES: &[&str] = &["net.peer.ip", "net.host.ip", "host.name", "db.host"];

/// A span processor that scrubs sensitive information from span attributes
#[derive(Debug)]
struct ScrubbingProcessor {
    inner: std::sync::Mutex<Box<dyn SpanProcessor + Send + Sync>>,
}

impl ScrubbingProcessor {
    fn new(inner: Box<dyn SpanProcessor + Send + Sync>) -> Self {
        ScrubbingProcessor {
            inner: std::sync::Mutex::new(inner),
        }
    }

    fn scrub_attributes(&self, attributes: &mut [KeyValue]) {
        for kv in attributes.iter_mut() {
            let key = kv.key.as_str().to_ascii_lowercase();
            if HOST_ATTRIBUTES.contains(&key.as_str())
                || SENSITIVE_FRAGMENTS.iter().any(|f| key.contains(f))
            {
                kv.value = opentelemetry::Value::String("[REDACTED]".into());
            }
        }
    }
}

impl SpanProcessor for ScrubbingProcessor {
    fn on_start(&self, span: &mut opentelemetry_sdk::trace::Span, cx: &opentelemetry::Context) {
        if let Ok(inner) = self.inner.lock() {
            inner.on_start(span, cx);
        }
    }

    fn on_end(&self, mut span: SpanData) {
        self.scrub_attributes(&mut span.attributes);
        if let Ok(inner) = self.inner.lock() {
            inner.on_end(span);
        }
    }

    fn force_flush(&self) -> TraceResult<()> {
        match self.inner.lock() {
            Ok(inner) => inner.force_flush(),
            Err(_) => Ok(()),
        }
    }

    fn shutdown(&mut self) -> TraceResult<()> {
        match self.inner.lock() {
            Ok(mut inner) => inner.shutdown(),
            Err(_) => Ok(()),
        }
    }
}

/// Build the OpenTelemetry tracing layer
pub fn init_telemetry<S>(_subscriber: &S) -> Result<Box<dyn Layer<S> + Send + Sync>, TraceError>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + Send + Sync,
{
    global::set_text_map_propagator(TraceContextPropagator::new());

    let otlp_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let resource = Resource::new(vec![
        KeyValue::new("service.name", "jellyfin-stack"),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(&otlp_endpoint)
        .build_span_exporter()?;

    let batch_processor =
        opentelemetry_sdk::trace::BatchSpanProcessor::builder(exporter, runtime::Tokio).build();

    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_config(
            Config::default()
                .with_resource(resource)
                .with_sampler(Sampler::AlwaysOn),
        )
        .with_span_processor(ScrubbingProcessor::new(Box::new(batch_processor)))
        .build();

    let tracer = opentelemetry::trace::TracerProvider::tracer(&provider, "jellyfin-stack");
    global::set_tracer_provider(provider);

    Ok(tracing_opentelemetry::layer().with_tracer(tracer).boxed())
}

/// Flush and shut down the global tracer provider
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::trace::Span;

    #[derive(Debug)]
    struct NoopProcessor;

    impl SpanProcessor for NoopProcessor {
        fn on_start(&self, _span: &mut Span, _cx: &opentelemetry::Context) {}

        fn on_end(&self, _span: SpanData) {}

        fn force_flush(&self) -> TraceResult<()> {
            Ok(())
        }

        fn shutdown(&mut self) -> TraceResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_scrubbing_processor() {
        let processor = ScrubbingProcessor::new(Box::new(NoopProcessor));

        let mut attributes = vec![
            KeyValue::new("db.host", "10.0.0.12"),
            KeyValue::new("database", "jfstat"),
            KeyValue::new("POSTGRES_PASSWORD", "secretpw"),
            KeyValue::new("jwt_secret", "change-me-please"),
        ];

        processor.scrub_attributes(&mut attributes);

        let redacted = opentelemetry::Value::String("[REDACTED]".into());
        assert_eq!(attributes[0].value, redacted);
        assert_eq!(
            attributes[1].value,
            opentelemetry::Value::String("jfstat".into())
        );
        assert_eq!(attributes[2].value, redacted);
        assert_eq!(attributes[3].value, redacted);
    }
}
