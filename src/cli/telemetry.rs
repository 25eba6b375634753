//! Log output and optional OTLP span export for the gate.
//!
//! Spans leave the process only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! The exported resource names the providers this instance gates on.

use crate::provider::ProviderKind;
use anyhow::{anyhow, Result};
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
    Resource,
};
use std::{env::var, sync::OnceLock, time::Duration};
use tonic::{
    metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{debug, error, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;

const ENV_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const ENV_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
const ENV_INSTANCE_ID: &str = "OTEL_SERVICE_INSTANCE_ID";

const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Resource attribute listing the enabled provider slugs, comma separated.
pub const PROVIDERS_ATTRIBUTE: &str = "socialgate.providers";

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Collector connection settings taken from the standard `OTEL_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ExporterSettings {
    endpoint: String,
    /// Set for `https` endpoints; the collector host used for TLS verification.
    tls_domain: Option<String>,
    headers: Vec<(String, String)>,
    instance_id: String,
}

impl ExporterSettings {
    fn from_env() -> Option<Self> {
        Self::from_lookup(|key| var(key).ok())
    }

    /// `None` when no endpoint is configured. A bare `host:port` means TLS.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let raw = lookup(ENV_ENDPOINT)?;
        let raw = raw.trim().trim_end_matches('/');
        if raw.is_empty() {
            return None;
        }

        let endpoint = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else {
            format!("https://{raw}")
        };

        let tls_domain = endpoint
            .strip_prefix("https://")
            .and_then(|rest| rest.split(['/', ':']).next())
            .filter(|host| !host.is_empty())
            .map(str::to_string);

        let headers = lookup(ENV_HEADERS)
            .map(|raw| parse_headers(&raw))
            .unwrap_or_default();

        let instance_id = lookup(ENV_INSTANCE_ID)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Ulid::new().to_string());

        Some(Self {
            endpoint,
            tls_domain,
            headers,
            instance_id,
        })
    }

    /// gRPC metadata for the exporter. Only ASCII values are accepted.
    fn metadata(&self) -> Result<MetadataMap> {
        let mut meta = MetadataMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let key = MetadataKey::<Ascii>::from_bytes(name.as_bytes())
                .map_err(|e| anyhow!("invalid OTLP header name {name}: {e}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|e| anyhow!("invalid OTLP header value for {name}: {e}"))?;
            meta.insert(key, value);
        }
        Ok(meta)
    }
}

/// `key=value` pairs separated by commas; entries without `=` or a key are skipped.
fn parse_headers(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim().to_ascii_lowercase();
            (!key.is_empty()).then(|| (key, value.trim().to_string()))
        })
        .collect()
}

fn resource(providers: &[ProviderKind], instance_id: &str) -> Resource {
    let providers = providers
        .iter()
        .map(|provider| provider.slug())
        .collect::<Vec<_>>()
        .join(",");

    Resource::builder_empty()
        .with_attributes([
            KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("service.instance.id", instance_id.to_string()),
            KeyValue::new(PROVIDERS_ATTRIBUTE, providers),
        ])
        .build()
}

fn init_tracer(settings: &ExporterSettings, providers: &[ProviderKind]) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.endpoint)
        .with_timeout(EXPORT_TIMEOUT);

    if let Some(domain) = &settings.tls_domain {
        builder = builder.with_tls_config(
            ClientTlsConfig::new()
                .domain_name(domain.clone())
                .with_native_roots(),
        );
    }

    if !settings.headers.is_empty() {
        builder = builder.with_metadata(settings.metadata()?);
    }

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(builder.build()?)
        .with_resource(resource(providers, &settings.instance_id))
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

/// Install the global subscriber: pretty logs always, OTLP export when configured.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or a subscriber is already set.
pub fn init(verbosity_level: Option<Level>, providers: &[ProviderKind]) -> Result<()> {
    let verbosity_level = verbosity_level.unwrap_or(Level::ERROR);

    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false)
        .pretty();

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("h2=warn".parse()?)
        .add_directive("tonic=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?);

    let otel_layer = match ExporterSettings::from_env() {
        Some(settings) => {
            let tracer = init_tracer(&settings, providers)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let subscriber = Registry::default()
        .with(fmt_layer)
        .with(otel_layer)
        .with(filter);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Flush pending spans. Does nothing if export was never enabled.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("flushing spans");
        if let Err(err) = provider.shutdown() {
            error!("failed to shut down tracer provider: {err}");
        }
    }
}
