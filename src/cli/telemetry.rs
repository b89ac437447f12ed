//! Subscriber setup and optional OTLP span export.
//!
//! Logs always go to stdout. Export is switched on by
//! `OTEL_EXPORTER_OTLP_ENDPOINT`; the remaining `OTEL_*` variables only shape
//! the exporter once it is on.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use once_cell::sync::OnceCell;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
    Resource,
};
use std::time::Duration;
use tonic::{
    metadata::{AsciiMetadataKey, AsciiMetadataValue, BinaryMetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{debug, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;

const ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const HEADERS_VAR: &str = "OTEL_EXPORTER_OTLP_HEADERS";
const PROTOCOL_VAR: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
const INSTANCE_VAR: &str = "OTEL_SERVICE_INSTANCE_ID";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Crates that are noisy at the chosen verbosity and get their own ceiling.
const QUIET_TARGETS: [&str; 4] = ["hyper=error", "tokio=error", "sqlx=warn", "opentelemetry_sdk=warn"];

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// Where and how spans are shipped.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ExporterSettings {
    endpoint: String,
    headers: Vec<(String, String)>,
    instance_id: String,
}

impl ExporterSettings {
    /// `None` when no endpoint is configured, which keeps logging local.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let endpoint = lookup(ENDPOINT_VAR).filter(|value| !value.trim().is_empty())?;
        if let Some(protocol) = lookup(PROTOCOL_VAR).filter(|p| p != "grpc") {
            warn!(protocol = %protocol, "only grpc export is supported, ignoring {PROTOCOL_VAR}");
        }
        Some(Self {
            endpoint: with_scheme(endpoint.trim()),
            headers: lookup(HEADERS_VAR)
                .map(|raw| header_pairs(&raw))
                .unwrap_or_default(),
            instance_id: lookup(INSTANCE_VAR)
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Ulid::new().to_string()),
        })
    }

    fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Host the collector certificate must match; plain http has none.
    fn tls_domain(&self) -> Option<&str> {
        let authority = self.endpoint.strip_prefix("https://")?.split('/').next()?;
        let host = match authority.strip_prefix('[') {
            Some(bracketed) => bracketed.split(']').next()?,
            None => authority.split(':').next()?,
        };
        (!host.is_empty()).then_some(host)
    }

    /// gRPC metadata for every export call. `-bin` keys carry base64 payloads.
    fn metadata(&self) -> Result<MetadataMap> {
        let mut metadata = MetadataMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if name.ends_with("-bin") {
                let key = BinaryMetadataKey::from_bytes(name.as_bytes())
                    .with_context(|| format!("exporter header {name} is not a valid key"))?;
                let bytes = STANDARD
                    .decode(value)
                    .with_context(|| format!("exporter header {name} is not base64"))?;
                metadata.insert_bin(key, MetadataValue::from_bytes(&bytes));
            } else {
                let key = AsciiMetadataKey::from_bytes(name.as_bytes())
                    .with_context(|| format!("exporter header {name} is not a valid key"))?;
                let value: AsciiMetadataValue = value
                    .parse()
                    .map_err(|_| anyhow!("exporter header {name} has a non-ASCII value"))?;
                metadata.insert(key, value);
            }
        }
        Ok(metadata)
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes([
                KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("service.instance.id", self.instance_id.clone()),
            ])
            .build()
    }
}

fn with_scheme(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint.trim_end_matches('/'))
    }
}

/// `k1=v1,k2=v2`. Names are lowercased; entries without `=` or a name are dropped.
fn header_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|entry| entry.split_once('='))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

fn install_tracer(settings: &ExporterSettings) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(settings.endpoint.as_str())
        .with_compression(Compression::Gzip)
        .with_timeout(EXPORT_TIMEOUT);
    if let Some(domain) = settings.tls_domain() {
        builder = builder.with_tls_config(
            ClientTlsConfig::new()
                .domain_name(domain.to_string())
                .with_native_roots(),
        );
    }
    if !settings.headers.is_empty() {
        builder = builder.with_metadata(settings.metadata()?);
    }

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(builder.build()?)
        .with_resource(settings.resource())
        .build();
    if TRACER_PROVIDER.set(provider.clone()).is_err() {
        debug!("tracer provider already installed");
    }

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));
    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

/// `RUST_LOG` wins over `level`; the quiet targets always apply.
fn filter(level: Level) -> Result<EnvFilter> {
    QUIET_TARGETS.iter().try_fold(
        EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy(),
        |filter, directive| Ok(filter.add_directive(directive.parse()?)),
    )
}

/// Install the global subscriber, exporting spans when an OTLP endpoint is set.
///
/// # Errors
/// Returns an error if the exporter cannot be built or a subscriber is
/// already installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false)
        .pretty();
    let filter = filter(verbosity_level.unwrap_or(Level::ERROR))?;

    match ExporterSettings::from_env() {
        Some(settings) => {
            let otel_layer = tracing_opentelemetry::layer().with_tracer(install_tracer(&settings)?);
            tracing::subscriber::set_global_default(
                Registry::default().with(fmt_layer).with(otel_layer).with(filter),
            )?;
        }
        None => {
            tracing::subscriber::set_global_default(Registry::default().with(fmt_layer).with(filter))?;
        }
    }
    Ok(())
}

/// Flush pending spans. Does nothing when export was never enabled.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(err) = provider.shutdown() {
            debug!("tracer provider shutdown failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Option<ExporterSettings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ExporterSettings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn export_stays_off_without_endpoint() {
        assert_eq!(settings(&[]), None);
        assert_eq!(settings(&[(ENDPOINT_VAR, "  ")]), None);
        assert_eq!(settings(&[(HEADERS_VAR, "a=b")]), None);
    }

    #[test]
    fn bare_collector_host_defaults_to_tls() -> Result<()> {
        let exporter = settings(&[
            (ENDPOINT_VAR, "collector.internal:4317/"),
            (INSTANCE_VAR, "custodia-7"),
        ])
        .context("endpoint was set")?;
        assert_eq!(exporter.endpoint, "https://collector.internal:4317");
        assert_eq!(exporter.tls_domain(), Some("collector.internal"));
        assert_eq!(exporter.instance_id, "custodia-7");
        Ok(())
    }

    #[test]
    fn plain_http_collector_skips_tls() -> Result<()> {
        let exporter = settings(&[(ENDPOINT_VAR, "http://127.0.0.1:4317")]).context("endpoint was set")?;
        assert_eq!(exporter.tls_domain(), None);
        // A generated id is a ULID.
        assert_eq!(exporter.instance_id.len(), 26);
        Ok(())
    }

    #[test]
    fn bracketed_ipv6_collector_has_a_tls_domain() -> Result<()> {
        let exporter = settings(&[(ENDPOINT_VAR, "https://[::1]:4317")]).context("endpoint was set")?;
        assert_eq!(exporter.tls_domain(), Some("::1"));
        Ok(())
    }

    #[test]
    fn header_list_keeps_only_named_pairs() {
        assert_eq!(
            header_pairs("X-Scope=tenant-a, broken ,=orphan,api-key=k=v"),
            vec![
                ("x-scope".to_string(), "tenant-a".to_string()),
                ("api-key".to_string(), "k=v".to_string()),
            ]
        );
        assert!(header_pairs("").is_empty());
    }

    #[test]
    fn headers_become_grpc_metadata() -> Result<()> {
        let exporter = settings(&[
            (ENDPOINT_VAR, "http://collector:4317"),
            // "trace" in base64
            (HEADERS_VAR, "authorization=Bearer abc,ctx-bin=dHJhY2U="),
        ])
        .context("endpoint was set")?;
        let metadata = exporter.metadata()?;
        assert_eq!(metadata.get("authorization").map(|v| v.to_str().ok()), Some(Some("Bearer abc")));
        assert_eq!(
            metadata
                .get_bin("ctx-bin")
                .map(|v| v.to_bytes().map(|b| b.to_vec()).ok()),
            Some(Some(b"trace".to_vec()))
        );
        Ok(())
    }

    #[test]
    fn undecodable_binary_header_names_the_key() -> Result<()> {
        let exporter = settings(&[
            (ENDPOINT_VAR, "http://collector:4317"),
            (HEADERS_VAR, "ctx-bin=***"),
        ])
        .context("endpoint was set")?;
        let err = exporter.metadata().err().context("metadata should fail")?;
        assert!(err.to_string().contains("ctx-bin"), "{err}");
        Ok(())
    }

    #[test]
    fn verbosity_filter_builds_for_every_level() -> Result<()> {
        for level in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
            filter(level)?;
        }
        Ok(())
    }
}
