use super::payload::{ContentEncoding, PayloadBody, PendingPayload, SEGMENT_PART_NAME};
use super::stats::{DeliverySnapshot, DeliveryStats};
use super::transport::{DeliveryMechanism, TransportSender};
use crate::domain::{PageState, TelemetryError};
use crate::monitoring::Monitor;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderName};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, ClientBuilder, RequestBuilder};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use url::Url;

const PAYLOAD_ID_HEADER: &str = "x-payload-id";
const AGENT_VERSION_HEADER: &str = "x-agent-version";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub max_connections: usize,
    pub keep_alive_timeout: Duration,
    pub user_agent: String,
    pub beacon_bytes_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            max_connections: 10,
            keep_alive_timeout: Duration::from_secs(60),
            user_agent: format!("rask-telemetry-agent/{}", env!("CARGO_PKG_VERSION")),
            beacon_bytes_limit: 60_000,
        }
    }
}

/// Shared HTTP machinery: one connection pool, one beacon tracker and one set
/// of counters for every endpoint sender built from it.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: ClientConfig,
    tracker: TaskTracker,
    stats: Arc<DeliveryStats>,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        if config.beacon_bytes_limit == 0 {
            return Err(ClientError::InvalidConfiguration(
                "Beacon bytes limit must be greater than 0".to_string(),
            ));
        }

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(config.keep_alive_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ClientError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            config,
            tracker: TaskTracker::new(),
            stats: Arc::new(DeliveryStats::new()),
        })
    }

    /// Builds a sender for one endpoint. Request failures go to `monitor`.
    pub fn sender(&self, endpoint: Url, monitor: Arc<dyn Monitor>, page: PageState) -> TransportSender {
        let beacon = Arc::new(HttpBeacon {
            client: self.client.clone(),
            tracker: self.tracker.clone(),
            stats: self.stats.clone(),
        });
        let request = Arc::new(HttpRequest {
            client: self.client.clone(),
            monitor,
            stats: self.stats.clone(),
        });

        TransportSender::new(endpoint, beacon, request, self.config.beacon_bytes_limit, page)
    }

    /// Waits up to `grace` for in-flight beacons. Returns false when some were
    /// still pending at the deadline.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!("Draining {} in-flight beacon(s)", pending);
        }
        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        self.tracker.reopen();
        drained
    }

    pub fn stats(&self) -> DeliverySnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

/// Turns a pending payload into a POST: NDJSON body for batches, multipart
/// form for replay segments.
pub fn build_request(
    client: &Client,
    endpoint: &Url,
    payload: &PendingPayload,
) -> Result<RequestBuilder, reqwest::Error> {
    let builder = client
        .post(endpoint.clone())
        .header(HeaderName::from_static(PAYLOAD_ID_HEADER), payload.id.to_string())
        .header(HeaderName::from_static(AGENT_VERSION_HEADER), env!("CARGO_PKG_VERSION"));

    match &payload.body {
        PayloadBody::Batch { data, encoding, .. } => {
            let mut builder = builder.header(CONTENT_TYPE, "application/x-ndjson");
            if let Some(ContentEncoding::Gzip) = encoding {
                builder = builder.header(CONTENT_ENCODING, "gzip");
            }
            Ok(builder.body(data.clone()))
        }
        PayloadBody::Segment {
            fields,
            segment,
            file_name,
        } => {
            let mut form = Form::new();
            for (name, value) in fields {
                form = form.text(*name, value.clone());
            }
            let part = Part::bytes(segment.to_vec())
                .file_name(file_name.clone())
                .mime_str("application/octet-stream")?;
            Ok(builder.multipart(form.part(SEGMENT_PART_NAME, part)))
        }
    }
}

/// Fire-and-forget delivery. The outcome is never observed; the task is
/// tracked so the agent can drain it before the process exits.
struct HttpBeacon {
    client: Client,
    tracker: TaskTracker,
    stats: Arc<DeliveryStats>,
}

impl DeliveryMechanism for HttpBeacon {
    fn deliver(&self, endpoint: &Url, payload: PendingPayload) {
        let Ok(handle) = Handle::try_current() else {
            debug!("Beacon for {} payload {} dropped: no runtime", payload.kind, payload.id);
            return;
        };
        let request = match build_request(&self.client, endpoint, &payload) {
            Ok(request) => request,
            Err(e) => {
                debug!("Beacon for {} payload {} dropped: {}", payload.kind, payload.id, e);
                return;
            }
        };

        self.stats.record_beacon(payload.size());
        self.tracker.spawn_on(
            async move {
                let _ = request.send().await;
                drop(payload);
            },
            &handle,
        );
    }
}

/// Asynchronous delivery with observed outcome. Failures are reported and the
/// payload discarded; there is no retry.
struct HttpRequest {
    client: Client,
    monitor: Arc<dyn Monitor>,
    stats: Arc<DeliveryStats>,
}

impl DeliveryMechanism for HttpRequest {
    fn deliver(&self, endpoint: &Url, payload: PendingPayload) {
        let kind = payload.kind;
        let target = endpoint.to_string();

        let Ok(handle) = Handle::try_current() else {
            self.monitor.report(&TelemetryError::SendFailure {
                kind,
                endpoint: target,
                reason: "no async runtime available".to_string(),
            });
            return;
        };
        let request = match build_request(&self.client, endpoint, &payload) {
            Ok(request) => request,
            Err(e) => {
                self.monitor.report(&TelemetryError::SendFailure {
                    kind,
                    endpoint: target,
                    reason: e.to_string(),
                });
                return;
            }
        };

        self.stats.record_request(payload.size());
        let monitor = self.monitor.clone();
        let stats = self.stats.clone();

        handle.spawn(async move {
            let reason = match request.send().await {
                Ok(response) if response.status().is_success() => None,
                Ok(response) => Some(format!("HTTP {}", response.status().as_u16())),
                Err(e) => Some(e.to_string()),
            };
            stats.record_outcome(reason.is_none());

            match reason {
                None => debug!("Delivered {} payload {} to {}", kind, payload.id, target),
                Some(reason) => {
                    warn!("Dropping {} payload {} after failed send", kind, payload.id);
                    monitor.report(&TelemetryError::SendFailure {
                        kind,
                        endpoint: target,
                        reason,
                    });
                }
            }
        });
    }
}
