//! Transport bridged over HTTP to a forwarding gateway.
//!
//! Outgoing interests become `GET {forwarder}/{name}` requests. Registering
//! a prefix starts a local listener, announces it to the forwarder, and
//! turns inbound `GET /{name}` requests into interests on the registration
//! channel. Data travels as the response body with its metadata in
//! `x-difs-*` headers.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use difs_core::{
    Data, DifsError, Interest, NackReason, Name, RequestOutcome, Result, SignatureInfo,
    SignatureType, Transport, DEFAULT_INTEREST_LIFETIME,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

pub const LIFETIME_HEADER: &str = "x-difs-lifetime-ms";
pub const MUST_BE_FRESH_HEADER: &str = "x-difs-must-be-fresh";
pub const CAN_BE_PREFIX_HEADER: &str = "x-difs-can-be-prefix";
pub const NAME_HEADER: &str = "x-difs-name";
pub const FRESHNESS_HEADER: &str = "x-difs-freshness-ms";
pub const FINAL_BLOCK_HEADER: &str = "x-difs-final-block-id";
pub const SIGNATURE_TYPE_HEADER: &str = "x-difs-signature-type";
pub const KEY_LOCATOR_HEADER: &str = "x-difs-key-locator";
pub const SIGNATURE_HEADER: &str = "x-difs-signature";

const REGISTRATION_CHANNEL_CAPACITY: usize = 256;

/// Body of `POST {forwarder}/_routes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteAnnouncement {
    pub prefix: String,
    pub nexthop: String,
}

struct Registration {
    prefix: Name,
    sender: mpsc::Sender<Interest>,
}

struct PendingRequest {
    interest: Interest,
    reply: oneshot::Sender<Data>,
}

#[derive(Default)]
struct InboundState {
    registrations: Vec<Registration>,
    pending: Vec<PendingRequest>,
}

#[derive(Default)]
struct Inbound {
    state: Mutex<InboundState>,
}

impl Inbound {
    fn lock(&self) -> MutexGuard<'_, InboundState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn route_for(&self, name: &Name) -> Option<mpsc::Sender<Interest>> {
        let mut state = self.lock();
        state
            .registrations
            .retain(|registration| !registration.sender.is_closed());
        state
            .registrations
            .iter()
            .filter(|registration| registration.prefix.is_prefix_of(name))
            .max_by_key(|registration| registration.prefix.len())
            .map(|registration| registration.sender.clone())
    }
}

#[derive(Clone)]
pub struct HttpFace {
    client: reqwest::Client,
    forwarder_url: String,
    listen_addr: String,
    advertise_url: Option<String>,
    inbound: Arc<Inbound>,
    /// Nexthop URL once the inbound listener is up.
    listening: Arc<tokio::sync::Mutex<Option<String>>>,
}

impl HttpFace {
    pub fn new(
        forwarder_url: impl Into<String>,
        listen_addr: impl Into<String>,
        advertise_url: Option<String>,
    ) -> Self {
        let forwarder_url: String = forwarder_url.into();
        Self {
            client: reqwest::Client::new(),
            forwarder_url: forwarder_url.trim_end_matches('/').to_string(),
            listen_addr: listen_addr.into(),
            advertise_url,
            inbound: Arc::new(Inbound::default()),
            listening: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    async fn ensure_listening(&self) -> Result<String> {
        let mut listening = self.listening.lock().await;
        if let Some(nexthop) = listening.as_ref() {
            return Ok(nexthop.clone());
        }

        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| DifsError::Transport(format!("bind {}: {}", self.listen_addr, e)))?;
        let local_addr = listener.local_addr()?;

        let app = Router::new()
            .route("/*name", get(handle_inbound))
            .layer(TraceLayer::new_for_http())
            .with_state(self.inbound.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("inbound listener stopped: {}", e);
            }
        });

        let nexthop = self
            .advertise_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", local_addr));
        info!("listening for interests on {} (nexthop {})", local_addr, nexthop);
        *listening = Some(nexthop.clone());
        Ok(nexthop)
    }
}

#[async_trait]
impl Transport for HttpFace {
    async fn express_interest(&self, interest: Interest) -> RequestOutcome {
        let url = format!("{}{}", self.forwarder_url, interest.name.to_uri());
        let sent = self
            .client
            .get(&url)
            .timeout(interest.lifetime)
            .header(LIFETIME_HEADER, interest.lifetime.as_millis().to_string())
            .header(MUST_BE_FRESH_HEADER, interest.must_be_fresh.to_string())
            .header(CAN_BE_PREFIX_HEADER, interest.can_be_prefix.to_string())
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return RequestOutcome::Timeout,
            Err(e) => return RequestOutcome::Nack(NackReason::Other(e.to_string())),
        };

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return RequestOutcome::Nack(NackReason::NoRoute),
            StatusCode::SERVICE_UNAVAILABLE => return RequestOutcome::Nack(NackReason::Congestion),
            StatusCode::GATEWAY_TIMEOUT => return RequestOutcome::Timeout,
            status => return RequestOutcome::Nack(NackReason::Other(format!("http {}", status))),
        }

        let headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return RequestOutcome::Timeout,
            Err(e) => return RequestOutcome::Nack(NackReason::Other(e.to_string())),
        };

        match data_from_parts(&interest.name, &headers, body) {
            Ok(data) => RequestOutcome::Data(data),
            Err(e) => {
                warn!("undecodable data for {}: {}", interest.name, e);
                RequestOutcome::Nack(NackReason::Other(e.to_string()))
            }
        }
    }

    async fn register_prefix(&self, prefix: Name) -> Result<mpsc::Receiver<Interest>> {
        let nexthop = self.ensure_listening().await?;

        let (sender, receiver) = mpsc::channel(REGISTRATION_CHANNEL_CAPACITY);
        self.inbound.lock().registrations.push(Registration {
            prefix: prefix.clone(),
            sender,
        });

        let announcement = RouteAnnouncement {
            prefix: prefix.to_uri(),
            nexthop,
        };
        let response = self
            .client
            .post(format!("{}/_routes", self.forwarder_url))
            .json(&announcement)
            .send()
            .await
            .map_err(|e| DifsError::Transport(format!("announce {}: {}", prefix, e)))?;
        if !response.status().is_success() {
            return Err(DifsError::Transport(format!(
                "forwarder refused route {}: http {}",
                prefix,
                response.status()
            )));
        }

        info!("registered prefix {} via {}", prefix, announcement.nexthop);
        Ok(receiver)
    }

    async fn put_data(&self, data: Data) -> Result<()> {
        let waiting: Vec<PendingRequest> = {
            let mut state = self.inbound.lock();
            let (matched, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|request| request.interest.matches(&data));
            state.pending = rest
                .into_iter()
                .filter(|request| !request.reply.is_closed())
                .collect();
            matched
        };

        if waiting.is_empty() {
            debug!("no inbound request waiting for {}", data.name);
        }
        for request in waiting {
            // requester gave up already
            let _ = request.reply.send(data.clone());
        }
        Ok(())
    }
}

async fn handle_inbound(State(inbound): State<Arc<Inbound>>, headers: HeaderMap, uri: Uri) -> Response {
    let name = match Name::from_uri(uri.path()) {
        Ok(name) => name,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let lifetime = header_str(&headers, LIFETIME_HEADER)
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_INTEREST_LIFETIME);
    let interest = Interest::new(name)
        .with_lifetime(lifetime)
        .with_must_be_fresh(header_flag(&headers, MUST_BE_FRESH_HEADER))
        .with_can_be_prefix(header_flag(&headers, CAN_BE_PREFIX_HEADER));

    let Some(sender) = inbound.route_for(&interest.name) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let (reply, answer) = oneshot::channel();
    inbound.lock().pending.push(PendingRequest {
        interest: interest.clone(),
        reply,
    });
    if sender.send(interest).await.is_err() {
        return StatusCode::NOT_FOUND.into_response();
    }

    match tokio::time::timeout(lifetime, answer).await {
        Ok(Ok(data)) => data_response(&data),
        _ => StatusCode::GATEWAY_TIMEOUT.into_response(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn header_flag(headers: &HeaderMap, name: &str) -> bool {
    header_str(headers, name) == Some("true")
}

fn data_headers(data: &Data) -> std::result::Result<HeaderMap, axum::http::header::InvalidHeaderValue> {
    let mut headers = HeaderMap::new();
    headers.insert(NAME_HEADER, HeaderValue::from_str(&data.name.to_uri())?);
    headers.insert(
        FRESHNESS_HEADER,
        HeaderValue::from(data.freshness_period.as_millis() as u64),
    );
    if let Some(final_block_id) = data.final_block_id {
        headers.insert(FINAL_BLOCK_HEADER, HeaderValue::from(final_block_id));
    }
    if let Some(signature) = &data.signature {
        headers.insert(
            SIGNATURE_TYPE_HEADER,
            HeaderValue::from_static(signature.signature_type.as_str()),
        );
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&hex::encode(&signature.value))?);
        if let Some(key_locator) = &signature.key_locator {
            headers.insert(KEY_LOCATOR_HEADER, HeaderValue::from_str(key_locator)?);
        }
    }
    Ok(headers)
}

fn data_response(data: &Data) -> Response {
    match data_headers(data) {
        Ok(headers) => (StatusCode::OK, headers, data.content.clone()).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Rebuild a data packet from an HTTP response. The interest name stands
/// in when the response carries no name header.
fn data_from_parts(requested: &Name, headers: &HeaderMap, content: Bytes) -> Result<Data> {
    let name = match header_str(headers, NAME_HEADER) {
        Some(uri) => Name::from_uri(uri)?,
        None => requested.clone(),
    };

    let freshness_ms = parse_number(headers, FRESHNESS_HEADER)?.unwrap_or(0);
    let mut data = Data::new(name, content).with_freshness_period(Duration::from_millis(freshness_ms));
    data.final_block_id = parse_number(headers, FINAL_BLOCK_HEADER)?;

    if let Some(signature_type) = header_str(headers, SIGNATURE_TYPE_HEADER) {
        let value = header_str(headers, SIGNATURE_HEADER)
            .ok_or_else(|| DifsError::Signing("signature type without value".to_string()))?;
        data.signature = Some(SignatureInfo {
            signature_type: SignatureType::parse(signature_type)?,
            key_locator: header_str(headers, KEY_LOCATOR_HEADER).map(str::to_string),
            value: hex::decode(value)
                .map_err(|e| DifsError::Signing(format!("signature value: {}", e)))?
                .into(),
        });
    }
    Ok(data)
}

fn parse_number(headers: &HeaderMap, name: &str) -> Result<Option<u64>> {
    header_str(headers, name)
        .map(|value| {
            value
                .parse::<u64>()
                .map_err(|_| DifsError::ProtocolViolation(format!("bad {} header: {}", name, value)))
        })
        .transpose()
}
