//! HTTP server and request routing

use crate::duration::parse_duration;
use crate::error::{json_error_response, ErrorCode};
use crate::health::HealthState;
use crate::inspect::RequestFacts;
use crate::netinfo::{NetworkInfo, SystemNetworkInfo};
use crate::payload::{PayloadGenerator, PayloadRequest};
use crate::websocket::{self, ECHO_PAGE};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{ALLOW, CONNECTION, CONTENT_TYPE};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use serde::{Deserialize, Deserializer};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Version information for the server
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Largest accepted `POST /health` body
pub const MAX_BODY_BYTES: usize = 16 * 1024;

/// Default idle time allowed between requests on a keep-alive connection
pub const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(5);

type ResponseBody = BoxBody<Bytes, hyper::Error>;

/// Identity configured at startup, read by every handler
#[derive(Debug, Clone, Default)]
pub struct ProcessIdentity {
    pub name: Option<String>,
}

/// State shared by all connections
pub struct AppState {
    pub identity: ProcessIdentity,
    pub health: HealthState,
    pub network: Box<dyn NetworkInfo>,
    in_flight: AtomicUsize,
}

impl AppState {
    /// State reporting the real host's interfaces
    pub fn new(name: Option<String>) -> Self {
        Self::with_network(name, SystemNetworkInfo)
    }

    pub fn with_network(name: Option<String>, network: impl NetworkInfo + 'static) -> Self {
        Self {
            identity: ProcessIdentity { name },
            health: HealthState::new(),
            network: Box::new(network),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Requests whose handler has started and not yet been dropped
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Counts a request as in flight until the handler future is dropped
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The diagnostic HTTP/WebSocket server
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Arc<AppState>,
    shutdown_rx: watch::Receiver<bool>,
    keep_alive_timeout: Duration,
}

impl Server {
    /// Bind the listening socket
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        state: Arc<AppState>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            state,
            shutdown_rx,
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
        })
    }

    pub fn with_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!(addr = %self.local_addr, "Server listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();
        let keep_alive_timeout = self.keep_alive_timeout;

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let state = Arc::clone(&self.state);

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, state, keep_alive_timeout).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    state: Arc<AppState>,
    keep_alive_timeout: Duration,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        async move { handle_request(req, state, addr).await }
    });

    let mut builder = AutoBuilder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(keep_alive_timeout)
        .keep_alive(true);

    // WebSocket upgrades on /echo need the HTTP/1.1 upgrade path kept alive
    builder
        .serve_connection_with_upgrades(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

/// Paths served by this server and the methods each accepts
const ROUTES: &[(&str, &str)] = &[
    ("/", "GET, HEAD"),
    ("/api", "GET, HEAD"),
    ("/health", "GET, HEAD, POST"),
    ("/bench", "GET, HEAD"),
    ("/data", "GET, HEAD"),
    ("/echo", "GET, HEAD"),
];

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    client_addr: SocketAddr,
) -> Result<Response<ResponseBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!(%method, %path, addr = %client_addr, "Incoming request");
    let _in_flight = InFlightGuard::new(&state.in_flight);

    let is_get = method == Method::GET || method == Method::HEAD;

    let response = match (path.as_str(), is_get) {
        ("/", true) => handle_whoami(req, &state, client_addr).await,
        ("/api", true) => handle_api(&req, &state, client_addr),
        ("/health", true) => handle_health(&state),
        ("/health", false) if method == Method::POST => handle_set_health(req, &state).await,
        ("/bench", true) => handle_bench(),
        ("/data", true) => handle_data(&req),
        ("/echo", true) => {
            if method == Method::GET && websocket::is_upgrade_request(&req) {
                websocket::handle_upgrade(req, client_addr)
            } else {
                text_response(StatusCode::OK, "text/html; charset=utf-8", ECHO_PAGE)
            }
        }
        (path, _) => match ROUTES.iter().find(|(route, _)| *route == path) {
            Some((_, allow)) => {
                let mut response = json_error_response(
                    ErrorCode::MethodNotAllowed,
                    format!("Method {} not allowed", method),
                );
                response
                    .headers_mut()
                    .insert(ALLOW, hyper::header::HeaderValue::from_static(allow));
                response
            }
            None => json_error_response(ErrorCode::NotFound, "Not Found"),
        },
    };

    Ok(response)
}

/// `GET /` - plain-text report, optionally delayed by `wait`
async fn handle_whoami(
    req: Request<Incoming>,
    state: &AppState,
    client_addr: SocketAddr,
) -> Response<ResponseBody> {
    if let Some(wait) = query_param(&req, "wait").filter(|w| !w.is_empty()) {
        match parse_duration(&wait) {
            Ok(delay) => {
                debug!(wait = %wait, delay = ?delay, "Delaying response");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return json_error_response(ErrorCode::InvalidDuration, e.to_string());
            }
        }
    }

    let facts = RequestFacts::gather(
        &req,
        Some(client_addr),
        state.identity.name.as_deref(),
        state.network.as_ref(),
    );
    text_response(StatusCode::OK, "text/plain; charset=utf-8", facts.text_report())
}

/// `GET /api` - structured report
fn handle_api(
    req: &Request<Incoming>,
    state: &AppState,
    client_addr: SocketAddr,
) -> Response<ResponseBody> {
    let report = RequestFacts::gather(
        req,
        Some(client_addr),
        state.identity.name.as_deref(),
        state.network.as_ref(),
    )
    .api_report();

    match serde_json::to_string(&report) {
        Ok(body) => text_response(StatusCode::OK, "application/json", body),
        Err(e) => {
            error!(error = %e, "Failed to serialize API report");
            json_error_response(ErrorCode::InternalError, "Failed to serialize report")
        }
    }
}

/// `GET /health` - empty body carrying the current status
fn handle_health(state: &AppState) -> Response<ResponseBody> {
    let code = state.health.read();
    let status = health_response_status(code);
    Response::builder()
        .status(status)
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
        .expect("valid response builder")
}

/// Interim 1xx codes cannot end an exchange, so they are served as 500
fn health_response_status(code: u16) -> StatusCode {
    match StatusCode::from_u16(code) {
        Ok(status) if status.is_informational() => {
            warn!(status_code = code, "Informational health status served as 500");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Ok(status) => status,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Deserialize)]
struct HealthUpdate {
    #[serde(rename = "statusCode", default, deserialize_with = "lenient_status_code")]
    status_code: Option<i64>,
}

/// Accept `503`, `503.0` and `"503"`; reject fractions, bools and other types
fn lenient_status_code<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let invalid = || <D::Error as serde::de::Error>::custom("statusCode must be an integer");
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .map(Some)
            .ok_or_else(invalid),
        Some(serde_json::Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

/// `POST /health` - replace the reported status
async fn handle_set_health(req: Request<Incoming>, state: &AppState) -> Response<ResponseBody> {
    let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<http_body_util::LengthLimitError>() => {
            return json_error_response(
                ErrorCode::BodyTooLarge,
                format!("Request body exceeds {} bytes", MAX_BODY_BYTES),
            );
        }
        Err(e) => {
            debug!(error = %e, "Failed to read request body");
            return json_error_response(ErrorCode::InvalidBody, "Failed to read request body");
        }
    };

    let update: HealthUpdate = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            return json_error_response(ErrorCode::InvalidBody, format!("Invalid JSON body: {}", e));
        }
    };

    let Some(code) = update.status_code else {
        return json_error_response(ErrorCode::MissingParameter, "Missing required field 'statusCode'");
    };

    match state.health.write(code) {
        Ok(()) => {
            info!(status_code = code, "Updated health check status code");
            text_response(StatusCode::OK, "application/json", "null")
        }
        Err(e) => {
            warn!(status_code = code, "Rejected health check status code");
            json_error_response(ErrorCode::InvalidParameter, e.to_string())
        }
    }
}

/// `GET /bench` - minimal keep-alive round trip
fn handle_bench() -> Response<ResponseBody> {
    let mut response = text_response(StatusCode::OK, "text/plain", "1");
    response
        .headers_mut()
        .insert(CONNECTION, hyper::header::HeaderValue::from_static("keep-alive"));
    response
}

/// `GET /data` - streamed generated payload
fn handle_data(req: &Request<Incoming>) -> Response<ResponseBody> {
    let size = query_param(req, "size");
    let unit = query_param(req, "unit");

    let len = match PayloadRequest::from_params(size.as_deref(), unit.as_deref())
        .and_then(|request| request.byte_len())
    {
        Ok(len) => len,
        Err(e) => {
            let code = if e.is_missing() {
                ErrorCode::MissingParameter
            } else {
                ErrorCode::InvalidParameter
            };
            return json_error_response(code, e.to_string());
        }
    };

    debug!(bytes = len, "Streaming generated payload");

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/octet-stream")
        .body(PayloadGenerator::new(len).into_body())
        .expect("valid response builder")
}

/// Helper to create a response with a complete body
fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<ResponseBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(Full::new(body.into()).map_err(|never| match never {}).boxed())
        .expect("valid response with StatusCode enum and static header")
}

/// Last value of a query parameter, percent-decoded
fn query_param<B>(req: &Request<B>, key: &str) -> Option<String> {
    let query = req.uri().query()?;
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(k) == key).then(|| decode_component(v))
        })
        .last()
}

fn decode_component(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned()
}
