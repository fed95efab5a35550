#[cfg(feature = "metrics")]
mod metrics;
mod v1;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::str::FromStr;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use hyper::header::{
    HeaderValue, IntoHeaderName, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_LENGTH, CONTENT_TYPE, ORIGIN,
};
use hyper::http::request::Parts;
use hyper::server::conn::Http;
use hyper::service::Service;
use hyper::{Body, HeaderMap, Method, StatusCode, Uri};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tennis_tournament_api::auth::Claims;
use tennis_tournament_api::settle::SettleResponse;
use tokio::net::TcpSocket;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::auth;
use crate::settlement::SettlementError;
use crate::{Error, State};

/// Request bodies larger than this are rejected.
const MAX_BODY_SIZE: u64 = 16384;

/// Headers carrying credentials.
const SENSITIVE_HEADERS: [&str; 2] = ["authorization", "x-cron-secret"];

pub type Result = std::result::Result<Response, Error>;

pub async fn bind(
    addr: SocketAddr,
    state: State,
    mut shutdown_rx: watch::Receiver<()>,
) -> std::result::Result<(), Error> {
    let service = RootService { state };

    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    if let Err(err) = socket.set_reuseaddr(true) {
        log::warn!("Failed to set SO_REUSEADDR flag: {}", err);
    }

    socket.bind(addr)?;
    let listener = socket.listen(1024)?;
    log::info!("Listening on {}", addr);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, addr) = match res {
                    Ok((stream, addr)) => (stream, addr),
                    Err(err) => {
                        log::warn!("Failed to accept connection: {:?}", err);
                        continue;
                    }
                };
                log::debug!("Accepting new connection from {:?}", addr);

                let service = service.clone();
                let mut shutdown_rx = shutdown_rx.clone();
                tokio::task::spawn(async move {
                    let conn = Http::new()
                        .http1_keep_alive(true)
                        .serve_connection(stream, service);
                    tokio::pin!(conn);

                    tokio::select! {
                        res = &mut conn => {
                            if let Err(err) = res {
                                log::warn!("Http error: {:?}", err);
                            }
                        }
                        _ = shutdown_rx.changed() => {
                            log::debug!("Shutting down connection");
                            conn.as_mut().graceful_shutdown();

                            if let Err(err) = conn.await {
                                log::warn!("Http error: {:?}", err);
                            }
                        }
                    }
                });
            }
            _ = shutdown_rx.changed() => {
                log::debug!("Shutting down http server");
                return Ok(());
            }
        }
    }
}

#[derive(Clone, Debug)]
struct RootService {
    state: State,
}

impl Service<hyper::Request<Body>> for RootService {
    type Response = hyper::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    #[inline]
    fn call(&mut self, req: hyper::Request<Body>) -> Self::Future {
        Box::pin(service_root(req, self.state.clone()))
    }
}

async fn service_root(
    req: hyper::Request<Body>,
    state: State,
) -> std::result::Result<hyper::Response<Body>, Infallible> {
    log::trace!("Received Request: {}", describe_head(&req));

    #[cfg(feature = "metrics")]
    state.metrics.http_requests_total.inc();

    let req = Request::new(req, state);

    if req.method() == Method::POST {
        match req.content_length() {
            Ok(length) if length > MAX_BODY_SIZE => {
                return Ok(error_response(StatusCodeError::payload_too_large().into()).build());
            }
            Ok(_) => (),
            Err(err) => return Ok(error_response(err).build()),
        }
    }

    let path = String::from(req.uri().path());
    let mut uri = RequestUri::new(&path);

    log::debug!("{} {:?}", req.method(), uri);

    let origin = req.headers().get(ORIGIN).cloned();

    let res = match uri.take_str() {
        Some("v1") => v1::route(req, uri).await,
        #[cfg(feature = "metrics")]
        Some("metrics") => metrics::route(req, uri).await,
        _ => Err(StatusCodeError::not_found().into()),
    };

    let mut resp = match res {
        Ok(resp) => resp,
        Err(err) => error_response(err),
    };

    if let Some(origin) = origin {
        resp = resp.header(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }

    resp = resp.header(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type,authorization,x-cron-secret"),
    );

    Ok(resp.build())
}

/// Formats the method, path and headers of a request for the trace log. The query string and
/// the values of [`SENSITIVE_HEADERS`] are never included.
fn describe_head(req: &hyper::Request<Body>) -> String {
    let mut head = format!("{} {}", req.method(), req.uri().path());

    for (name, value) in req.headers() {
        let value = if SENSITIVE_HEADERS.contains(&name.as_str()) {
            "<redacted>"
        } else {
            value.to_str().unwrap_or("<binary>")
        };

        head.push_str(&format!("\n{}: {}", name, value));
    }

    head
}

/// Renders an error. Settlement outcomes keep the `{ success, message }` shape of a successful
/// call, everything else is a `{ code, message }` [`ErrorResponse`].
fn error_response(err: Error) -> Response {
    match err {
        Error::StatusCodeError(err) => Response::ok().status(err.code).json(&ErrorResponse {
            code: err.code.as_u16(),
            message: err.message,
        }),
        Error::Settlement(err) => {
            let status = settlement_status(&err);

            let message = match &err {
                SettlementError::Store(_) => {
                    log::error!("Settlement failed: {}", err);
                    String::from("internal store error")
                }
                _ => {
                    log::debug!("Settlement rejected: {}", err);
                    err.to_string()
                }
            };

            Response::ok()
                .status(status)
                .json(&SettleResponse::failure(message))
        }
        err => {
            log::error!("Failed to handle request: {}", err);

            let code = StatusCode::INTERNAL_SERVER_ERROR;
            Response::ok().status(code).json(&ErrorResponse {
                code: code.as_u16(),
                message: String::from("Internal Server Error"),
            })
        }
    }
}

fn settlement_status(err: &SettlementError) -> StatusCode {
    match err {
        SettlementError::Unauthorized(err) if err.is_forbidden() => StatusCode::FORBIDDEN,
        SettlementError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        SettlementError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        SettlementError::NotFound(_, _) => StatusCode::NOT_FOUND,
        SettlementError::AlreadySettled(_) => StatusCode::CONFLICT,
        SettlementError::TransientStoreFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        SettlementError::InconsistentState(_) | SettlementError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug)]
pub struct Request {
    pub parts: Parts,
    pub body: Option<Body>,
    state: State,
}

impl Request {
    #[inline]
    fn new(req: hyper::Request<Body>, state: State) -> Self {
        let (parts, body) = req.into_parts();

        Self {
            parts,
            body: Some(body),
            state,
        }
    }

    #[inline]
    pub fn state(&self) -> &State {
        &self.state
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap<HeaderValue> {
        &self.parts.headers
    }

    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    /// Returns the first value of the query parameter `key`. The value is not percent-decoded.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.uri()
            .query()?
            .split('&')
            .find_map(|pair| match pair.split_once('=') {
                Some((k, v)) if k == key => Some(v),
                _ => None,
            })
    }

    /// Authenticates the caller and requires the `admin` role.
    pub fn require_admin(&self) -> std::result::Result<Claims, Error> {
        let claims = self
            .state
            .auth
            .authenticate(self.headers())
            .map_err(SettlementError::from)?;
        auth::require_admin(&claims).map_err(SettlementError::from)?;

        log::debug!("Authenticated admin {}", claims.sub);
        Ok(claims)
    }

    pub async fn json<T>(&mut self) -> std::result::Result<T, Error>
    where
        T: DeserializeOwned,
    {
        const DUR: Duration = Duration::new(30, 0);

        let body = match self.body.take() {
            Some(body) => body,
            None => return Err(StatusCodeError::internal_server_error().into()),
        };

        let deadline = Instant::now() + DUR;

        let bytes = tokio::select! {
            res = hyper::body::to_bytes(body) => {
                res?
            }
            _ = tokio::time::sleep_until(deadline) => {
                log::info!("Client failed to transmit body in {}s, dropping connection", DUR.as_secs());
                return Err(StatusCodeError::request_timeout().into());
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(value),
            Err(err) => Err(StatusCodeError::bad_request().message(err).into()),
        }
    }

    /// Returns the value of the "Content-Length" header. If the header is not present or has an
    /// invalid value an error is returned.
    pub fn content_length(&self) -> std::result::Result<u64, Error> {
        match self.headers().get(CONTENT_LENGTH) {
            Some(value) => match value.to_str().ok().and_then(|value| value.parse().ok()) {
                Some(value) => Ok(value),
                None => {
                    log::debug!("Failed to parse \"Content-Length\" header: {:?}", value);

                    Err(StatusCodeError::bad_request().into())
                }
            },
            None => Err(StatusCodeError::length_required().into()),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct RequestUri<'a> {
    path: &'a str,
}

impl<'a> RequestUri<'a> {
    pub fn new(mut path: &'a str) -> Self {
        if let Some(rem) = path.strip_prefix('/') {
            path = rem;
        }

        Self { path }
    }

    pub fn take(&mut self) -> Option<UriPart<'a>> {
        let part = self.take_str()?;

        Some(UriPart { part })
    }

    pub fn take_str(&mut self) -> Option<&'a str> {
        if self.path.is_empty() {
            None
        } else {
            Some(match self.path.split_once('/') {
                Some((part, rem)) => {
                    self.path = rem;
                    part
                }
                None => {
                    let path = self.path;
                    self.path = "";
                    path
                }
            })
        }
    }

    /// Returns `true` if all parts of the path were consumed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }
}

#[derive(Copy, Clone, Debug)]
pub struct UriPart<'a> {
    part: &'a str,
}

impl<'a> UriPart<'a> {
    pub fn parse<T>(&self) -> std::result::Result<T, Error>
    where
        T: FromStr,
    {
        match self.part.parse() {
            Ok(v) => Ok(v),
            Err(_) => Err(StatusCodeError::bad_request().into()),
        }
    }
}

impl<'a> AsRef<str> for UriPart<'a> {
    fn as_ref(&self) -> &str {
        self.part
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

/// An error that is returned to the client as is.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct StatusCodeError {
    pub code: StatusCode,
    pub message: String,
}

impl StatusCodeError {
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            message: code.canonical_reason().unwrap_or_default().to_owned(),
        }
    }

    pub fn message<T>(mut self, message: T) -> Self
    where
        T: ToString,
    {
        self.message = message.to_string();
        self
    }

    pub fn bad_request() -> Self {
        Self::new(StatusCode::BAD_REQUEST)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED)
    }

    pub fn request_timeout() -> Self {
        Self::new(StatusCode::REQUEST_TIMEOUT)
    }

    pub fn length_required() -> Self {
        Self::new(StatusCode::LENGTH_REQUIRED)
    }

    pub fn payload_too_large() -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE)
    }

    pub fn internal_server_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
}

impl Response {
    /// 200 OK
    pub fn ok() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Body::empty(),
        }
    }

    /// 204 No Content
    pub fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
            body: Body::empty(),
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn body<T>(mut self, body: T) -> Self
    where
        T: Into<Body>,
    {
        self.body = body.into();
        self
    }

    pub fn json<T>(mut self, body: &T) -> Self
    where
        T: Serialize,
    {
        match serde_json::to_vec(body) {
            Ok(buf) => {
                self.body = Body::from(buf);
                self.header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            }
            Err(err) => {
                log::error!("Failed to serialize response body: {}", err);

                self.body = Body::empty();
                self.status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    pub fn header<K>(mut self, key: K, value: HeaderValue) -> Self
    where
        K: IntoHeaderName,
    {
        self.headers.append(key, value);
        self
    }

    fn build(self) -> hyper::Response<Body> {
        let mut resp = hyper::Response::new(self.body);
        *resp.status_mut() = self.status;
        *resp.headers_mut() = self.headers;
        resp
    }
}

/// Checks the request method and runs the specified path. If no matching method is found
/// an method_not_allowed error is returned.
#[macro_export]
macro_rules! method {
    ($req:expr, {$($method:expr => $branch:expr),* $(,)?}) => {
        match $req.method() {
            $(
                method if method == $method => $branch,
            )*
            method if method == hyper::Method::OPTIONS => {
                use $crate::http::Response;
                use hyper::header::{HeaderValue, ALLOW, ACCESS_CONTROL_ALLOW_METHODS};

                let allow = [$($method.as_str()),*].join(",");
                match HeaderValue::from_str(&allow) {
                    Ok(allow) => Ok(Response::no_content()
                        .header(ALLOW, allow.clone())
                        .header(ACCESS_CONTROL_ALLOW_METHODS, allow)),
                    Err(_) => Err($crate::http::StatusCodeError::internal_server_error().into()),
                }
            }
            _ => Err($crate::http::StatusCodeError::method_not_allowed().into()),
        }
    };
}
