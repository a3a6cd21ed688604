//! Routing of accepted connections to protocol handlers

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::RequestError;
use crate::listen_set::SocketRole;
use crate::request::{self, Connection, HttpRequest};

/// Handler slot a request is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackRole {
    /// Action invocation: `POST` with `SOAPACTION`, or `M-POST`
    Soap,
    /// Eventing: `NOTIFY`, `SUBSCRIBE`, `UNSUBSCRIBE`
    Gena,
    /// Plain web server: `GET`, `HEAD`, other `POST`
    Web,
}

impl fmt::Display for CallbackRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CallbackRole::Soap => "SOAP",
            CallbackRole::Gena => "GENA",
            CallbackRole::Web => "WEB",
        })
    }
}

/// Protocol callback invoked on a worker thread for one request
///
/// The returned status is sent as a bare response when it is 400 or above;
/// otherwise the handler is expected to have written its own response.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &HttpRequest, connection: &mut Connection) -> StatusCode;
}

impl<F> RequestHandler for F
where
    F: Fn(&HttpRequest, &mut Connection) -> StatusCode + Send + Sync,
{
    fn handle(&self, request: &HttpRequest, connection: &mut Connection) -> StatusCode {
        self(request, connection)
    }
}

/// Receiver for SSDP datagrams, called on the dispatch thread
///
/// An error closes the socket the datagram came from.
pub trait SsdpHandler: Send + Sync {
    fn handle_datagram(&self, datagram: &[u8], peer: SocketAddr, role: SocketRole) -> io::Result<()>;
}

impl<F> SsdpHandler for F
where
    F: Fn(&[u8], SocketAddr, SocketRole) -> io::Result<()> + Send + Sync,
{
    fn handle_datagram(&self, datagram: &[u8], peer: SocketAddr, role: SocketRole) -> io::Result<()> {
        self(datagram, peer, role)
    }
}

/// Outcome of the optional WEB host validation callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostVerdict {
    Accept,
    Reject,
}

pub(crate) type HostValidator = Arc<dyn Fn(&str) -> HostVerdict + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct Handlers {
    pub soap: Option<Arc<dyn RequestHandler>>,
    pub gena: Option<Arc<dyn RequestHandler>>,
    pub web: Option<Arc<dyn RequestHandler>>,
    pub web_host_validator: Option<HostValidator>,
    pub ssdp: Option<Arc<dyn SsdpHandler>>,
}

impl Handlers {
    pub fn for_role(&self, role: CallbackRole) -> Option<&Arc<dyn RequestHandler>> {
        match role {
            CallbackRole::Soap => self.soap.as_ref(),
            CallbackRole::Gena => self.gena.as_ref(),
            CallbackRole::Web => self.web.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, role: CallbackRole) -> &mut Option<Arc<dyn RequestHandler>> {
        match role {
            CallbackRole::Soap => &mut self.soap,
            CallbackRole::Gena => &mut self.gena,
            CallbackRole::Web => &mut self.web,
        }
    }
}

/// Handler set shared between the server handle and its jobs
pub(crate) type HandlerRegistry = RwLock<Handlers>;

/// Per-connection settings copied from the server configuration
#[derive(Debug, Clone)]
pub(crate) struct ConnectionSettings {
    pub allow_literal_host_redirect: bool,
    pub http_read_timeout: Duration,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

/// Pick the handler slot for a request
pub fn route(request: &HttpRequest) -> Option<CallbackRole> {
    match request.method.as_str() {
        "POST" if request.headers.contains_key("soapaction") => Some(CallbackRole::Soap),
        "M-POST" => Some(CallbackRole::Soap),
        "NOTIFY" | "SUBSCRIBE" | "UNSUBSCRIBE" => Some(CallbackRole::Gena),
        "GET" | "HEAD" | "POST" => Some(CallbackRole::Web),
        _ => None,
    }
}

/// Whether a Host header names a literal IP address
///
/// The wildcard addresses `0.0.0.0` and `[::]` count as not numeric, as
/// does an empty value.
pub fn host_is_numeric(host: &str) -> bool {
    let host = host.trim();
    if host.is_empty() || host.starts_with("0.0.0.0") || host.starts_with("[::]") {
        return false;
    }
    if host.parse::<SocketAddr>().is_ok() || host.parse::<IpAddr>().is_ok() {
        return true;
    }
    host.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .is_some_and(|inner| inner.parse::<std::net::Ipv6Addr>().is_ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HostRejection {
    Missing,
    Validator,
    NotNumeric,
}

impl fmt::Display for HostRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HostRejection::Missing => "no Host header",
            HostRejection::Validator => "Host rejected by validator",
            HostRejection::NotNumeric => "Host is not a numeric address, possible DNS rebinding",
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HostCheck {
    Accept,
    Redirect,
    Reject(HostRejection),
}

pub(crate) fn check_host(
    request: &HttpRequest,
    role: CallbackRole,
    validator: Option<&HostValidator>,
    allow_literal_host_redirect: bool,
) -> HostCheck {
    let Some(host) = request.host() else {
        return HostCheck::Reject(HostRejection::Missing);
    };

    if role == CallbackRole::Web {
        if let Some(validator) = validator {
            return match validator(host) {
                HostVerdict::Accept => HostCheck::Accept,
                HostVerdict::Reject => HostCheck::Reject(HostRejection::Validator),
            };
        }
    }

    if host_is_numeric(host) {
        HostCheck::Accept
    } else if allow_literal_host_redirect {
        HostCheck::Redirect
    } else {
        HostCheck::Reject(HostRejection::NotNumeric)
    }
}

/// Serve one accepted connection on a worker thread
pub(crate) fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: &HandlerRegistry,
    settings: &ConnectionSettings,
) {
    if let Err(e) = stream.set_read_timeout(Some(settings.http_read_timeout)) {
        warn!("Could not set read timeout for {}: {}", peer, e);
    }

    let (request, pending) = match request::read_request_head(&mut stream, settings.max_header_bytes) {
        Ok(parsed) => parsed,
        Err(RequestError::Io(e)) => {
            debug!("Connection from {} closed before a request arrived: {}", peer, e);
            return;
        }
        Err(e) => {
            warn!("Bad request from {}: {}", peer, e);
            if let Err(e) = request::write_status(&mut stream, StatusCode::BAD_REQUEST) {
                debug!("Could not send 400 to {}: {}", peer, e);
            }
            return;
        }
    };

    let mut connection = match Connection::new(stream, peer, pending, settings.max_body_bytes) {
        Ok(connection) => connection,
        Err(e) => {
            warn!("Could not inspect connection from {}: {}", peer, e);
            return;
        }
    };

    let handlers = registry.read().clone();
    let routed = route(&request)
        .and_then(|role| handlers.for_role(role).map(|handler| (role, Arc::clone(handler))));
    let Some((role, handler)) = routed else {
        debug!("No handler for {} {} from {}", request.method, request.target, peer);
        reply_status(&mut connection, StatusCode::INTERNAL_SERVER_ERROR);
        return;
    };

    match check_host(
        &request,
        role,
        handlers.web_host_validator.as_ref(),
        settings.allow_literal_host_redirect,
    ) {
        HostCheck::Accept => {}
        HostCheck::Redirect => {
            debug!("Redirecting {} to numeric host {}", peer, connection.local_addr());
            if let Err(e) = connection.send_literal_redirect() {
                debug!("Could not send redirect to {}: {}", peer, e);
            }
            return;
        }
        HostCheck::Reject(reason) => {
            warn!("Dropping {} request from {}: {}", role, peer, reason);
            return;
        }
    }

    debug!("Dispatching {} {} from {} to {}", request.method, request.target, peer, role);
    let status = handler.handle(&request, &mut connection);
    if status.as_u16() >= 400 {
        reply_status(&mut connection, status);
    }
    debug!("Finished {} request from {} with {}", role, peer, status);
}

fn reply_status(connection: &mut Connection, status: StatusCode) {
    if let Err(e) = connection.send_status(status) {
        debug!(
            "Could not send {} to {}: {}",
            status,
            connection.peer_addr(),
            e
        );
    }
}
