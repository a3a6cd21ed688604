//! MiniServer lifecycle and the dispatch loop
//!
//! The loop runs as a persistent job on the pool. It owns the [`ListenSet`]
//! for its whole life; `stop` talks to it only through the stop socket.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thread_pool::{Job, JobPriority, ThreadPool};
use tracing::{debug, error, info, warn};

use crate::config::MiniServerConfig;
use crate::dispatch::{
    self, CallbackRole, ConnectionSettings, HandlerRegistry, HostVerdict, RequestHandler,
    SsdpHandler,
};
use crate::error::{MiniServerError, Result};
use crate::listen_set::{Endpoint, ListenSet, SocketRole};
use crate::socket_io::{self, WaitFailure, SHUTDOWN_TOKEN};

/// How long `stop` waits for the loop before sending the token again
const STOP_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle of one dispatch loop invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Running,
    Stopping,
}

struct Lifecycle {
    state: ServerState,
    /// Generation of the loop `start` is waiting for
    launching: Option<u64>,
    generation: u64,
    stop_port: Option<u16>,
    ports: Vec<(SocketRole, u16)>,
    #[cfg(test)]
    history: Vec<ServerState>,
}

impl Lifecycle {
    fn enter(&mut self, state: ServerState) {
        if self.state == state {
            return;
        }
        self.state = state;
        #[cfg(test)]
        self.history.push(state);
    }
}

struct ServerShared {
    lifecycle: Mutex<Lifecycle>,
    changed: Condvar,
}

impl ServerShared {
    fn set_state(&self, state: ServerState) {
        self.lifecycle.lock().enter(state);
        self.changed.notify_all();
    }
}

/// Single-threaded HTTP and SSDP listener
///
/// Accepted HTTP connections are served by Med priority jobs on the pool;
/// SSDP datagrams are handed to the SSDP handler on the dispatch thread in
/// arrival order.
pub struct MiniServer {
    pool: Arc<ThreadPool>,
    config: MiniServerConfig,
    handlers: Arc<HandlerRegistry>,
    shared: Arc<ServerShared>,
}

impl MiniServer {
    pub fn new(pool: Arc<ThreadPool>, config: MiniServerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pool,
            config,
            handlers: Arc::new(HandlerRegistry::default()),
            shared: Arc::new(ServerShared {
                lifecycle: Mutex::new(Lifecycle {
                    state: ServerState::Idle,
                    launching: None,
                    generation: 0,
                    stop_port: None,
                    ports: Vec::new(),
                    #[cfg(test)]
                    history: Vec::new(),
                }),
                changed: Condvar::new(),
            }),
        })
    }

    pub fn config(&self) -> &MiniServerConfig {
        &self.config
    }

    /// Install the handler for one request role, replacing any previous one
    pub fn register_handler<H>(&self, role: CallbackRole, handler: H)
    where
        H: RequestHandler + 'static,
    {
        *self.handlers.write().slot_mut(role) = Some(Arc::new(handler));
    }

    pub fn unregister_handler(&self, role: CallbackRole) {
        *self.handlers.write().slot_mut(role) = None;
    }

    /// Replace the numeric-host check for WEB requests with `validator`
    pub fn set_web_host_validator<F>(&self, validator: F)
    where
        F: Fn(&str) -> HostVerdict + Send + Sync + 'static,
    {
        self.handlers.write().web_host_validator = Some(Arc::new(validator));
    }

    pub fn clear_web_host_validator(&self) {
        self.handlers.write().web_host_validator = None;
    }

    pub fn register_ssdp_handler<H>(&self, handler: H)
    where
        H: SsdpHandler + 'static,
    {
        self.handlers.write().ssdp = Some(Arc::new(handler));
    }

    pub fn unregister_ssdp_handler(&self) {
        self.handlers.write().ssdp = None;
    }

    /// Bind an HTTP listener using the configured port range
    pub fn bind_http(&self, listen_set: &mut ListenSet, role: SocketRole, ip: IpAddr) -> Result<u16> {
        listen_set.bind_http(role, ip, self.config.port_range())
    }

    /// Run the dispatch loop over `listen_set` on a persistent worker
    ///
    /// Returns once the loop reports Running. If it does not within the
    /// startup timeout, the loop is told to release its descriptors as soon
    /// as it starts and [`MiniServerError::StartupTimeout`] is returned.
    pub fn start(&self, listen_set: ListenSet) -> Result<()> {
        let generation = {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.state != ServerState::Idle || lifecycle.launching.is_some() {
                return Err(MiniServerError::AlreadyRunning);
            }
            lifecycle.generation += 1;
            lifecycle.launching = Some(lifecycle.generation);
            lifecycle.stop_port = Some(listen_set.stop_port());
            lifecycle.ports = listen_set.ports();
            lifecycle.generation
        };

        let dispatch_loop = DispatchLoop {
            ssdp_buffer: vec![0u8; self.config.ssdp_buffer_size],
            listen_set,
            shared: Arc::clone(&self.shared),
            handlers: Arc::clone(&self.handlers),
            pool: Arc::clone(&self.pool),
            settings: ConnectionSettings {
                allow_literal_host_redirect: self.config.allow_literal_host_redirect,
                http_read_timeout: self.config.http_read_timeout,
                max_header_bytes: self.config.max_header_bytes,
                max_body_bytes: self.config.max_body_bytes,
            },
            generation,
        };

        let job = Job::new(move || dispatch_loop.run()).with_priority(JobPriority::Med);
        if let Err(e) = self.pool.submit_persistent(job) {
            let mut lifecycle = self.shared.lifecycle.lock();
            lifecycle.launching = None;
            lifecycle.stop_port = None;
            lifecycle.ports.clear();
            error!("Could not start miniserver loop: {}", e);
            return Err(e.into());
        }

        let deadline = Instant::now() + self.config.startup_timeout;
        let mut lifecycle = self.shared.lifecycle.lock();
        while lifecycle.state != ServerState::Running {
            if Instant::now() >= deadline {
                lifecycle.launching = None;
                lifecycle.stop_port = None;
                lifecycle.ports.clear();
                error!(
                    "MiniServer did not start within {:?}",
                    self.config.startup_timeout
                );
                return Err(MiniServerError::StartupTimeout(self.config.startup_timeout));
            }
            self.shared
                .changed
                .wait_for(&mut lifecycle, self.config.startup_poll_interval);
        }
        lifecycle.launching = None;

        info!(
            "MiniServer started (stop port {:?}, listening on {:?})",
            lifecycle.stop_port, lifecycle.ports
        );
        Ok(())
    }

    /// Ask the loop to stop and wait until it is Idle again
    ///
    /// The shutdown token is sent to the stop socket, and sent again every
    /// second until the loop has released its descriptors.
    pub fn stop(&self) -> Result<()> {
        let stop_port = {
            let mut lifecycle = self.shared.lifecycle.lock();
            match lifecycle.state {
                ServerState::Idle => return Err(MiniServerError::NotRunning),
                ServerState::Running => {
                    lifecycle.enter(ServerState::Stopping);
                    self.shared.changed.notify_all();
                }
                ServerState::Stopping => {}
            }
            lifecycle.stop_port.ok_or(MiniServerError::NotRunning)?
        };

        let sender = socket_io::bind_datagram(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .map_err(|e| MiniServerError::socket("binding the stop sender", e))?;

        loop {
            if let Err(e) = socket_io::send_stop_datagram(&sender, stop_port) {
                warn!("Sending stop datagram to port {} failed: {}", stop_port, e);
            }

            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.state != ServerState::Idle {
                self.shared
                    .changed
                    .wait_for(&mut lifecycle, STOP_RETRY_INTERVAL);
            }
            if lifecycle.state == ServerState::Idle {
                lifecycle.stop_port = None;
                lifecycle.ports.clear();
                break;
            }
        }

        info!("MiniServer stopped");
        Ok(())
    }

    pub fn state(&self) -> ServerState {
        self.shared.lifecycle.lock().state
    }

    /// Port of the stop socket while a loop is active
    pub fn stop_port(&self) -> Option<u16> {
        self.shared.lifecycle.lock().stop_port
    }

    /// Bound ports of the running loop
    pub fn ports(&self) -> Vec<(SocketRole, u16)> {
        self.shared.lifecycle.lock().ports.clone()
    }

    pub fn port_of(&self, role: SocketRole) -> Option<u16> {
        self.ports()
            .into_iter()
            .find(|(bound_role, _)| *bound_role == role)
            .map(|(_, port)| port)
    }
}

impl fmt::Debug for MiniServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.shared.lifecycle.lock();
        f.debug_struct("MiniServer")
            .field("state", &lifecycle.state)
            .field("stop_port", &lifecycle.stop_port)
            .field("ports", &lifecycle.ports)
            .finish()
    }
}

/// Only the exact token from 127.0.0.1 stops the loop
///
/// A single trailing NUL after the token is tolerated.
pub(crate) fn is_stop_request(payload: &[u8], peer: SocketAddr) -> bool {
    let token_matches = payload == SHUTDOWN_TOKEN
        || (payload.len() == SHUTDOWN_TOKEN.len() + 1
            && payload.starts_with(SHUTDOWN_TOKEN)
            && payload[SHUTDOWN_TOKEN.len()] == 0);
    token_matches && peer.ip() == IpAddr::V4(Ipv4Addr::LOCALHOST)
}

struct DispatchLoop {
    listen_set: ListenSet,
    shared: Arc<ServerShared>,
    handlers: Arc<HandlerRegistry>,
    pool: Arc<ThreadPool>,
    settings: ConnectionSettings,
    ssdp_buffer: Vec<u8>,
    generation: u64,
}

impl DispatchLoop {
    fn run(mut self) {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.launching != Some(self.generation) {
                warn!("MiniServer start was abandoned; releasing sockets");
                return;
            }
            lifecycle.enter(ServerState::Running);
            self.shared.changed.notify_all();
        }
        debug!("Dispatch loop running");

        loop {
            self.listen_set.discard_unbound();
            let descriptors = self.listen_set.descriptors();

            let ready = match socket_io::wait_readable(&descriptors) {
                Ok(ready) => ready,
                Err(e) => match socket_io::classify_wait_error(&e) {
                    WaitFailure::Retry => {
                        debug!("Readiness wait interrupted: {}", e);
                        continue;
                    }
                    WaitFailure::Fatal => {
                        error!("Readiness wait failed, stopping dispatch loop: {}", e);
                        break;
                    }
                },
            };

            let mut broken = Vec::new();
            for (index, entry) in self.listen_set.entries().iter().enumerate() {
                if !ready.get(index + 1).copied().unwrap_or(false) {
                    continue;
                }
                match &entry.endpoint {
                    Endpoint::Stream(listener) => self.accept_connection(listener, entry.role),
                    Endpoint::Datagram(socket) => {
                        let handler = self.handlers.read().ssdp.clone();
                        if !read_datagram(socket, entry.role, handler.as_deref(), &mut self.ssdp_buffer) {
                            broken.push(index);
                        }
                    }
                }
            }
            for index in broken.into_iter().rev() {
                self.listen_set.invalidate(index);
            }

            if ready.first().copied().unwrap_or(false) && stop_requested(self.listen_set.stop_socket()) {
                self.shared.set_state(ServerState::Stopping);
                break;
            }
        }

        let shared = Arc::clone(&self.shared);
        // closes every descriptor before reporting Idle
        drop(self);
        shared.set_state(ServerState::Idle);
        debug!("Dispatch loop exited");
    }

    fn accept_connection(&self, listener: &TcpListener, role: SocketRole) {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!("Accept on {} socket failed: {}", role, e);
                return;
            }
        };

        if let Err(e) = stream.set_nonblocking(false) {
            warn!("Could not configure connection from {}: {}", peer, e);
            return;
        }

        let handlers = Arc::clone(&self.handlers);
        let settings = self.settings.clone();
        let job = Job::new(move || dispatch::serve_connection(stream, peer, &handlers, &settings))
            .with_priority(JobPriority::Med)
            .with_cleanup(move || debug!("Connection job for {} released", peer));

        match self.pool.submit(job) {
            Ok(id) => debug!("Connection from {} on {} queued as job {}", peer, role, id),
            Err(e) => warn!("Dropping connection from {}: {}", peer, e),
        }
    }
}

/// Read one datagram and hand it to the SSDP handler
///
/// Returns false when the socket should be closed.
fn read_datagram(
    socket: &UdpSocket,
    role: SocketRole,
    handler: Option<&dyn SsdpHandler>,
    buffer: &mut [u8],
) -> bool {
    match socket.recv_from(buffer) {
        Ok((len, peer)) => match handler {
            Some(handler) => match handler.handle_datagram(&buffer[..len], peer, role) {
                Ok(()) => true,
                Err(e) => {
                    error!("SSDP handler failed on {} socket: {}", role, e);
                    false
                }
            },
            None => {
                debug!("No SSDP handler; dropped {} bytes from {}", len, peer);
                true
            }
        },
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => true,
        Err(e) => {
            error!("Receive on {} socket failed: {}", role, e);
            false
        }
    }
}

fn stop_requested(stop_socket: &UdpSocket) -> bool {
    let mut buffer = [0u8; 32];
    match stop_socket.recv_from(&mut buffer) {
        Ok((len, peer)) => {
            let stop = is_stop_request(&buffer[..len], peer);
            if stop {
                info!("Received stop request from {}", peer);
            } else {
                debug!("Ignoring {} byte datagram on stop socket from {}", len, peer);
            }
            stop
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => false,
        Err(e) => {
            error!("Stop socket receive failed, stopping: {}", e);
            true
        }
    }
}
