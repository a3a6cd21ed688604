//! The descriptors one dispatch loop owns

use std::fmt;
use std::net::{IpAddr, SocketAddr, TcpListener, UdpSocket};
use std::ops::RangeInclusive;

use socket2::SockRef;
use tracing::{debug, warn};

use crate::error::{MiniServerError, Result};
use crate::socket_io::{self, AsDescriptor, RawDescriptor, SsdpGroup};

/// Protocol role of a descriptor in a [`ListenSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketRole {
    HttpV4,
    HttpV6,
    /// IPv6 unique-local or global unicast HTTP listener
    HttpV6UlaGua,
    SsdpV4,
    SsdpV6,
    SsdpV6UlaGua,
    /// Unicast socket for M-SEARCH requests and their replies
    SsdpReqV4,
    SsdpReqV6,
}

impl SocketRole {
    pub fn is_stream(self) -> bool {
        matches!(self, SocketRole::HttpV4 | SocketRole::HttpV6 | SocketRole::HttpV6UlaGua)
    }

    pub fn is_multicast(self) -> bool {
        matches!(self, SocketRole::SsdpV4 | SocketRole::SsdpV6 | SocketRole::SsdpV6UlaGua)
    }
}

impl fmt::Display for SocketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocketRole::HttpV4 => "HTTP IPv4",
            SocketRole::HttpV6 => "HTTP IPv6",
            SocketRole::HttpV6UlaGua => "HTTP IPv6 ULA/GUA",
            SocketRole::SsdpV4 => "SSDP IPv4",
            SocketRole::SsdpV6 => "SSDP IPv6",
            SocketRole::SsdpV6UlaGua => "SSDP IPv6 ULA/GUA",
            SocketRole::SsdpReqV4 => "SSDP request IPv4",
            SocketRole::SsdpReqV6 => "SSDP request IPv6",
        };
        f.write_str(name)
    }
}

pub(crate) enum Endpoint {
    Stream(TcpListener),
    Datagram(UdpSocket),
}

impl Endpoint {
    fn descriptor(&self) -> RawDescriptor {
        match self {
            Endpoint::Stream(listener) => listener.descriptor(),
            Endpoint::Datagram(socket) => socket.descriptor(),
        }
    }

    fn is_bound(&self) -> bool {
        match self {
            Endpoint::Stream(listener) => socket_io::is_bound(SockRef::from(listener)),
            Endpoint::Datagram(socket) => socket_io::is_bound(SockRef::from(socket)),
        }
    }

    fn local_port(&self) -> Option<u16> {
        let addr = match self {
            Endpoint::Stream(listener) => listener.local_addr(),
            Endpoint::Datagram(socket) => socket.local_addr(),
        };
        addr.ok().map(|addr| addr.port())
    }
}

pub(crate) struct ListenEntry {
    pub role: SocketRole,
    pub endpoint: Endpoint,
}

/// Listening and datagram sockets handed to [`MiniServer::start`](crate::MiniServer::start)
///
/// Always contains the loopback stop socket; every other descriptor is
/// tagged with its [`SocketRole`], at most one per role. Dropping the set
/// closes every descriptor.
pub struct ListenSet {
    entries: Vec<ListenEntry>,
    stop_socket: UdpSocket,
}

impl ListenSet {
    /// Create an empty set with a fresh stop socket
    pub fn new() -> Result<Self> {
        let stop_socket = socket_io::bind_stop_socket()
            .map_err(|e| MiniServerError::socket("binding the stop socket", e))?;
        Ok(Self {
            entries: Vec::new(),
            stop_socket,
        })
    }

    /// Add an already bound TCP listener
    pub fn add_listener(&mut self, role: SocketRole, listener: TcpListener) -> Result<()> {
        if !role.is_stream() {
            return Err(MiniServerError::Config(format!(
                "{} is not a stream role",
                role
            )));
        }
        listener
            .set_nonblocking(true)
            .map_err(|e| MiniServerError::socket("configuring a listener", e))?;
        self.insert(role, Endpoint::Stream(listener))
    }

    /// Add an already bound UDP socket
    pub fn add_datagram(&mut self, role: SocketRole, socket: UdpSocket) -> Result<()> {
        if role.is_stream() {
            return Err(MiniServerError::Config(format!(
                "{} is not a datagram role",
                role
            )));
        }
        socket
            .set_nonblocking(true)
            .map_err(|e| MiniServerError::socket("configuring a datagram socket", e))?;
        self.insert(role, Endpoint::Datagram(socket))
    }

    /// Bind an HTTP listener on `ip` at the first free port in `ports`
    pub fn bind_http(&mut self, role: SocketRole, ip: IpAddr, ports: RangeInclusive<u16>) -> Result<u16> {
        let first = SocketAddr::new(ip, *ports.start());
        let listener = socket_io::bind_stream_listener(ip, ports)
            .map_err(|source| MiniServerError::Bind { addr: first, source })?;
        let port = listener
            .local_addr()
            .map_err(|e| MiniServerError::socket("reading listener address", e))?
            .port();
        self.add_listener(role, listener)?;
        debug!("Bound {} listener on {}:{}", role, ip, port);
        Ok(port)
    }

    /// Join an SSDP multicast group on port 1900
    pub fn bind_ssdp(&mut self, role: SocketRole, group: SsdpGroup) -> Result<()> {
        if !role.is_multicast() {
            return Err(MiniServerError::Config(format!(
                "{} is not a multicast role",
                role
            )));
        }
        let socket = socket_io::bind_ssdp_multicast(group).map_err(|source| MiniServerError::Bind {
            addr: SocketAddr::new(IpAddr::from([0, 0, 0, 0]), socket_io::SSDP_PORT),
            source,
        })?;
        self.add_datagram(role, socket)
    }

    /// Bind a unicast SSDP request socket on an ephemeral port
    pub fn bind_ssdp_request(&mut self, role: SocketRole, ip: IpAddr) -> Result<u16> {
        if !matches!(role, SocketRole::SsdpReqV4 | SocketRole::SsdpReqV6) {
            return Err(MiniServerError::Config(format!(
                "{} is not an SSDP request role",
                role
            )));
        }
        let addr = SocketAddr::new(ip, 0);
        let socket = socket_io::bind_datagram(addr)
            .map_err(|source| MiniServerError::Bind { addr, source })?;
        let port = socket
            .local_addr()
            .map_err(|e| MiniServerError::socket("reading datagram address", e))?
            .port();
        self.add_datagram(role, socket)?;
        Ok(port)
    }

    pub fn stop_port(&self) -> u16 {
        self.stop_socket
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(0)
    }

    /// Bound port per role
    pub fn ports(&self) -> Vec<(SocketRole, u16)> {
        self.entries
            .iter()
            .filter_map(|entry| entry.endpoint.local_port().map(|port| (entry.role, port)))
            .collect()
    }

    pub fn port_of(&self, role: SocketRole) -> Option<u16> {
        self.entries
            .iter()
            .find(|entry| entry.role == role)
            .and_then(|entry| entry.endpoint.local_port())
    }

    /// Number of descriptors besides the stop socket
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> &[ListenEntry] {
        &self.entries
    }

    pub(crate) fn stop_socket(&self) -> &UdpSocket {
        &self.stop_socket
    }

    /// Close and forget the descriptor at `index`
    pub(crate) fn invalidate(&mut self, index: usize) {
        if index < self.entries.len() {
            let entry = self.entries.remove(index);
            warn!("Closed {} socket", entry.role);
        }
    }

    /// Drop descriptors that are not bound to a port
    pub(crate) fn discard_unbound(&mut self) {
        self.entries.retain(|entry| {
            let bound = entry.endpoint.is_bound();
            if !bound {
                warn!("Skipping {} socket: not bound", entry.role);
            }
            bound
        });
    }

    /// Stop socket first, then one descriptor per entry in order
    pub(crate) fn descriptors(&self) -> Vec<RawDescriptor> {
        std::iter::once(self.stop_socket.descriptor())
            .chain(self.entries.iter().map(|entry| entry.endpoint.descriptor()))
            .collect()
    }

    fn insert(&mut self, role: SocketRole, endpoint: Endpoint) -> Result<()> {
        if self.entries.iter().any(|entry| entry.role == role) {
            return Err(MiniServerError::Config(format!(
                "{} socket already present",
                role
            )));
        }
        self.entries.push(ListenEntry { role, endpoint });
        Ok(())
    }
}

impl fmt::Debug for ListenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenSet")
            .field("stop_port", &self.stop_port())
            .field("ports", &self.ports())
            .finish()
    }
}
