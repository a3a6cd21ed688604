//! Socket helpers used by the miniserver
//!
//! Every platform-specific socket option and the readiness wait live here;
//! the dispatch loop only sees listeners, datagram sockets and raw
//! descriptors.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, UdpSocket};
use std::ops::RangeInclusive;

use socket2::{Domain, Protocol, SockRef, Socket, Type};

/// Payload that asks a running dispatch loop to stop
pub const SHUTDOWN_TOKEN: &[u8] = b"ShutDown";

pub const SSDP_PORT: u16 = 1900;
pub const SSDP_GROUP_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_GROUP_V6_LINK_LOCAL: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xc);
pub const SSDP_GROUP_V6_SITE_LOCAL: Ipv6Addr = Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0xc);

const LISTEN_BACKLOG: i32 = 128;

#[cfg(unix)]
pub type RawDescriptor = std::os::unix::io::RawFd;
#[cfg(windows)]
pub type RawDescriptor = std::os::windows::io::RawSocket;

/// Access to the OS descriptor behind a socket
pub trait AsDescriptor {
    fn descriptor(&self) -> RawDescriptor;
}

macro_rules! impl_as_descriptor {
    ($($ty:ty),*) => {
        $(
            impl AsDescriptor for $ty {
                #[cfg(unix)]
                fn descriptor(&self) -> RawDescriptor {
                    std::os::unix::io::AsRawFd::as_raw_fd(self)
                }

                #[cfg(windows)]
                fn descriptor(&self) -> RawDescriptor {
                    std::os::windows::io::AsRawSocket::as_raw_socket(self)
                }
            }
        )*
    };
}

impl_as_descriptor!(TcpListener, UdpSocket, std::net::TcpStream);

/// SSDP multicast group membership
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsdpGroup {
    /// 239.255.255.250 on the given interface address
    V4 { interface: Ipv4Addr },
    /// ff02::c on the given interface index
    V6LinkLocal { interface: u32 },
    /// ff05::c on the given interface index, for ULA/GUA addresses
    V6SiteLocal { interface: u32 },
}

/// Bind a non-blocking TCP listener to the first free port of `ports`
///
/// Address reuse is disabled so two servers never share a port. A range of
/// `0..=0` lets the OS pick an ephemeral port.
pub fn bind_stream_listener(ip: IpAddr, ports: RangeInclusive<u16>) -> io::Result<TcpListener> {
    let mut last_error = None;
    for port in ports {
        match bind_stream_at(SocketAddr::new(ip, port)) {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => last_error = Some(e),
            Err(e) => return Err(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "empty port range")
    }))
}

fn bind_stream_at(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(false)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Bind a non-blocking UDP socket to `addr`
pub fn bind_datagram(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Bind a UDP socket on the SSDP port and join the SSDP multicast group
pub fn bind_ssdp_multicast(group: SsdpGroup) -> io::Result<UdpSocket> {
    let (domain, bind_addr) = match group {
        SsdpGroup::V4 { .. } => (
            Domain::IPV4,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), SSDP_PORT),
        ),
        SsdpGroup::V6LinkLocal { .. } | SsdpGroup::V6SiteLocal { .. } => (
            Domain::IPV6,
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), SSDP_PORT),
        ),
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    if domain == Domain::IPV6 {
        socket.set_only_v6(true)?;
    }
    socket.bind(&bind_addr.into())?;

    match group {
        SsdpGroup::V4 { interface } => socket.join_multicast_v4(&SSDP_GROUP_V4, &interface)?,
        SsdpGroup::V6LinkLocal { interface } => {
            socket.join_multicast_v6(&SSDP_GROUP_V6_LINK_LOCAL, interface)?
        }
        SsdpGroup::V6SiteLocal { interface } => {
            socket.join_multicast_v6(&SSDP_GROUP_V6_SITE_LOCAL, interface)?
        }
    }

    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Bind the loopback-only stop socket on an ephemeral port
pub fn bind_stop_socket() -> io::Result<UdpSocket> {
    bind_datagram(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
}

/// Send the shutdown token to a stop socket on 127.0.0.1
pub fn send_stop_datagram(sender: &UdpSocket, stop_port: u16) -> io::Result<()> {
    let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), stop_port);
    sender.send_to(SHUTDOWN_TOKEN, target).map(|_| ())
}

/// True if the socket has a local address with a non-zero port
pub fn is_bound(socket: SockRef<'_>) -> bool {
    socket
        .local_addr()
        .ok()
        .and_then(|addr| addr.as_socket())
        .is_some_and(|addr| addr.port() != 0)
}

/// How the dispatch loop reacts to a failed readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFailure {
    /// Interrupted call or stale descriptor; build the set again
    Retry,
    /// Anything else ends the loop
    Fatal,
}

pub fn classify_wait_error(error: &io::Error) -> WaitFailure {
    if error.kind() == io::ErrorKind::Interrupted {
        return WaitFailure::Retry;
    }
    #[cfg(unix)]
    if error.raw_os_error() == Some(libc::EBADF) {
        return WaitFailure::Retry;
    }
    WaitFailure::Fatal
}

/// Block until at least one descriptor is readable
///
/// Returns one flag per descriptor, in input order. There is no timeout.
#[cfg(unix)]
pub fn wait_readable(descriptors: &[RawDescriptor]) -> io::Result<Vec<bool>> {
    let mut fds: Vec<libc::pollfd> = descriptors
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    // SAFETY: fds is a valid, exclusively borrowed array of fds.len() entries
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    if fds.iter().any(|fd| fd.revents & libc::POLLNVAL != 0) {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }

    Ok(fds
        .iter()
        .map(|fd| fd.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0)
        .collect())
}

#[cfg(not(unix))]
pub fn wait_readable(_descriptors: &[RawDescriptor]) -> io::Result<Vec<bool>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "readiness wait is only implemented for unix targets",
    ))
}
