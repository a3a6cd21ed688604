//! Readiness-multiplexed listener for the UPnP runtime
//!
//! A [`MiniServer`] owns one dispatch loop that waits on HTTP listeners,
//! SSDP sockets and a loopback stop socket. HTTP connections are served on
//! the worker pool by the handler registered for their [`CallbackRole`];
//! SSDP datagrams go to the [`SsdpHandler`] on the dispatch thread.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::net::{IpAddr, Ipv4Addr};
//! use std::sync::Arc;
//!
//! use http::StatusCode;
//! use miniserver::{CallbackRole, ListenSet, MiniServer, MiniServerConfig, SocketRole};
//! use thread_pool::ThreadPool;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = Arc::new(ThreadPool::with_defaults()?);
//! let server = MiniServer::new(Arc::clone(&pool), MiniServerConfig::default())?;
//! server.register_handler(CallbackRole::Web, |_req: &miniserver::HttpRequest, _conn: &mut miniserver::Connection| {
//!     StatusCode::NOT_FOUND
//! });
//!
//! let mut listen_set = ListenSet::new()?;
//! server.bind_http(&mut listen_set, SocketRole::HttpV4, IpAddr::V4(Ipv4Addr::LOCALHOST))?;
//! server.start(listen_set)?;
//! server.stop()?;
//! pool.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod listen_set;
pub mod request;
mod server;
pub mod socket_io;

pub use config::{MiniServerConfig, APPLICATION_LISTENING_PORT};
pub use dispatch::{host_is_numeric, route, CallbackRole, HostVerdict, RequestHandler, SsdpHandler};
pub use error::{MiniServerError, RequestError, Result};
pub use listen_set::{ListenSet, SocketRole};
pub use request::{Connection, HttpRequest};
pub use server::{MiniServer, ServerState};
pub use socket_io::SsdpGroup;
