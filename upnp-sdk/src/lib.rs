//! Embeddable UPnP runtime core
//!
//! Bundles the three building blocks a UPnP stack runs on:
//!
//! - [`thread_pool`]: bounded priority worker pools with starvation bumping
//! - [`timer_thread`]: deferred job submission
//! - [`miniserver`]: the HTTP/SSDP connection dispatcher
//!
//! [`UpnpRuntime`] wires them together the way a UPnP device or control
//! point uses them and shuts them down in dependency order.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::net::{IpAddr, Ipv4Addr};
//! use std::time::Duration;
//! use upnp_sdk::miniserver::{CallbackRole, Connection, HttpRequest, ListenSet, SocketRole};
//! use upnp_sdk::thread_pool::Job;
//! use upnp_sdk::timer_thread::{Persistence, Timeout};
//! use upnp_sdk::{RuntimeConfig, UpnpRuntime};
//!
//! # fn main() -> upnp_sdk::Result<()> {
//! upnp_sdk::logging::init_logging_from_env()?;
//!
//! let runtime = UpnpRuntime::init(RuntimeConfig::default())?;
//! runtime.register_callback(CallbackRole::Web, |_req: &HttpRequest, _conn: &mut Connection| {
//!     http::StatusCode::NOT_FOUND
//! });
//!
//! let mut listen_set = ListenSet::new()?;
//! runtime.miniserver().bind_http(
//!     &mut listen_set,
//!     SocketRole::HttpV4,
//!     IpAddr::V4(Ipv4Addr::UNSPECIFIED),
//! )?;
//! runtime.start_miniserver(listen_set)?;
//!
//! runtime.schedule(
//!     Job::new(|| println!("advertisement due")),
//!     Timeout::Relative(Duration::from_secs(30)),
//!     Persistence::ShortTerm,
//! )?;
//!
//! runtime.finish()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
mod runtime;

pub use config::RuntimeConfig;
pub use error::{ErrorKind, Result, UpnpError};
pub use logging::{init_logging, init_logging_from_env, LoggingError, LoggingMode};
pub use runtime::UpnpRuntime;

pub use miniserver;
pub use thread_pool;
pub use timer_thread;
