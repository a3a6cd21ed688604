//! End-to-end tests for the runtime facade

use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpStream};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use http::StatusCode;
use upnp_sdk::miniserver::{CallbackRole, Connection, HttpRequest, ListenSet, ServerState, SocketRole};
use upnp_sdk::thread_pool::{Job, JobPriority, PoolAttributes, PoolState};
use upnp_sdk::timer_thread::{Persistence, Timeout};
use upnp_sdk::{ErrorKind, RuntimeConfig, UpnpError, UpnpRuntime};

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Send pool with exactly one worker left over once the timer has taken its own
fn single_send_worker_config() -> RuntimeConfig {
    RuntimeConfig::ephemeral().with_send_pool(
        PoolAttributes::new()
            .with_threads(2, 2)
            .with_starvation_time(Duration::from_secs(60))
            .with_max_idle_time(Duration::from_secs(60)),
    )
}

fn start_on_loopback(runtime: &UpnpRuntime) -> u16 {
    let mut listen_set = ListenSet::new().unwrap();
    let port = runtime
        .miniserver()
        .bind_http(&mut listen_set, SocketRole::HttpV4, LOOPBACK)
        .unwrap();
    runtime.start_miniserver(listen_set).unwrap();
    port
}

#[test]
fn test_init_and_finish() {
    let runtime = UpnpRuntime::init(RuntimeConfig::ephemeral()).unwrap();
    assert_eq!(runtime.miniserver().state(), ServerState::Idle);
    assert_eq!(runtime.send_pool().stats().persistent_threads, 1);

    runtime.finish().unwrap();
    assert!(runtime.is_finished());
    for pool in [runtime.send_pool(), runtime.recv_pool(), runtime.miniserver_pool()] {
        assert_eq!(pool.state(), PoolState::ShuttingDown);
        assert_eq!(pool.stats().total_threads, 0);
    }

    let again = runtime.finish();
    assert!(matches!(again, Err(UpnpError::Finished)));

    let submitted = runtime.submit(Job::new(|| {}));
    assert_eq!(ErrorKind::of(&submitted), ErrorKind::InternalError);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = RuntimeConfig::ephemeral()
        .with_miniserver_pool(PoolAttributes::new().with_threads(1, 1));
    let result = UpnpRuntime::init(config);
    assert_eq!(ErrorKind::of(&result), ErrorKind::InvalidParam);
}

#[test]
fn test_high_jobs_complete_before_low_job_starts() {
    let runtime = UpnpRuntime::init(single_send_worker_config()).unwrap();
    let port = start_on_loopback(&runtime);
    assert_ne!(port, 0);

    // occupy the only free send worker so all four jobs queue up together
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    runtime
        .submit(Job::new(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        }))
        .unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let runtime = Arc::new(runtime);
    let submitters: Vec<_> = [
        ("low", JobPriority::Low),
        ("high-1", JobPriority::High),
        ("high-2", JobPriority::High),
        ("high-3", JobPriority::High),
    ]
    .into_iter()
    .map(|(name, priority)| {
        let runtime = Arc::clone(&runtime);
        let events = Arc::clone(&events);
        thread::spawn(move || {
            runtime
                .submit(
                    Job::new(move || {
                        events.lock().unwrap().push(format!("{} start", name));
                        thread::sleep(Duration::from_millis(10));
                        events.lock().unwrap().push(format!("{} end", name));
                    })
                    .with_priority(priority),
                )
                .unwrap();
        })
    })
    .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }
    assert_eq!(runtime.send_pool().stats().high_jobs_pending, 3);

    release_tx.send(()).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while events.lock().unwrap().len() < 8 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    let events = events.lock().unwrap().clone();
    assert_eq!(events.len(), 8, "{:?}", events);
    let low_start = events.iter().position(|e| e == "low start").unwrap();
    for high in ["high-1", "high-2", "high-3"] {
        let end = events.iter().position(|e| *e == format!("{} end", high)).unwrap();
        assert!(end < low_start, "{:?}", events);
    }

    runtime.finish().unwrap();
}

#[test]
fn test_scheduled_job_runs_on_send_pool() {
    let runtime = UpnpRuntime::init(RuntimeConfig::ephemeral()).unwrap();

    let (tx, rx) = mpsc::channel();
    runtime
        .schedule(
            Job::new(move || {
                let name = thread::current().name().map(str::to_string);
                let _ = tx.send(name);
            }),
            Timeout::Relative(Duration::from_millis(20)),
            Persistence::ShortTerm,
        )
        .unwrap();

    let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(worker.unwrap_or_default().starts_with("upnp-worker-"));
    runtime.finish().unwrap();
}

#[test]
fn test_cancelled_event_never_runs() {
    let runtime = UpnpRuntime::init(RuntimeConfig::ephemeral()).unwrap();

    let (tx, rx) = mpsc::channel::<()>();
    let id = runtime
        .schedule(
            Job::new(move || {
                let _ = tx.send(());
            }),
            Timeout::Relative(Duration::from_secs(60)),
            Persistence::ShortTerm,
        )
        .unwrap();

    let job = runtime.cancel(id).unwrap();
    drop(job);
    assert_eq!(runtime.timer().pending(), 0);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    let again = runtime.cancel(id);
    assert_eq!(ErrorKind::of(&again), ErrorKind::InvalidJobId);
    runtime.finish().unwrap();
}

#[test]
fn test_callback_serves_requests_until_finish() {
    let runtime = UpnpRuntime::init(RuntimeConfig::ephemeral()).unwrap();
    runtime.register_callback(
        CallbackRole::Web,
        |request: &HttpRequest, connection: &mut Connection| {
            let body = request.target.as_bytes().to_vec();
            match connection.send_response(StatusCode::OK, "text/plain", &body) {
                Ok(()) => StatusCode::OK,
                Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        },
    );
    let port = start_on_loopback(&runtime);
    assert_eq!(runtime.miniserver().state(), ServerState::Running);

    let mut stream = TcpStream::connect((LOOPBACK, port)).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
        .write_all(format!("GET /device.xml HTTP/1.1\r\nHost: 127.0.0.1:{}\r\n\r\n", port).as_bytes())
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("/device.xml"));

    runtime.finish().unwrap();
    assert_eq!(runtime.miniserver().state(), ServerState::Idle);
    assert!(TcpStream::connect((LOOPBACK, port)).is_err());
}

#[test]
fn test_drop_finishes_runtime() {
    let runtime = UpnpRuntime::init(RuntimeConfig::ephemeral()).unwrap();
    start_on_loopback(&runtime);
    let send_pool = Arc::clone(runtime.send_pool());
    let miniserver_pool = Arc::clone(runtime.miniserver_pool());

    drop(runtime);

    assert_eq!(send_pool.state(), PoolState::ShuttingDown);
    assert_eq!(send_pool.stats().total_threads, 0);
    assert_eq!(miniserver_pool.stats().total_threads, 0);
}
