//! Integration tests for the timer thread

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use rstest::rstest;
use thread_pool::{Job, PoolAttributes, PoolError, ThreadPool};
use timer_thread::{EventId, Persistence, Timeout, TimerError, TimerThread};

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn pool(min: usize, max: usize) -> Arc<ThreadPool> {
    Arc::new(ThreadPool::new(PoolAttributes::new().with_threads(min, max)).unwrap())
}

fn counted_job(runs: &Arc<AtomicUsize>, cleanups: &Arc<AtomicUsize>) -> Job {
    let runs = Arc::clone(runs);
    let cleanups = Arc::clone(cleanups);
    Job::new(move || {
        runs.fetch_add(1, Ordering::SeqCst);
    })
    .with_cleanup(move || {
        cleanups.fetch_add(1, Ordering::SeqCst);
    })
}

#[rstest]
#[case::relative_zero(Timeout::Relative(Duration::ZERO))]
#[case::absolute_past(Timeout::Absolute(SystemTime::now() - Duration::from_secs(10)))]
fn test_past_due_event_fires_immediately(#[case] timeout: Timeout) {
    let pool = pool(1, 4);
    let timer = TimerThread::new(Arc::clone(&pool)).unwrap();

    let (tx, rx) = mpsc::channel();
    let scheduled_at = Instant::now();
    timer
        .schedule(
            Job::new(move || {
                let _ = tx.send(Instant::now());
            }),
            timeout,
            Persistence::ShortTerm,
        )
        .unwrap();

    let fired_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(fired_at - scheduled_at < Duration::from_secs(1));

    timer.shutdown().unwrap();
    pool.shutdown().unwrap();
}

#[test]
fn test_events_fire_in_due_order() {
    // one regular worker besides the timer loop keeps execution sequential
    let pool = pool(1, 2);
    let timer = TimerThread::new(Arc::clone(&pool)).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    for delay in [150u64, 50, 100] {
        let order = Arc::clone(&order);
        timer
            .schedule(
                Job::new(move || order.lock().unwrap().push(delay)),
                Timeout::Relative(Duration::from_millis(delay)),
                Persistence::ShortTerm,
            )
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || {
        order.lock().unwrap().len() == 3
    }));
    assert_eq!(*order.lock().unwrap(), vec![50, 100, 150]);

    timer.shutdown().unwrap();
    pool.shutdown().unwrap();
}

#[test]
fn test_event_ids_increase() {
    let pool = pool(1, 4);
    let timer = TimerThread::new(Arc::clone(&pool)).unwrap();

    let ids: Vec<EventId> = (0..5)
        .map(|_| {
            timer
                .schedule(
                    Job::new(|| {}),
                    Timeout::Relative(Duration::from_secs(60)),
                    Persistence::ShortTerm,
                )
                .unwrap()
        })
        .collect();

    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(timer.pending(), 5);

    timer.shutdown().unwrap();
    pool.shutdown().unwrap();
}

#[test]
fn test_cancel_returns_job_before_it_fires() {
    let pool = pool(1, 4);
    let timer = TimerThread::new(Arc::clone(&pool)).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let cleanups = Arc::new(AtomicUsize::new(0));

    let id = timer
        .schedule(
            counted_job(&runs, &cleanups),
            Timeout::Relative(Duration::from_secs(60)),
            Persistence::ShortTerm,
        )
        .unwrap();

    let job = timer.cancel(id).unwrap();
    assert_eq!(timer.pending(), 0);
    assert_eq!(cleanups.load(Ordering::SeqCst), 0);
    assert!(matches!(
        timer.cancel(id),
        Err(TimerError::InvalidEventId(missing)) if missing == id
    ));

    drop(job);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    timer.shutdown().unwrap();
    pool.shutdown().unwrap();
}

#[test]
fn test_cancel_after_fire_is_not_found() {
    let pool = pool(1, 4);
    let timer = TimerThread::new(Arc::clone(&pool)).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let cleanups = Arc::new(AtomicUsize::new(0));

    let id = timer
        .schedule(
            counted_job(&runs, &cleanups),
            Timeout::Relative(Duration::ZERO),
            Persistence::ShortTerm,
        )
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        runs.load(Ordering::SeqCst) == 1
    }));

    assert!(matches!(timer.cancel(id), Err(TimerError::InvalidEventId(_))));

    timer.shutdown().unwrap();
    pool.shutdown().unwrap();
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shutdown_drops_pending_events_with_cleanup() {
    let pool = pool(1, 4);
    let timer = TimerThread::new(Arc::clone(&pool)).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let cleanups = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        timer
            .schedule(
                counted_job(&runs, &cleanups),
                Timeout::Relative(Duration::from_secs(60)),
                Persistence::ShortTerm,
            )
            .unwrap();
    }

    timer.shutdown().unwrap();
    assert_eq!(cleanups.load(Ordering::SeqCst), 3);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    let late = timer.schedule(
        counted_job(&runs, &cleanups),
        Timeout::Relative(Duration::ZERO),
        Persistence::ShortTerm,
    );
    assert!(matches!(late, Err(TimerError::ShuttingDown)));
    assert_eq!(cleanups.load(Ordering::SeqCst), 4);
    assert!(matches!(timer.shutdown(), Err(TimerError::ShuttingDown)));

    // the loop gives its worker back
    assert!(wait_until(Duration::from_secs(5), || {
        pool.stats().persistent_threads == 0
    }));
    pool.shutdown().unwrap();
}

#[test]
fn test_persistent_event_gets_dedicated_worker() {
    let pool = pool(1, 4);
    let timer = TimerThread::new(Arc::clone(&pool)).unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    timer
        .schedule(
            Job::new(move || {
                let _ = started_tx.send(());
                let _ = stop_rx.recv();
            }),
            Timeout::Relative(Duration::from_millis(10)),
            Persistence::Persistent,
        )
        .unwrap();

    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    // the timer loop plus the scheduled loop
    assert_eq!(pool.stats().persistent_threads, 2);

    stop_tx.send(()).unwrap();
    timer.shutdown().unwrap();
    pool.shutdown().unwrap();
}

#[test]
fn test_rejected_submission_runs_cleanup_only() {
    // two workers: the timer loop takes one, the blocker holds the other
    let pool = Arc::new(
        ThreadPool::new(
            PoolAttributes::new()
                .with_threads(2, 2)
                .with_max_jobs_total(1),
        )
        .unwrap(),
    );
    let timer = TimerThread::new(Arc::clone(&pool)).unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    pool.submit(Job::new(move || {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
    }))
    .unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let filler_runs = Arc::new(AtomicUsize::new(0));
    let filler_cleanups = Arc::new(AtomicUsize::new(0));
    pool.submit(counted_job(&filler_runs, &filler_cleanups)).unwrap();
    assert!(matches!(
        pool.submit(Job::new(|| {})),
        Err(PoolError::QueueFull { .. })
    ));

    let runs = Arc::new(AtomicUsize::new(0));
    let cleanups = Arc::new(AtomicUsize::new(0));
    timer
        .schedule(
            counted_job(&runs, &cleanups),
            Timeout::Relative(Duration::ZERO),
            Persistence::ShortTerm,
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        cleanups.load(Ordering::SeqCst) == 1
    }));
    assert_eq!(timer.pending(), 0);

    release_tx.send(()).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        filler_runs.load(Ordering::SeqCst) == 1
    }));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);

    timer.shutdown().unwrap();
    pool.shutdown().unwrap();
}

#[test]
fn test_timer_needs_a_spare_worker() {
    let pool = pool(1, 1);
    let result = TimerThread::new(Arc::clone(&pool));
    assert!(matches!(
        result,
        Err(TimerError::Pool(PoolError::MaxThreads { max: 1 }))
    ));
    pool.shutdown().unwrap();
}

#[test]
fn test_drop_stops_the_loop() {
    let pool = pool(1, 4);
    let timer = TimerThread::new(Arc::clone(&pool)).unwrap();
    assert_eq!(pool.stats().persistent_threads, 1);

    drop(timer);
    assert!(wait_until(Duration::from_secs(5), || {
        pool.stats().persistent_threads == 0
    }));
    pool.shutdown().unwrap();
}
