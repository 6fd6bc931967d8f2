use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relay_engine::{PoolSettings, WorkerPool};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_never_exceeds_worker_count() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    let pool = {
        let (in_flight, peak, done) = (in_flight.clone(), peak.clone(), done.clone());
        WorkerPool::spawn("test", PoolSettings::new(5, 10), move |_item: usize| {
            let (in_flight, peak, done) = (in_flight.clone(), peak.clone(), done.clone());
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    for item in 0..100 {
        pool.submit(item).await.unwrap();
    }
    let report = pool.finish().await;

    assert_eq!(report.processed, 100);
    assert_eq!(report.panicked_workers, 0);
    assert_eq!(done.load(Ordering::SeqCst), 100);
    assert_eq!(peak.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn finish_waits_for_outstanding_senders() {
    let done = Arc::new(AtomicUsize::new(0));
    let pool = {
        let done = done.clone();
        WorkerPool::spawn("test", PoolSettings::new(2, 1), move |_item: u32| {
            let done = done.clone();
            async move {
                done.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let sender = pool.sender();
    let producer = tokio::spawn(async move {
        for item in 0..20 {
            sender.submit(item).await.unwrap();
            tokio::task::yield_now().await;
        }
    });

    let report = pool.finish().await;
    producer.await.unwrap();
    assert_eq!(report.processed, 20);
    assert_eq!(done.load(Ordering::SeqCst), 20);
}

#[tokio::test]
async fn panicking_handler_is_reported() {
    let pool = WorkerPool::spawn("test", PoolSettings::new(2, 4), |item: u32| async move {
        if item == 3 {
            panic!("boom");
        }
    });
    let sender = pool.sender();
    for item in 0..3 {
        sender.submit(item).await.unwrap();
    }
    let _ = sender.submit(3).await;
    drop(sender);

    let report = pool.finish().await;
    assert_eq!(report.panicked_workers, 1);
    assert_eq!(report.processed, 3);
}

#[tokio::test]
async fn zero_settings_still_make_progress() {
    let done = Arc::new(AtomicUsize::new(0));
    let pool = {
        let done = done.clone();
        WorkerPool::spawn("test", PoolSettings::new(0, 0), move |_item: u8| {
            let done = done.clone();
            async move {
                done.fetch_add(1, Ordering::SeqCst);
            }
        })
    };
    for item in 0..3 {
        pool.submit(item).await.unwrap();
    }
    pool.finish().await;
    assert_eq!(done.load(Ordering::SeqCst), 3);
}
