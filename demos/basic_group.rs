//! Minimal end-to-end demo: bring a group up, serve a few requests, then
//! disable the only worker and watch the replacement arrive.
//!
//! Run with: `cargo run --example basic_group`

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use poolvisor::{
    GroupBuilder, GroupOptions, LogWriter, Process, RequestOptions, SpawnError, Spawner,
};

/// Pretend spawner: hands out ready processes with sequential pids.
struct DemoSpawner {
    next_pid: AtomicU32,
    created: Instant,
}

#[async_trait]
impl Spawner for DemoSpawner {
    async fn spawn(&self, options: &GroupOptions) -> Result<Arc<Process>, SpawnError> {
        // A real spawner would fork/exec here and wait for the worker's
        // ready report, authenticated with options.group_secret.
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        println!("(spawner) booted worker pid={pid} for {:?}", options.app_root);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(Arc::new(Process::new(pid, 2)))
    }

    fn last_used(&self) -> Instant {
        self.created
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let spawner = Arc::new(DemoSpawner {
        next_pid: AtomicU32::new(4000),
        created: Instant::now(),
    });

    let mut options = GroupOptions::new("/srv/demoapp");
    options.min_processes = 1;

    let group = GroupBuilder::new("demoapp", options, spawner)
        .with_subscribers(vec![Arc::new(LogWriter)])
        .build();

    // Cold start: the first request parks until the worker is up.
    let got = group.get(
        RequestOptions::new(),
        Box::new(|res| match res {
            Ok(session) => {
                println!("(waiter) served by pid={}", session.pid());
                session.close();
            }
            Err(err) => println!("(waiter) failed: {err}"),
        }),
    );
    assert!(got.is_none());

    tokio::time::sleep(Duration::from_millis(200)).await;

    // Warm path: capacity is free, the session comes back synchronously.
    if let Some(session) = group.get(RequestOptions::new(), Box::new(|_| {})) {
        println!("(direct) served by pid={}", session.pid());
        session.close();
    }

    // Disable the only worker: a replacement is pre-spawned so the group
    // never goes dark.
    let worker = group.processes().remove(0);
    group.disable(&worker, Box::new(|| println!("(admin) disable acknowledged")));

    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("final state: {:?}", group.snapshot());

    group.shutdown();
}
