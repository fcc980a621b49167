//! Scheduler loop that drives both pipelines on a fixed tick.
//!
//! Each tick spawns the ingestion and chat passes as separate tasks and
//! waits for both before sleeping. A failed or panicked pass is logged and
//! never affects the other pass or the loop itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info};

use crate::error::DatabaseError;
use crate::pipeline::{ChatPipeline, ChatReport, ContentPipeline, IngestReport};

/// What one tick achieved. `None` means that pipeline failed this tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub ingest: Option<IngestReport>,
    pub chat: Option<ChatReport>,
}

/// Runs the two pipelines side by side.
pub struct Scheduler {
    ingest: Arc<ContentPipeline>,
    chat: Arc<ChatPipeline>,
}

impl Scheduler {
    pub fn new(ingest: Arc<ContentPipeline>, chat: Arc<ChatPipeline>) -> Self {
        Self { ingest, chat }
    }

    /// Run both pipelines once as independent tasks and wait for both.
    pub async fn tick(&self) -> TickReport {
        let ingest = tokio::spawn({
            let pipeline = Arc::clone(&self.ingest);
            async move { pipeline.run_once().await }
        });
        let chat = tokio::spawn({
            let pipeline = Arc::clone(&self.chat);
            async move { pipeline.run_once().await }
        });

        let (ingest, chat) = tokio::join!(ingest, chat);
        TickReport {
            ingest: settle("ingest", ingest),
            chat: settle("chat", chat),
        }
    }
}

/// Collapse a joined pass into its report, logging anything that went wrong.
fn settle<T>(pass: &str, joined: Result<Result<T, DatabaseError>, JoinError>) -> Option<T> {
    match joined {
        Ok(Ok(report)) => Some(report),
        Ok(Err(e)) => {
            error!(pass, error = %e, "Pipeline pass failed");
            None
        }
        Err(e) if e.is_panic() => {
            error!(pass, "Pipeline pass panicked");
            None
        }
        Err(e) => {
            error!(pass, error = %e, "Pipeline task did not complete");
            None
        }
    }
}

/// Spawn the scheduler loop: tick, then sleep `interval`, forever.
///
/// The shutdown flag is checked between ticks, so a tick in flight always
/// finishes. Returns a `JoinHandle` and shutdown flag.
pub fn spawn_scheduler(
    scheduler: Arc<Scheduler>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Scheduler started, ticking every {}s", interval.as_secs_f64());
        let mut ticks: u64 = 0;

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!(ticks, "Scheduler shutting down");
                return;
            }

            let report = scheduler.tick().await;
            ticks += 1;
            debug!(tick = ticks, ?report, "Tick complete");

            tokio::time::sleep(interval).await;
        }
    });

    (handle, shutdown_flag)
}
