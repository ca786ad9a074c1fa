//! View session: one engine fed by a channel.
//!
//! ## Design
//!
//! Uses an mpsc channel + background loop:
//! 1. `send(event)` queues an event from any task
//! 2. The loop takes the next event and applies it to the engine
//! 3. Events already queued behind it are applied too before anything is
//!    published, so a burst of updates yields one view
//! 4. If any stage was recomputed, the view goes to the sink
//!
//! The loop is sequential, so the engine never sees concurrent mutation.

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::types::GraphEvent;
use crate::graph::engine::{ViewEngine, ViewSink};

/// Default event channel capacity
const DEFAULT_CAPACITY: usize = 64;

/// Handle to a running view session.
pub struct ViewSession {
    event_tx: mpsc::Sender<GraphEvent>,
    task: JoinHandle<ViewEngine>,
}

impl ViewSession {
    /// Start a session on the current tokio runtime.
    pub fn spawn(engine: ViewEngine, sink: impl ViewSink + 'static) -> Self {
        Self::with_capacity(engine, sink, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(engine: ViewEngine, sink: impl ViewSink + 'static, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<GraphEvent>(capacity);
        let task = tokio::spawn(Self::run_loop(engine, rx, Box::new(sink)));
        tracing::info!(capacity, "View session started");
        Self { event_tx: tx, task }
    }

    /// A sender for feeding events from other tasks.
    pub fn sender(&self) -> mpsc::Sender<GraphEvent> {
        self.event_tx.clone()
    }

    /// Queue an event, waiting while the channel is full.
    pub async fn send(&self, event: GraphEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("view session has stopped"))
    }

    /// Stop accepting events, drain the queue and return the engine.
    pub async fn shutdown(self) -> Result<ViewEngine> {
        drop(self.event_tx);
        self.task.await.context("view session task failed")
    }

    async fn run_loop(
        mut engine: ViewEngine,
        mut rx: mpsc::Receiver<GraphEvent>,
        mut sink: Box<dyn ViewSink>,
    ) -> ViewEngine {
        let mut published = 0u64;
        while let Some(event) = rx.recv().await {
            let mut stages = engine.handle(event);
            let mut batched = 1;
            while let Ok(next) = rx.try_recv() {
                stages |= engine.handle(next);
                batched += 1;
            }
            if !stages.any() {
                continue;
            }

            let view = engine.view();
            match sink.publish(&view) {
                Ok(()) => {
                    published += 1;
                    tracing::debug!(
                        events = batched,
                        nodes = view.graph.nodes.len(),
                        links = view.graph.links.len(),
                        scoped = view.local.is_some(),
                        communities = view.clusters.community_count,
                        "Published derived view"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to publish derived view");
                }
            }
        }
        tracing::info!(published, "View session closed");
        engine
    }
}
