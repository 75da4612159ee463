//! Batched persistence of finalized rounds
//!
//! One relay task per pair forwards SubmissionData from the pair's stream
//! into a shared bounded queue. A flush task drains the queue on a fixed
//! interval and writes proofs and global aggregates in one bulk insert each.
//! A full queue blocks the relays, which in turn back-pressures publishers.

use crate::Result;
use common::{GlobalAggregate, Proof, SubmissionData};
use observability::BulkWriterMetrics;
use std::sync::Arc;
use std::time::Duration;
use storage::keys::submission_stream_key;
use storage::{AggregateStore, Cache};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Flusher {
    store: Arc<dyn AggregateStore>,
    proof_metrics: BulkWriterMetrics,
    aggregate_metrics: BulkWriterMetrics,
}

impl Flusher {
    /// Drain without waiting and write what was queued. Returns the batch size.
    async fn flush(&self, queue: &mut mpsc::Receiver<SubmissionData>) -> usize {
        let mut proofs: Vec<Proof> = Vec::new();
        let mut aggregates: Vec<GlobalAggregate> = Vec::new();
        while let Ok(submission) = queue.try_recv() {
            proofs.push(submission.proof);
            aggregates.push(submission.global_aggregate);
        }
        if proofs.is_empty() {
            return 0;
        }

        match self.store.insert_proofs(&proofs).await {
            Ok(rows) => {
                debug!(rows, "Inserted proofs");
                self.proof_metrics.record_flush(proofs.len());
            }
            Err(e) => {
                error!(batch = proofs.len(), "Failed to bulk insert proofs: {}", e);
                self.proof_metrics.flush_failed();
            }
        }

        match self.store.insert_global_aggregates(&aggregates).await {
            Ok(rows) => {
                debug!(rows, "Inserted global aggregates");
                self.aggregate_metrics.record_flush(aggregates.len());
            }
            Err(e) => {
                error!(batch = aggregates.len(), "Failed to bulk insert global aggregates: {}", e);
                self.aggregate_metrics.flush_failed();
            }
        }

        proofs.len()
    }

    async fn run(self, token: CancellationToken, every: Duration, mut queue: mpsc::Receiver<SubmissionData>) {
        let mut timer = tokio::time::interval(every);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Global aggregate flush task stopped");
                    return;
                }
                _ = timer.tick() => {
                    self.flush(&mut queue).await;
                }
            }
        }
    }
}

/// Forward one pair's stream into the shared queue until cancelled
async fn relay(
    token: CancellationToken,
    pair: String,
    mut stream: mpsc::Receiver<String>,
    queue: mpsc::Sender<SubmissionData>,
) {
    loop {
        let raw = tokio::select! {
            _ = token.cancelled() => break,
            raw = stream.recv() => match raw {
                Some(raw) => raw,
                None => {
                    warn!(pair = %pair, "Submission stream closed");
                    break;
                }
            },
        };

        let submission: SubmissionData = match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(e) => {
                warn!(pair = %pair, "Discarding malformed submission: {}", e);
                continue;
            }
        };

        tokio::select! {
            _ = token.cancelled() => break,
            sent = queue.send(submission) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    debug!(pair = %pair, "Submission relay stopped");
}

pub struct GlobalAggregateBulkWriter {
    store: Arc<dyn AggregateStore>,
    cache: Arc<dyn Cache>,
    pairs: Vec<String>,
    interval: Duration,
    buffer_size: usize,
    token: Option<CancellationToken>,
}

impl GlobalAggregateBulkWriter {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        cache: Arc<dyn Cache>,
        pairs: Vec<String>,
        interval: Duration,
        buffer_size: usize,
    ) -> Self {
        Self {
            store,
            cache,
            pairs,
            interval,
            buffer_size,
            token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.token.is_some()
    }

    /// Subscribe to every pair's stream and spawn the relays and the flush
    /// task. No-op when already running.
    pub async fn start(&mut self, parent: &CancellationToken) -> Result<()> {
        if self.token.is_some() {
            debug!("Global aggregate bulk writer already running");
            return Ok(());
        }

        let mut streams = Vec::with_capacity(self.pairs.len());
        for pair in &self.pairs {
            let stream = self.cache.subscribe(&submission_stream_key(pair)).await?;
            streams.push((pair.clone(), stream));
        }

        let token = parent.child_token();
        let (tx, rx) = mpsc::channel(self.buffer_size.max(1));

        for (pair, stream) in streams {
            tokio::spawn(relay(token.clone(), pair, stream, tx.clone()));
        }

        let flusher = Flusher {
            store: self.store.clone(),
            proof_metrics: BulkWriterMetrics::new("proofs"),
            aggregate_metrics: BulkWriterMetrics::new("global_aggregates"),
        };
        tokio::spawn(flusher.run(token.clone(), self.interval, rx));

        info!(
            pairs = self.pairs.len(),
            interval_ms = self.interval.as_millis() as u64,
            "Global aggregate bulk writer started"
        );
        self.token = Some(token);
        Ok(())
    }

    /// Cancel the relays and the flush task without waiting for them
    pub fn stop(&mut self) {
        match self.token.take() {
            Some(token) => {
                token.cancel();
                info!("Global aggregate bulk writer stopped");
            }
            None => debug!("Global aggregate bulk writer already stopped"),
        }
    }
}

impl Drop for GlobalAggregateBulkWriter {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}
