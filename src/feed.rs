//! Boundary with the upstream feed adapter.
//!
//! The adapter (broker login, socket reconnects) lives outside this crate and
//! hands over newline-delimited JSON. Each line is one payload or an array of
//! payloads in any of the shapes `RawTick` understands.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::model::tick::{FeedPayload, RawTick};
use crate::store::Store;
use crate::tick_validator::{IngestStats, RejectReason, TickValidator};

pub const FEED_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum FeedMessage {
    Payload {
        raw: RawTick,
        received_at: DateTime<Utc>,
    },
    /// A line that did not decode as JSON payload(s).
    Undecodable,
}

/// Forward every line of `reader` to `tx` until EOF, shutdown, or the
/// receiver going away. Returns the number of non-empty lines read.
pub async fn read_feed<R>(reader: R, tx: mpsc::Sender<FeedMessage>, mut shutdown: watch::Receiver<bool>) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut count = 0u64;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("feed read failed")? else {
                    tracing::info!(lines = count, "Feed reached end of input");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                count += 1;
                let received_at = Utc::now();
                let messages = match serde_json::from_str::<FeedPayload>(line) {
                    Ok(payload) => payload
                        .into_ticks()
                        .into_iter()
                        .map(|raw| FeedMessage::Payload { raw, received_at })
                        .collect(),
                    Err(e) => {
                        tracing::debug!(error = %e, "Undecodable feed line");
                        vec![FeedMessage::Undecodable]
                    }
                };
                for message in messages {
                    if tx.send(message).await.is_err() {
                        tracing::warn!("Ingest worker gone, stopping feed reader");
                        return Ok(count);
                    }
                }
            }
            _ = shutdown.changed() => {
                tracing::info!(lines = count, "Feed reader shutting down");
                break;
            }
        }
    }
    Ok(count)
}

/// Drain `rx` on the blocking pool, validating and persisting each payload.
/// Resolves to the validator's counters once every sender is dropped.
pub fn spawn_ingest_worker(
    validator: Arc<TickValidator>,
    store: Store,
    mut rx: mpsc::Receiver<FeedMessage>,
) -> JoinHandle<IngestStats> {
    tokio::task::spawn_blocking(move || {
        while let Some(message) = rx.blocking_recv() {
            match message {
                FeedMessage::Payload { raw, received_at } => match validator.ingest(&store, &raw, received_at) {
                    Ok(_) => {}
                    Err(e) => {
                        // The tick is lost; session aggregates only see what was stored.
                        tracing::warn!(error = %e, transient = e.is_transient(), "Tick ingest failed");
                    }
                },
                FeedMessage::Undecodable => validator.record_rejection(RejectReason::InvalidFields),
            }
        }
        let stats = validator.stats();
        tracing::info!(
            accepted = stats.accepted_total(),
            rejected = stats.rejected_total(),
            "Ingest worker stopped"
        );
        stats
    })
}
