//! The chain arbitrator: one task per channel, fed through bounded queues.
//!
//! Each channel arbitrator owns its record and runs on its own task, so
//! events for one channel are applied strictly in order while channels
//! progress independently. Status is published on a `watch` channel after
//! every event. An event whose log write fails is delivered again with
//! backoff; a channel that still cannot write is halted.

use std::collections::HashMap;

use contractcourt_log::ArbitrationLog;
use contractcourt_types::{
    ArbitratorConfig, ChainEvent, ChannelId, CourtError, HtlcDescriptor, Result, RetryConfig,
    constants,
};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Span;

use crate::channel::ChannelArbitrator;
use crate::event::{ChannelEvent, ChannelStatus, Collaborators};
use crate::record::ChannelRecord;

struct ChannelHandle {
    /// `None` once the channel failed during recovery.
    events: Option<mpsc::Sender<ChannelEvent>>,
    status: watch::Receiver<ChannelStatus>,
    task: Option<JoinHandle<()>>,
}

pub struct ChainArbitrator {
    config: ArbitratorConfig,
    log: ArbitrationLog,
    deps: Collaborators,
    channels: Mutex<HashMap<ChannelId, ChannelHandle>>,
    span: Span,
}

impl ChainArbitrator {
    /// Channel spans are children of `span`.
    ///
    /// # Errors
    /// [`CourtError::Configuration`] if `config` is invalid.
    pub fn new(
        config: ArbitratorConfig,
        log: ArbitrationLog,
        deps: Collaborators,
        span: Span,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            log,
            deps,
            channels: Mutex::new(HashMap::new()),
            span,
        })
    }

    /// Resume every channel found in the arbitration log.
    ///
    /// A channel whose recovery fails is registered as
    /// [`ChannelStatus::Failed`]; the others still start.
    ///
    /// # Errors
    /// Storage errors while scanning the log.
    pub async fn start(&self) -> Result<usize> {
        let mut records: Vec<ChannelRecord> = Vec::new();
        self.log.for_each(|record: ChannelRecord| {
            records.push(record);
            Ok(())
        })?;
        tracing::info!(parent: &self.span, channels = records.len(), "resuming channels from arbitration log");

        let mut started = 0;
        for record in records {
            let channel_id = record.channel_id;
            match self.recover_with_retry(record).await {
                Ok(arb) => {
                    self.spawn(arb).await;
                    started += 1;
                }
                Err(e) => {
                    tracing::error!(parent: &self.span, channel = %channel_id.short(), error = %e, "channel recovery failed");
                    self.register_failed(channel_id, &e).await;
                }
            }
        }
        Ok(started)
    }

    async fn recover_with_retry(&self, record: ChannelRecord) -> Result<ChannelArbitrator> {
        let mut attempt = 0;
        loop {
            let result = ChannelArbitrator::recover(
                record.clone(),
                self.config.clone(),
                self.log.clone(),
                self.deps.clone(),
                &self.span,
            );
            match result {
                Err(e) if e.is_transient() && attempt + 1 < self.config.retry.max_attempts => {
                    let delay = self.config.retry.backoff(attempt);
                    tracing::warn!(
                        parent: &self.span,
                        channel = %record.channel_id.short(),
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "recovery hit a transient error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Begin arbitrating `channel_id`, resuming it if the log knows it.
    ///
    /// # Errors
    /// Chain or storage errors while opening or recovering.
    pub async fn watch_channel(&self, channel_id: ChannelId) -> Result<()> {
        if self.channels.lock().await.contains_key(&channel_id) {
            return Ok(());
        }
        let arb = match self.log.get::<ChannelRecord>(&channel_id)? {
            Some(record) => self.recover_with_retry(record).await?,
            None => ChannelArbitrator::open(
                channel_id,
                self.config.clone(),
                self.log.clone(),
                self.deps.clone(),
                &self.span,
            )?,
        };
        self.spawn(arb).await;
        Ok(())
    }

    async fn spawn(&self, arb: ChannelArbitrator) {
        let channel_id = arb.channel_id();
        let (events_tx, events_rx) = mpsc::channel(constants::CHANNEL_EVENT_QUEUE);
        let (status_tx, status_rx) = watch::channel(arb.status());
        let task = tokio::spawn(run_channel(arb, events_rx, status_tx, self.config.retry.clone()));
        let previous = self.channels.lock().await.insert(
            channel_id,
            ChannelHandle {
                events: Some(events_tx),
                status: status_rx,
                task: Some(task),
            },
        );
        if let Some(ChannelHandle { task: Some(old), .. }) = previous {
            old.abort();
        }
    }

    async fn register_failed(&self, channel_id: ChannelId, err: &CourtError) {
        let (_, status) = watch::channel(ChannelStatus::Failed(err.to_string()));
        self.channels.lock().await.insert(
            channel_id,
            ChannelHandle {
                events: None,
                status,
                task: None,
            },
        );
    }

    /// Queue an event for one channel.
    ///
    /// # Errors
    /// [`CourtError::ChannelNotFound`] for an unknown channel,
    /// [`CourtError::ArbitratorStopped`] if its task has ended.
    pub async fn send(&self, channel_id: ChannelId, event: ChannelEvent) -> Result<()> {
        let sender = {
            let channels = self.channels.lock().await;
            let handle = channels
                .get(&channel_id)
                .ok_or(CourtError::ChannelNotFound(channel_id))?;
            handle
                .events
                .clone()
                .ok_or(CourtError::ArbitratorStopped(channel_id))?
        };
        sender
            .send(event)
            .await
            .map_err(|_| CourtError::ArbitratorStopped(channel_id))
    }

    /// # Errors
    /// As [`ChainArbitrator::send`].
    pub async fn force_close(&self, channel_id: ChannelId) -> Result<()> {
        self.send(channel_id, ChannelEvent::ForceClose).await
    }

    /// Replace the live off-chain HTLC set watched for go-to-chain deadlines.
    ///
    /// # Errors
    /// As [`ChainArbitrator::send`].
    pub async fn update_htlcs(&self, channel_id: ChannelId, htlcs: Vec<HtlcDescriptor>) -> Result<()> {
        self.send(channel_id, ChannelEvent::UpdateHtlcs(htlcs)).await
    }

    /// Fan a chain notification out to every running channel. Returns how
    /// many channels received it.
    pub async fn dispatch(&self, event: ChainEvent) -> usize {
        let senders: Vec<(ChannelId, mpsc::Sender<ChannelEvent>)> = self
            .channels
            .lock()
            .await
            .iter()
            .filter_map(|(id, h)| h.events.clone().map(|tx| (*id, tx)))
            .collect();
        let mut delivered = 0;
        for (channel_id, sender) in senders {
            if sender.send(ChannelEvent::Chain(event.clone())).await.is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(parent: &self.span, channel = %channel_id.short(), "channel stopped, event dropped");
            }
        }
        delivered
    }

    /// # Errors
    /// [`CourtError::ChannelNotFound`] for an unknown channel.
    pub async fn status(&self, channel_id: ChannelId) -> Result<ChannelStatus> {
        let channels = self.channels.lock().await;
        let handle = channels
            .get(&channel_id)
            .ok_or(CourtError::ChannelNotFound(channel_id))?;
        Ok(handle.status.borrow().clone())
    }

    /// A receiver that sees every status change of one channel.
    ///
    /// # Errors
    /// [`CourtError::ChannelNotFound`] for an unknown channel.
    pub async fn subscribe(&self, channel_id: ChannelId) -> Result<watch::Receiver<ChannelStatus>> {
        let channels = self.channels.lock().await;
        channels
            .get(&channel_id)
            .map(|h| h.status.clone())
            .ok_or(CourtError::ChannelNotFound(channel_id))
    }

    /// Close every queue and wait for the channel tasks to drain.
    pub async fn shutdown(&self) {
        let handles: Vec<ChannelHandle> = self.channels.lock().await.drain().map(|(_, h)| h).collect();
        tracing::info!(parent: &self.span, channels = handles.len(), "shutting down");
        for handle in handles {
            drop(handle.events);
            if let Some(task) = handle.task {
                if let Err(e) = task.await {
                    tracing::warn!(parent: &self.span, error = %e, "channel task ended abnormally");
                }
            }
        }
    }
}

async fn run_channel(
    mut arb: ChannelArbitrator,
    mut events: mpsc::Receiver<ChannelEvent>,
    status: watch::Sender<ChannelStatus>,
    retry: RetryConfig,
) {
    if arb.phase().is_terminal() {
        return;
    }
    let span = arb.span().clone();
    while let Some(event) = events.recv().await {
        let next = match handle_with_retry(&mut arb, event, &retry).await {
            Ok(()) => arb.status(),
            Err(e) if e.is_fatal() || e.is_storage() => {
                tracing::error!(parent: &span, phase = %arb.phase(), error = %e, "channel halted");
                ChannelStatus::Failed(e.to_string())
            }
            Err(e) => {
                tracing::warn!(parent: &span, phase = %arb.phase(), error = %e, "event rejected");
                arb.status()
            }
        };
        // Senders must see the queue closed by the time the final status is visible.
        let stop = next.is_final();
        if stop {
            events.close();
        }
        status.send_replace(next);
        if stop {
            return;
        }
    }
}

/// Deliver `event`, again with backoff while the arbitration log refuses
/// writes. The arbitrator resets itself after each failed attempt.
async fn handle_with_retry(
    arb: &mut ChannelArbitrator,
    event: ChannelEvent,
    retry: &RetryConfig,
) -> Result<()> {
    let mut attempt = 0;
    loop {
        match arb.handle(event.clone()) {
            Err(e) if e.is_storage() && attempt + 1 < retry.max_attempts => {
                let delay = retry.backoff(attempt);
                tracing::warn!(
                    parent: arb.span(),
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "arbitration log write failed, retrying event"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
