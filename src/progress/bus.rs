//! Job-keyed progress channels
//!
//! One writer and one reader per job. Events published while no channel
//! exists for a job are dropped; there is no replay for late subscribers.
//! A closed channel that nobody drained is replaced when the same id opens
//! a new job.

use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::events::{ProgressEvent, HEARTBEAT_FRAME};
use crate::core::config::Config;
use crate::core::errors::{Result, StemflowError};

enum Envelope {
    Event(ProgressEvent),
    Close,
}

struct Channel {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    /// Set once the close sentinel is queued
    closed: AtomicBool,
}

impl Channel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct BusInner {
    channels: Mutex<HashMap<String, Arc<Channel>>>,
    heartbeat: Duration,
    poll_interval: Duration,
}

/// Registry of live progress channels, cheap to clone and share across jobs
#[derive(Clone)]
pub struct ProgressBus {
    inner: Arc<BusInner>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(Duration::from_secs(15), Duration::from_secs(1))
    }
}

impl ProgressBus {
    pub fn new(heartbeat: Duration, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(BusInner {
                channels: Mutex::new(HashMap::new()),
                heartbeat,
                poll_interval,
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.heartbeat_interval(), config.poll_interval())
    }

    /// Allocates a channel for `job_id`.
    ///
    /// A no-op while an open channel exists. A closed channel still waiting
    /// for its subscriber is swapped for a fresh one; a reader already
    /// attached to it keeps draining the old queue.
    pub fn create(&self, job_id: &str) {
        let mut channels = self.inner.channels.lock();
        match channels.get(job_id) {
            Some(existing) if !existing.is_closed() => return,
            Some(_) => debug!("Replacing closed progress channel '{}'", job_id),
            None => debug!("Created progress channel '{}'", job_id),
        }
        channels.insert(job_id.to_string(), Arc::new(Channel::new()));
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.inner.channels.lock().contains_key(job_id)
    }

    /// Appends `event` to the job's queue. Returns false when it was dropped.
    pub fn publish(&self, job_id: &str, event: ProgressEvent) -> bool {
        let channel = self.inner.channels.lock().get(job_id).cloned();
        match channel {
            Some(channel) if !channel.is_closed() => {
                channel.tx.send(Envelope::Event(event)).is_ok()
            }
            Some(_) => {
                debug!("Progress channel '{}' is closed; dropping event", job_id);
                false
            }
            None => {
                debug!("No progress channel '{}'; dropping event", job_id);
                false
            }
        }
    }

    /// Enqueues the close sentinel; the subscriber removes the channel once
    /// it drains that far. Closing twice is a no-op.
    pub fn close(&self, job_id: &str) -> bool {
        let channels = self.inner.channels.lock();
        let Some(channel) = channels.get(job_id) else {
            return false;
        };
        if channel.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!("Closing progress channel '{}'", job_id);
        channel.tx.send(Envelope::Close).is_ok()
    }

    /// Moves the queue of `old_id` to `new_id` without terminating the stream
    pub fn rename(&self, old_id: &str, new_id: &str) -> Result<()> {
        if old_id == new_id {
            return Ok(());
        }
        let mut channels = self.inner.channels.lock();
        let channel = channels
            .remove(old_id)
            .ok_or_else(|| StemflowError::channel(old_id, "cannot rename unknown channel"))?;
        if let Some(replaced) = channels.insert(new_id.to_string(), channel) {
            // The displaced channel never sees a subscriber again.
            if !replaced.closed.swap(true, Ordering::AcqRel) {
                let _ = replaced.tx.send(Envelope::Close);
            }
            warn!("Rename of '{}' replaced existing channel '{}'", old_id, new_id);
        }
        info!("Renamed progress channel '{}' -> '{}'", old_id, new_id);
        Ok(())
    }

    /// Serialized frames for `job_id` until the channel is closed.
    ///
    /// Emits a heartbeat frame after `heartbeat` without traffic. An unknown
    /// job yields a single `error` frame.
    pub fn subscribe(&self, job_id: &str) -> BoxStream<'static, String> {
        let channel = self.inner.channels.lock().get(job_id).cloned();
        let Some(channel) = channel else {
            warn!("Subscription to unknown job '{}'", job_id);
            let frame = ProgressEvent::error("unknown job_id").to_frame();
            return stream::once(async move { frame }).boxed();
        };

        let state = Subscriber {
            bus: self.clone(),
            channel,
            last_activity: Instant::now(),
            finished: false,
        };
        stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }
            let frame = state.next_frame().await;
            Some((frame, state))
        })
        .boxed()
    }

    /// Drops the channel under whichever id it is registered now
    fn remove_channel(&self, channel: &Arc<Channel>) {
        self.inner
            .channels
            .lock()
            .retain(|_, existing| !Arc::ptr_eq(existing, channel));
    }
}

struct Subscriber {
    bus: ProgressBus,
    channel: Arc<Channel>,
    last_activity: Instant,
    finished: bool,
}

impl Subscriber {
    async fn next_frame(&mut self) -> String {
        let poll_interval = self.bus.inner.poll_interval;
        let heartbeat = self.bus.inner.heartbeat;
        let mut rx = self.channel.rx.lock().await;
        loop {
            match timeout(poll_interval, rx.recv()).await {
                Ok(Some(Envelope::Event(event))) => {
                    self.last_activity = Instant::now();
                    return event.to_frame();
                }
                Ok(Some(Envelope::Close)) | Ok(None) => {
                    drop(rx);
                    self.bus.remove_channel(&self.channel);
                    self.finished = true;
                    return ProgressEvent::Done.to_frame();
                }
                Err(_) => {
                    if self.last_activity.elapsed() >= heartbeat {
                        self.last_activity = Instant::now();
                        return HEARTBEAT_FRAME.to_string();
                    }
                }
            }
        }
    }
}
