use tracing::debug;

use super::bus::ProgressBus;
use super::events::{ProgressEvent, ProgressSink};
use crate::core::errors::Result;

/// Scoped ownership of one job's progress channel.
///
/// Opening creates the channel; dropping closes whichever id the handle owns
/// at that point, so the subscriber always receives `done` however the job
/// exits.
pub struct JobChannel {
    bus: ProgressBus,
    job_id: String,
}

impl JobChannel {
    pub fn open(bus: &ProgressBus, job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        bus.create(&job_id);
        Self {
            bus: bus.clone(),
            job_id,
        }
    }

    pub fn id(&self) -> &str {
        &self.job_id
    }

    /// Announces `new_id` on the current channel, then moves the queue
    pub fn rename(&mut self, new_id: impl Into<String>) -> Result<()> {
        let new_id = new_id.into();
        if new_id == self.job_id {
            return Ok(());
        }
        self.bus.publish(
            &self.job_id,
            ProgressEvent::IdChanged {
                new_id: new_id.clone(),
            },
        );
        self.bus.rename(&self.job_id, &new_id)?;
        self.job_id = new_id;
        Ok(())
    }
}

impl ProgressSink for JobChannel {
    fn emit(&self, event: ProgressEvent) {
        self.bus.publish(&self.job_id, event);
    }
}

impl Drop for JobChannel {
    fn drop(&mut self) {
        debug!("Job '{}' finished; closing channel", self.job_id);
        self.bus.close(&self.job_id);
    }
}
