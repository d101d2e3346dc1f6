//! Long-poll task queue and event stream consumers. Each stream delivers to
//! its handler serially and stops when the actor's token is cancelled;
//! items pulled but not yet handled at that point are dropped
//! unacknowledged and will be redelivered.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::{Result, StoreError};
use crate::transport::proto::{StreamEvent, Task};
use crate::transport::Request;

use super::Actor;

const PULL_BATCH: u32 = 16;
const PULL_WAIT: Duration = Duration::from_secs(5);

impl Actor {
    /// Enqueues a task and returns its id.
    pub async fn task_push(&self, queue: &str, payload: impl Into<Vec<u8>>) -> Result<String> {
        self.call(Request::TaskPush {
            queue: queue.to_string(),
            payload: payload.into(),
        })
        .await?
        .into_task_pushed()
    }

    /// Delivers tasks from `queue` until cancellation and returns how many
    /// were handled. A task is acknowledged only after its handler
    /// succeeds; a handler error ends the stream and leaves the task for
    /// redelivery.
    pub async fn task_stream<F, Fut>(&self, queue: &str, mut handler: F) -> Result<u64>
    where
        F: FnMut(Task) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut delivered = 0u64;
        loop {
            let pulled = self
                .call(Request::TaskPull {
                    queue: queue.to_string(),
                    max: PULL_BATCH,
                    wait_ms: PULL_WAIT.as_millis() as u64,
                })
                .await;
            let tasks = match pulled {
                Ok(response) => response.into_tasks()?,
                Err(StoreError::Cancelled) => return Ok(delivered),
                Err(err) => return Err(err),
            };

            let mut pending = tasks.into_iter();
            while let Some(task) = pending.next() {
                if self.cancellation().is_cancelled() {
                    debug!(queue, dropped = pending.len() + 1, "task stream cancelled");
                    return Ok(delivered);
                }
                let task_id = task.id.clone();
                if let Err(err) = handler(task).await {
                    warn!(queue, task_id = %task_id, "task handler failed: {}", err);
                    return Err(err);
                }
                self.acknowledge(Request::TaskAck {
                    queue: queue.to_string(),
                    task_id,
                })
                .await?;
                delivered += 1;
            }
        }
    }

    /// Delivers events for subscription `group` until cancellation.
    /// `own_key` narrows delivery to one consumer. Each pulled batch is
    /// acknowledged after its events are handled.
    pub async fn event_stream<F, Fut>(&self, group: &str, own_key: Option<&str>, mut handler: F) -> Result<u64>
    where
        F: FnMut(StreamEvent) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let own_key = own_key.map(str::to_string);
        let mut delivered = 0u64;
        loop {
            let pulled = self
                .call(Request::EventPull {
                    group: group.to_string(),
                    own_key: own_key.clone(),
                    max: PULL_BATCH,
                    wait_ms: PULL_WAIT.as_millis() as u64,
                })
                .await;
            let events = match pulled {
                Ok(response) => response.into_stream_events()?,
                Err(StoreError::Cancelled) => return Ok(delivered),
                Err(err) => return Err(err),
            };

            let mut handled = Vec::with_capacity(events.len());
            let mut cancelled = false;
            for event in events {
                if self.cancellation().is_cancelled() {
                    cancelled = true;
                    break;
                }
                let event_id = event.id.clone();
                handler(event).await?;
                handled.push(event_id);
            }

            if !handled.is_empty() {
                let count = handled.len() as u64;
                self.acknowledge(Request::EventAck {
                    group: group.to_string(),
                    own_key: own_key.clone(),
                    event_ids: handled,
                })
                .await?;
                delivered += count;
            }
            if cancelled {
                debug!(group, "event stream cancelled");
                return Ok(delivered);
            }
        }
    }

    /// Acknowledges handled items. Not raced against cancellation, so work
    /// finished before a cancel is not redelivered.
    async fn acknowledge(&self, request: Request) -> Result<()> {
        self.connection().call(self.caller(), request).await?.into_ack()
    }
}
