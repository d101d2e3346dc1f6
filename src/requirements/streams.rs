use std::future::ready;
use std::time::Duration;

use anyhow::{Context, ensure};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::actor::{Actor, MutateOptions};
use crate::connection::Connection;
use crate::core::{Result, StoreError};
use crate::marshal::{Entity, EventRecord};
use crate::runner::{Requirement, Steps, TestResult};
use crate::values::Interval;

use super::fixtures::Contract;
use super::unique;

const STREAM_DEADLINE: Duration = Duration::from_secs(30);
const TASKS: usize = 3;

/// Pushed tasks are delivered once each, and a failed handler leaves its
/// task for redelivery.
pub struct TaskQueue;

#[async_trait]
impl Requirement for TaskQueue {
    fn name(&self) -> &'static str {
        "task-queue"
    }

    fn register(&self, _connection: &Connection) -> Result<()> {
        Ok(())
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let queue = unique("queue");

        let Some(mut pushed) = steps
            .step("push", async {
                let mut pushed = Vec::with_capacity(TASKS);
                for n in 0..TASKS {
                    actor.task_push(&queue, format!("job-{}", n)).await?;
                    pushed.push(format!("job-{}", n).into_bytes());
                }
                Ok(pushed)
            })
            .await
        else {
            return steps.finish();
        };

        steps
            .step("stream-delivers-all", async {
                let scoped = actor.with_cancellation(actor.cancellation().child_token());
                let stop = scoped.cancellation().clone();
                let mut received = Vec::new();
                let delivered = timeout(
                    STREAM_DEADLINE,
                    scoped.task_stream(&queue, |task| {
                        received.push(task.payload);
                        if received.len() == TASKS {
                            stop.cancel();
                        }
                        ready(Ok(()))
                    }),
                )
                .await
                .context("task stream timed out")??;

                ensure!(delivered == TASKS as u64, "delivered {} tasks", delivered);
                received.sort();
                pushed.sort();
                ensure!(received == pushed, "payloads differ: {:?}", received);
                Ok(())
            })
            .await;

        steps
            .step("failed-task-redelivered", async {
                let first_id = actor.task_push(&queue, "flaky").await?;

                let failing = actor.with_cancellation(actor.cancellation().child_token());
                let outcome = timeout(
                    STREAM_DEADLINE,
                    failing.task_stream(&queue, |_task| {
                        ready(Err(StoreError::Transport("handler refused the task".into())))
                    }),
                )
                .await
                .context("failing task stream timed out")?;
                ensure!(outcome.is_err(), "handler error did not end the stream: {:?}", outcome);

                let retry = actor.with_cancellation(actor.cancellation().child_token());
                let stop = retry.cancellation().clone();
                let mut redelivered = None;
                timeout(
                    STREAM_DEADLINE,
                    retry.task_stream(&queue, |task| {
                        redelivered = Some(task.id);
                        stop.cancel();
                        ready(Ok(()))
                    }),
                )
                .await
                .context("retry stream timed out")??;
                ensure!(
                    redelivered.as_deref() == Some(first_id.as_str()),
                    "redelivered {:?}, expected {}",
                    redelivered,
                    first_id
                );
                Ok(())
            })
            .await;

        steps.finish()
    }
}

/// Events written with a mutation reach a subscribed stream.
pub struct EventStream;

#[async_trait]
impl Requirement for EventStream {
    fn name(&self) -> &'static str {
        "event-stream"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<Contract>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let group = unique("group");
        let scoped = actor.with_cancellation(actor.cancellation().child_token());
        let stop = scoped.cancellation().clone();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let stream = {
            let group = group.clone();
            tokio::spawn(async move {
                scoped
                    .event_stream(&group, None, move |event| {
                        let _ = tx.send(event);
                        ready(Ok(()))
                    })
                    .await
            })
        };

        let created = steps
            .step("mutate-with-event", async {
                let mut contract = Contract {
                    title: unique("renewal"),
                    term: Interval::months(1),
                    ..Contract::default()
                };
                contract.base.add_event(EventRecord::new("renewed").with("group", group.as_str()));
                actor.mutate(&mut contract, MutateOptions::new()).await?;
                Ok(contract.base.id().clone())
            })
            .await;

        if let Some(id) = created {
            steps
                .step("event-delivered", async {
                    let wait = async {
                        while let Some(event) = rx.recv().await {
                            if event.entity == id && event.event_type == "renewed" {
                                return Some(event);
                            }
                        }
                        None
                    };
                    let event = timeout(STREAM_DEADLINE, wait)
                        .await
                        .context("no event before the deadline")?
                        .context("event stream ended early")?;
                    ensure!(event.schema == Contract::schema_key(), "schema: {}", event.schema);
                    ensure!(
                        event.data.get("group") == Some(&group),
                        "event data: {:?}",
                        event.data
                    );
                    Ok(())
                })
                .await;
        }

        stop.cancel();
        steps
            .step("stream-stops-on-cancel", async {
                let delivered = timeout(STREAM_DEADLINE, stream)
                    .await
                    .context("stream did not stop after cancel")?
                    .context("stream task panicked")??;
                ensure!(delivered >= 1, "stream reported {} deliveries", delivered);
                Ok(())
            })
            .await;

        steps.finish()
    }
}
