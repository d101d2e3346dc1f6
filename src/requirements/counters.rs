use std::time::Duration;

use anyhow::ensure;
use async_trait::async_trait;

use crate::actor::{Actor, MutateOptions};
use crate::connection::Connection;
use crate::core::{ErrorKind, Result};
use crate::runner::{Requirement, Steps, TestResult};

use super::fixtures::Order;
use super::{expect_kind, unique};

const SQUIDS: u32 = 200;
const RATE_LIMIT: u32 = 5;
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Sequence ids are issued 1, 2, 3... per key and can be retrieved again
/// with their squat.
pub struct Squid;

#[async_trait]
impl Requirement for Squid {
    fn name(&self) -> &'static str {
        "squid"
    }

    fn register(&self, _connection: &Connection) -> Result<()> {
        Ok(())
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let key = unique("sq");

        let Some(issued) = steps
            .step("issue-sequence", async {
                let mut issued = Vec::with_capacity(SQUIDS as usize);
                for expected in 1..=SQUIDS {
                    let next = actor.squid(&key).await?;
                    ensure!(next.squid == expected, "call {} returned squid {}", expected, next.squid);
                    issued.push(next);
                }
                Ok(issued)
            })
            .await
        else {
            return steps.finish();
        };

        steps
            .step("retrieve", async {
                let (Some(first), Some(last)) = (issued.first(), issued.last()) else {
                    anyhow::bail!("no squids issued");
                };
                let again = actor.squid_retrieve(&key, &last.squat).await?;
                ensure!(again == SQUIDS, "last squat retrieved {}", again);
                let again = actor.squid_retrieve(&key, &first.squat).await?;
                ensure!(again == 1, "first squat retrieved {}", again);
                Ok(())
            })
            .await;

        steps
            .step("keys-independent", async {
                let other = actor.squid(&unique("sq")).await?;
                ensure!(other.squid == 1, "fresh key started at {}", other.squid);
                Ok(())
            })
            .await;

        steps.finish()
    }
}

/// Named per-entity counters advance together; read-only names are
/// reported without advancing.
pub struct IncrementingIds;

#[async_trait]
impl Requirement for IncrementingIds {
    fn name(&self) -> &'static str {
        "incrementing-ids"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<Order>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());

        let Some(id) = steps
            .step("create", async {
                let mut order = Order {
                    number: unique("ord"),
                    ..Order::default()
                };
                actor.mutate(&mut order, MutateOptions::new()).await?;
                Ok(order.base.id().clone())
            })
            .await
        else {
            return steps.finish();
        };

        steps
            .step("commit-advances", async {
                let batch = actor.incrementing_ids::<Order>(&id, &["invoice", "shipment"]);
                let first = batch.commit().await?;
                ensure!(first.get("invoice") == Some(&1), "first commit: {:?}", first);
                ensure!(first.get("shipment") == Some(&1), "first commit: {:?}", first);
                let second = batch.commit().await?;
                ensure!(second.get("invoice") == Some(&2), "second commit: {:?}", second);
                Ok(())
            })
            .await;

        steps
            .step("read-only-counters", async {
                let values = actor
                    .incrementing_ids::<Order>(&id, &["shipment"])
                    .read_only(["invoice"])
                    .commit()
                    .await?;
                ensure!(values.get("shipment") == Some(&3), "shipment: {:?}", values);
                ensure!(values.get("invoice") == Some(&2), "read-only counter advanced: {:?}", values);
                Ok(())
            })
            .await;

        steps
            .step("overlap-rejected", async {
                let overlapping = actor
                    .incrementing_ids::<Order>(&id, &["invoice"])
                    .read_only(["invoice"])
                    .commit()
                    .await;
                expect_kind(overlapping, ErrorKind::Validation, "advancing a read-only counter")?;
                Ok(())
            })
            .await;

        steps.finish()
    }
}

/// Triggers up to the limit pass; the next one reports the limit hit.
pub struct RateLimits;

#[async_trait]
impl Requirement for RateLimits {
    fn name(&self) -> &'static str {
        "rate-limits"
    }

    fn register(&self, _connection: &Connection) -> Result<()> {
        Ok(())
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());

        steps
            .step("limit-hit-after-n", async {
                let limiter = actor.rate_limit(unique("rl"), RATE_LIMIT, RATE_WINDOW);
                for n in 1..=RATE_LIMIT {
                    let status = limiter.trigger("login").await?;
                    ensure!(!status.hit_limit, "trigger {} hit the limit", n);
                    ensure!(status.count == n, "trigger {} counted {}", n, status.count);
                }
                let over = limiter.trigger("login").await?;
                ensure!(over.hit_limit, "trigger {} did not hit the limit", RATE_LIMIT + 1);
                Ok(())
            })
            .await;

        steps
            .step("tracked-limit", async {
                let limiter = actor.tracked_rate_limit(unique("rl"), 2, RATE_WINDOW);
                let statuses = [
                    limiter.trigger("export").await?,
                    limiter.trigger("import").await?,
                    limiter.trigger("export").await?,
                ];
                let hits: Vec<bool> = statuses.iter().map(|s| s.hit_limit).collect();
                ensure!(hits == [false, false, true], "tracked hits: {:?}", hits);
                Ok(())
            })
            .await;

        steps
            .step("zero-window-rejected", async {
                let limiter = actor.rate_limit(unique("rl"), RATE_LIMIT, Duration::ZERO);
                expect_kind(limiter.trigger("login").await, ErrorKind::Validation, "zero window")?;
                Ok(())
            })
            .await;

        steps.finish()
    }
}
