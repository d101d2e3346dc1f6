use anyhow::ensure;
use async_trait::async_trait;

use crate::actor::{Actor, FindQuery, MutateOptions, RetrieveOptions};
use crate::connection::Connection;
use crate::core::{ErrorKind, Result};
use crate::runner::{Requirement, Steps, TestResult};
use crate::transport::proto::Predicate;

use super::fixtures::Contact;
use super::{expect_failure, expect_kind, unique};

const REASON: &str = "conformance cleanup";

/// Destroy needs the confirmation hash and removes the entity for good.
pub struct Destroy;

#[async_trait]
impl Requirement for Destroy {
    fn name(&self) -> &'static str {
        "destroy"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<Contact>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let city = unique("doomed");

        let Some(id) = steps
            .step("create", async {
                let mut contact = Contact {
                    name: unique("destroy"),
                    city: city.clone(),
                    age: 99,
                    ..Contact::default()
                };
                actor.mutate(&mut contact, MutateOptions::new()).await?;
                Ok(contact.base.id().clone())
            })
            .await
        else {
            return steps.finish();
        };

        steps
            .step("wrong-confirmation-rejected", async {
                expect_failure(
                    actor
                        .destroy_confirmed::<Contact>(&id, "not-the-hash", REASON)
                        .await,
                    "destroy with a wrong confirmation",
                )?;
                let still_there: Contact = actor.get(&id, RetrieveOptions::new()).await?;
                ensure!(still_there.age == 99, "entity changed after a rejected destroy");
                Ok(())
            })
            .await;

        steps
            .step("destroy", async {
                actor.destroy::<Contact>(&id, REASON).await?;
                Ok(())
            })
            .await;

        steps
            .step("gone", async {
                expect_kind(
                    actor.get::<Contact>(&id, RetrieveOptions::new()).await,
                    ErrorKind::NotFound,
                    "read after destroy",
                )?;
                let found = actor
                    .find::<Contact>(
                        FindQuery::new()
                            .matching(Predicate::equals("city", city.as_str()))
                            .all_states(),
                    )
                    .await?;
                ensure!(found.is_empty(), "destroyed entity still found in state {:?}", found[0].state);
                Ok(())
            })
            .await;

        steps.finish()
    }
}
