use anyhow::ensure;
use async_trait::async_trait;

use crate::actor::{Actor, FindQuery, MutateOptions, RetrieveOptions};
use crate::connection::Connection;
use crate::core::Result;
use crate::marshal::{EventRecord, LogEntry, LogLevel, Relationship};
use crate::runner::{Requirement, Steps, TestResult};
use crate::transport::proto::Predicate;
use crate::values::Interval;

use super::fixtures::{Contact, Contract};
use super::unique;

const FRIEND: &str = "friend";

async fn contact(actor: &Actor, name: &str) -> crate::Result<Contact> {
    let mut contact = Contact {
        name: name.to_string(),
        city: "leeds".into(),
        age: 33,
        ..Contact::default()
    };
    actor.mutate(&mut contact, MutateOptions::new()).await?;
    Ok(contact)
}

/// Labels and keyed relationships are written with a mutation, read back,
/// searched on and counted.
pub struct LabelsAndRelationships;

#[async_trait]
impl Requirement for LabelsAndRelationships {
    fn name(&self) -> &'static str {
        "labels-and-relationships"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<Contact>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let label = unique("vip");

        let Some((mut subject, first, second)) = steps
            .step("create", async {
                let first = contact(actor, &unique("first")).await?;
                let second = contact(actor, &unique("second")).await?;
                let mut subject = Contact {
                    name: unique("subject"),
                    ..Contact::default()
                };
                subject.base.add_label(label.as_str());
                subject.base.add_relationship(FRIEND, first.base.id().clone());
                subject.base.add_relationship(FRIEND, second.base.id().clone());
                actor.mutate(&mut subject, MutateOptions::new()).await?;
                ensure!(subject.base.pending().is_empty(), "writes still pending after mutate");
                Ok((subject, first.base.id().clone(), second.base.id().clone()))
            })
            .await
        else {
            return steps.finish();
        };
        let id = subject.base.id().clone();

        steps
            .step("read-back", async {
                let options = RetrieveOptions::new().with_labels().with_all_relationships();
                let record = actor.get_record::<Contact>(&id, options).await?;
                ensure!(record.labels.contains(&label), "labels: {:?}", record.labels);
                for target in [&first, &second] {
                    let wanted = Relationship::new(FRIEND, target.clone());
                    ensure!(
                        record.relationships.contains(&wanted),
                        "relationship to {} missing: {:?}",
                        target,
                        record.relationships
                    );
                }

                let keyed = actor
                    .get_record::<Contact>(&id, RetrieveOptions::new().with_relationships(["colleague"]))
                    .await?;
                ensure!(keyed.relationships.is_empty(), "unrequested relationship keys returned");
                Ok(())
            })
            .await;

        steps
            .step("find-by-label", async {
                let found = actor.find::<Contact>(FindQuery::new().matching(Predicate::label(label.as_str()))).await?;
                ensure!(
                    found.len() == 1 && found[0].id == id,
                    "label search returned {:?}",
                    found.iter().map(|r| &r.id).collect::<Vec<_>>()
                );
                Ok(())
            })
            .await;

        steps
            .step("find-by-sibling", async {
                let found = actor
                    .find::<Contact>(FindQuery::new().matching(Predicate::related_to_sibling(FRIEND, first.clone())))
                    .await?;
                ensure!(found.iter().any(|r| r.id == id), "sibling search missed the subject");
                Ok(())
            })
            .await;

        steps
            .step("relation-count", async {
                let read: Contact = actor
                    .get(&id, RetrieveOptions::new().with_relation_count(FRIEND))
                    .await?;
                ensure!(read.friends == 2, "friends: {}", read.friends);
                Ok(())
            })
            .await;

        steps
            .step("remove", async {
                subject.base.remove_label(label.as_str());
                subject.base.remove_relationship(FRIEND, second.clone());
                actor.mutate(&mut subject, MutateOptions::new()).await?;

                let options = RetrieveOptions::new()
                    .with_labels()
                    .with_all_relationships()
                    .with_declared_counts::<Contact>()?;
                actor.reload(&mut subject, options).await?;
                ensure!(!subject.base.labels().contains(&label), "label survived removal");
                ensure!(
                    subject.base.relationships() == [Relationship::new(FRIEND, first.clone())],
                    "relationships after removal: {:?}",
                    subject.base.relationships()
                );
                ensure!(subject.friends == 1, "friends after removal: {}", subject.friends);
                Ok(())
            })
            .await;

        steps.finish()
    }
}

/// Events and logs queued on an entity travel with its mutation and can be
/// read back filtered.
pub struct EventsAndLogs;

#[async_trait]
impl Requirement for EventsAndLogs {
    fn name(&self) -> &'static str {
        "events-and-logs"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<Contract>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let reference = unique("contract");

        let Some(id) = steps
            .step("create-with-records", async {
                let mut contract = Contract {
                    title: reference.clone(),
                    term: Interval::months(12),
                    ..Contract::default()
                };
                contract
                    .base
                    .add_event(EventRecord::new("signed").with("reference", reference.as_str()));
                contract.base.add_event(EventRecord::new("countersigned"));
                contract
                    .base
                    .add_log(LogEntry::new(LogLevel::Info, "contract drafted").reference(reference.as_str()));
                actor.mutate(&mut contract, MutateOptions::new()).await?;
                Ok(contract.base.id().clone())
            })
            .await
        else {
            return steps.finish();
        };

        steps
            .step("events", async {
                let all = actor.events::<Contract>(&id, &[]).await?;
                let types: Vec<&str> = all.iter().map(|e| e.event_type.as_str()).collect();
                ensure!(types.contains(&"signed"), "events: {:?}", types);
                ensure!(types.contains(&"countersigned"), "events: {:?}", types);

                let signed = all.iter().find(|e| e.event_type == "signed");
                ensure!(
                    signed.and_then(|e| e.data.get("reference")) == Some(&reference),
                    "event data lost"
                );
                let caller = &actor.caller().user_id;
                ensure!(
                    all.iter().all(|e| e.user_id == *caller),
                    "events not stamped with the calling user"
                );
                Ok(())
            })
            .await;

        steps
            .step("events-filtered", async {
                let filtered = actor.events::<Contract>(&id, &["countersigned"]).await?;
                ensure!(filtered.len() == 1, "expected 1 countersigned event, got {}", filtered.len());
                let none = actor.events::<Contract>(&id, &["terminated"]).await?;
                ensure!(none.is_empty(), "filter on an unused type returned {:?}", none);
                Ok(())
            })
            .await;

        steps
            .step("write-log", async {
                actor.log::<Contract>(&id, LogLevel::Warn, "renewal overdue").await?;
                actor.write_logs::<Contract>(&id, Vec::new()).await?;
                Ok(())
            })
            .await;

        steps
            .step("logs-min-level", async {
                let warnings = actor.logs::<Contract>(&id, LogLevel::Warn).await?;
                ensure!(
                    warnings.iter().all(|l| l.level >= LogLevel::Warn),
                    "min level not applied: {:?}",
                    warnings
                );
                ensure!(
                    warnings.iter().any(|l| l.message == "renewal overdue"),
                    "warning missing"
                );

                let everything = actor.logs::<Contract>(&id, LogLevel::Debug).await?;
                let drafted = everything.iter().find(|l| l.message == "contract drafted");
                ensure!(
                    drafted.is_some_and(|l| l.reference == reference),
                    "queued log missing or lost its reference"
                );
                Ok(())
            })
            .await;

        steps.finish()
    }
}
