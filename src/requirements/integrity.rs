use anyhow::ensure;
use async_trait::async_trait;
use chrono::Utc;

use crate::actor::{Actor, MutateOptions, RetrieveOptions};
use crate::connection::Connection;
use crate::core::{ErrorKind, Result};
use crate::runner::{Requirement, Steps, TestResult};
use crate::values::Amount;

use super::fixtures::{Transaction, WithPrimary};
use super::{expect_failure, name_hash, unique};

/// An immutable entity accepts its creation and state transitions only.
pub struct ImmutableTransaction;

#[async_trait]
impl Requirement for ImmutableTransaction {
    fn name(&self) -> &'static str {
        "immutable-transaction"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<Transaction>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let mut transaction = Transaction {
            amount: Amount::gbp(1023),
            reference: format!("trans-{}", Utc::now().timestamp_millis()),
            payment_type: "card".into(),
            ..Transaction::default()
        };

        let Some(id) = steps
            .step("create", async {
                actor.mutate(&mut transaction, MutateOptions::new()).await?;
                Ok(transaction.base.id().clone())
            })
            .await
        else {
            return steps.finish();
        };

        steps
            .step("update-rejected", async {
                transaction.payment_type = "cash".into();
                let err = expect_failure(
                    actor.mutate(&mut transaction, MutateOptions::new()).await,
                    "update of an immutable entity",
                )?;
                ensure!(err.is_immutable_update(), "expected an immutability violation, got {}", err);
                Ok(())
            })
            .await;

        steps
            .step("read-unchanged", async {
                let read: Transaction = actor.get(&id, RetrieveOptions::new()).await?;
                ensure!(read.payment_type == "card", "payment_type: {:?}", read.payment_type);
                ensure!(read.amount == Amount::gbp(1023), "amount: {:?}", read.amount);
                Ok(())
            })
            .await;

        steps
            .step("state-transition-allowed", async {
                actor.archive(&mut transaction).await?;
                actor.restore(&mut transaction).await?;
                Ok(())
            })
            .await;

        steps.finish()
    }
}

/// A primary property is required on create, defines identity and never
/// changes.
pub struct PrimaryKey;

#[async_trait]
impl Requirement for PrimaryKey {
    fn name(&self) -> &'static str {
        "primary-key"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<WithPrimary>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let last_name = unique("Doe");
        let hash = name_hash("John", &last_name);
        let mut entity = WithPrimary {
            first_name: "John".into(),
            last_name: last_name.clone(),
            ..WithPrimary::default()
        };

        steps
            .step("create-without-primary-rejected", async {
                let mut missing = entity.clone();
                expect_failure(
                    actor.mutate(&mut missing, MutateOptions::new()).await,
                    "create without primary property",
                )?;
                Ok(())
            })
            .await;

        let Some(id) = steps
            .step("create", async {
                entity.name_hash = Some(hash.clone());
                actor.mutate(&mut entity, MutateOptions::new()).await?;
                Ok(entity.base.id().clone())
            })
            .await
        else {
            return steps.finish();
        };

        steps
            .step("duplicate-ignored", async {
                let mut duplicate = WithPrimary {
                    first_name: "John".into(),
                    last_name: last_name.clone(),
                    name_hash: Some(hash.clone()),
                    ..WithPrimary::default()
                };
                let result = actor
                    .mutate(&mut duplicate, MutateOptions::new().ignore_conflict())
                    .await?;
                ensure!(result.id == id, "duplicate create returned {} instead of {}", result.id, id);
                ensure!(!result.created, "duplicate reported as newly created");
                Ok(())
            })
            .await;

        steps
            .step("duplicate-conflicts", async {
                let mut duplicate = WithPrimary {
                    first_name: "John".into(),
                    last_name: last_name.clone(),
                    name_hash: Some(hash.clone()),
                    ..WithPrimary::default()
                };
                let err = expect_failure(
                    actor.mutate(&mut duplicate, MutateOptions::new()).await,
                    "duplicate create without conflict policy",
                )?;
                ensure!(err.kind() == ErrorKind::Validation, "expected a validation error, got {}", err);
                Ok(())
            })
            .await;

        steps
            .step("primary-change-rejected", async {
                entity.name_hash = Some(name_hash("Jane", &last_name));
                let err = expect_failure(
                    actor.mutate(&mut entity, MutateOptions::new()).await,
                    "change of primary property",
                )?;
                ensure!(
                    matches!(err.kind(), ErrorKind::ImmutabilityViolation | ErrorKind::Validation),
                    "unexpected error kind: {}",
                    err
                );
                Ok(())
            })
            .await;

        steps
            .step("read-unchanged", async {
                let read: WithPrimary = actor.get(&id, RetrieveOptions::new()).await?;
                ensure!(read.name_hash.as_deref() == Some(hash.as_str()), "name_hash: {:?}", read.name_hash);
                Ok(())
            })
            .await;

        steps.finish()
    }
}
