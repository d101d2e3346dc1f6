use anyhow::ensure;
use async_trait::async_trait;
use chrono::Utc;

use crate::actor::gdpr::within_recovery_window;
use crate::actor::{Actor, MutateOptions, RetrieveOptions};
use crate::connection::Connection;
use crate::core::{ErrorKind, Result};
use crate::marshal::Entity;
use crate::runner::{Requirement, Steps, TestResult};
use crate::values::Phone;

use super::fixtures::{Patient, Person};
use super::person::sample_person;
use super::{expect_kind, peer_connection, unique};

const REGION: &str = "eu";
const PATIENT_NAME: &str = "Ada Lovelace";

/// PII properties are written only under a GDPR token and can be
/// anonymized and recovered within the recovery window.
pub struct Gdpr;

#[async_trait]
impl Requirement for Gdpr {
    fn name(&self) -> &'static str {
        "gdpr"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<Patient>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let reference = unique("patient");
        let mut patient = Patient {
            reference: reference.clone(),
            name: PATIENT_NAME.into(),
            phone: Phone::new("+44 20 7946 0000"),
            ward: "b".into(),
            ..Patient::default()
        };

        let Some(token) = steps
            .step("issue-token", async {
                let token = actor.new_gdpr_token(&reference, REGION).await?;
                ensure!(!token.token.is_empty(), "empty token");
                ensure!(token.reference == reference, "token reference: {}", token.reference);
                Ok(token)
            })
            .await
        else {
            return steps.finish();
        };

        steps
            .step("write-without-token-rejected", async {
                let mut unauthorized = patient.clone();
                expect_kind(
                    actor.mutate(&mut unauthorized, MutateOptions::new()).await,
                    ErrorKind::PiiGate,
                    "PII write without a token",
                )?;
                Ok(())
            })
            .await;

        let Some(id) = steps
            .step("write-with-token", async {
                actor
                    .mutate(&mut patient, MutateOptions::new().pii_token(token.token.as_str()))
                    .await?;
                let read: Patient = actor.get(patient.base.id(), RetrieveOptions::new()).await?;
                ensure!(read.name == PATIENT_NAME, "name: {:?}", read.name);
                Ok(patient.base.id().clone())
            })
            .await
        else {
            return steps.finish();
        };

        steps
            .step("write-with-reference", async {
                patient.ward = "c".into();
                actor
                    .mutate(&mut patient, MutateOptions::new().pii_reference(reference.as_str()))
                    .await?;
                Ok(())
            })
            .await;

        steps
            .step("anonymize", async {
                let deadline = actor.anonymize(&token).await?;
                ensure!(
                    within_recovery_window(&deadline, &Utc::now()),
                    "recovery deadline {} outside the window",
                    deadline
                );
                let read: Patient = actor.get(&id, RetrieveOptions::new()).await?;
                ensure!(read.name != PATIENT_NAME, "name still readable after anonymize");
                ensure!(read.ward == "c", "non-PII property changed: {:?}", read.ward);
                Ok(())
            })
            .await;

        steps
            .step("rollback", async {
                actor.anonymize_rollback(&token).await?;
                let read: Patient = actor.get(&id, RetrieveOptions::new()).await?;
                ensure!(read.name == PATIENT_NAME, "name after rollback: {:?}", read.name);
                ensure!(read.phone == patient.phone, "phone after rollback: {:?}", read.phone);
                Ok(())
            })
            .await;

        steps.finish()
    }
}

/// A shared property subset is readable by the grantee, masked where
/// secure; the grantee may read but not modify the owner's entity.
pub struct SharedViews;

#[async_trait]
impl Requirement for SharedViews {
    fn name(&self) -> &'static str {
        "shared-views"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<Person>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let owner = actor.connection().owner();
        let peer_connection = peer_connection(actor.connection());
        let grantee = peer_connection.owner();
        let peer = Actor::new(peer_connection, actor.caller().clone(), actor.cancellation().clone());
        let name = unique("shared");

        let Some(id) = steps
            .step("create", async {
                let mut person = sample_person(&name);
                actor.mutate(&mut person, MutateOptions::new()).await?;
                Ok(person.base.id().clone())
            })
            .await
        else {
            return steps.finish();
        };

        steps
            .step("empty-share-rejected", async {
                expect_kind(
                    actor.share_view::<Person>(&id, grantee.clone(), &[]).await,
                    ErrorKind::Validation,
                    "share without properties",
                )?;
                Ok(())
            })
            .await;

        let Some(share_id) = steps
            .step("share", async {
                let share_id = actor
                    .share_view::<Person>(&id, grantee.clone(), &["name", "full_name"])
                    .await?;
                ensure!(!share_id.is_empty(), "empty share id");
                Ok(share_id)
            })
            .await
        else {
            return steps.finish();
        };

        steps
            .step("grantee-lists-share", async {
                let views = peer.shared_views(Some(&Person::schema_key())).await?;
                let view = views.iter().find(|v| v.share_id == share_id);
                ensure!(
                    view.is_some_and(|v| v.owner == owner && v.id == id),
                    "share not listed for the grantee: {:?}",
                    views
                );
                Ok(())
            })
            .await;

        steps
            .step("grantee-reads-subset", async {
                let shared: Person = peer.get_shared_as(&share_id).await?;
                ensure!(shared.name == name, "name: {:?}", shared.name);
                ensure!(!shared.full_name.is_decrypted(), "secure property arrived decrypted");
                ensure!(shared.full_name.masked() == "Jo*** D***", "masked: {:?}", shared.full_name.masked());
                ensure!(shared.height_in_cm == 0, "unshared property returned: {}", shared.height_in_cm);
                Ok(())
            })
            .await;

        steps
            .step("remote-get", async {
                let read: Person = peer
                    .remote_get(owner.clone(), &id, RetrieveOptions::new().only(["name"]))
                    .await?;
                ensure!(read.name == name, "remote name: {:?}", read.name);
                Ok(())
            })
            .await;

        steps
            .step("remote-mutate-denied", async {
                let mut copy = Person {
                    name: "hijacked".into(),
                    ..Person::default()
                };
                copy.base.set_id(id.clone());
                expect_kind(
                    peer.remote_mutate(owner.clone(), &mut copy, MutateOptions::new().select(["name"]))
                        .await,
                    ErrorKind::Authorization,
                    "grantee mutation",
                )?;
                let read: Person = actor.get(&id, RetrieveOptions::new()).await?;
                ensure!(read.name == name, "owner's entity changed: {:?}", read.name);
                Ok(())
            })
            .await;

        steps.finish()
    }
}
