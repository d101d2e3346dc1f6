use anyhow::ensure;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::actor::{Actor, MutateOptions, RetrieveOptions};
use crate::connection::Connection;
use crate::core::{Result, same_second};
use crate::runner::{Requirement, Steps, TestResult};
use crate::transport::proto::Target;
use crate::values::{Amount, SecureString, VerifyString};

use super::fixtures::{Company, Executive, Extended, Person, Role};
use super::unique;

fn date_of_birth() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1985, 6, 24, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

pub(crate) fn sample_person(name: &str) -> Person {
    Person {
        name: name.to_string(),
        height_in_cm: 190,
        date_of_birth: date_of_birth(),
        bank_balance: Amount::gbp(1000),
        full_name: SecureString::new("John Doe", "Jo*** D***"),
        account_pin: VerifyString::new("1234"),
        secret_answer: SecureString::new("Pet Name", "Pe*******"),
        ..Person::default()
    }
}

/// Scalar, temporal, monetary and secure properties survive a round trip;
/// a selective update touches only the selected property.
pub struct PersonRoundTrip;

#[async_trait]
impl Requirement for PersonRoundTrip {
    fn name(&self) -> &'static str {
        "person"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<Person>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let mut person = sample_person("A");

        let created = steps
            .step("create", async {
                actor.mutate(&mut person, MutateOptions::new().comment("create person")).await?;
                ensure!(person.base.has_id(), "no id written back after create");
                Ok(person.base.id().clone())
            })
            .await;
        let Some(id) = created else {
            steps.skip("read", "create");
            return steps.finish();
        };

        steps
            .step("read-decrypted", async {
                let read: Person = actor.get(&id, RetrieveOptions::new().decrypted()).await?;
                ensure!(read.name == "A", "name: {:?}", read.name);
                ensure!(read.height_in_cm == 190, "height_in_cm: {}", read.height_in_cm);
                ensure!(
                    same_second(&read.date_of_birth, &date_of_birth()),
                    "dob: {}",
                    read.date_of_birth
                );
                ensure!(read.bank_balance == Amount::gbp(1000), "bank_balance: {:?}", read.bank_balance);
                ensure!(
                    read.full_name == SecureString::new("John Doe", "Jo*** D***"),
                    "full_name: {:?}",
                    read.full_name
                );
                ensure!(
                    read.secret_answer.plain() == Some("Pet Name"),
                    "secret_answer plaintext missing"
                );
                ensure!(!read.account_pin.is_set(), "verify value was returned by the server");
                Ok(())
            })
            .await;

        steps
            .step("read-masked", async {
                let read: Person = actor.get(&id, RetrieveOptions::new()).await?;
                ensure!(read.secret_answer.plain().is_none(), "plaintext returned without decrypt");
                ensure!(
                    read.secret_answer.masked() == "Pe*******",
                    "masked form: {:?}",
                    read.secret_answer.masked()
                );
                ensure!(read.full_name.masked() == "Jo*** D***", "full_name masked form changed");
                Ok(())
            })
            .await;

        steps
            .step("partial-update", async {
                let mut update = Person {
                    name: "B".to_string(),
                    ..Person::default()
                };
                update.base.set_id(id.clone());
                actor.mutate(&mut update, MutateOptions::new().select(["name"])).await?;
                Ok(())
            })
            .await;

        steps
            .step("read-after-partial-update", async {
                let read: Person = actor.get(&id, RetrieveOptions::new()).await?;
                ensure!(read.name == "B", "name: {:?}", read.name);
                ensure!(read.height_in_cm == 190, "height_in_cm changed to {}", read.height_in_cm);
                ensure!(read.bank_balance == Amount::gbp(1000), "bank_balance changed");
                Ok(())
            })
            .await;

        steps
            .step("read-property-subset", async {
                let record = actor
                    .get_record::<Person>(&id, RetrieveOptions::new().only(["height_in_cm"]))
                    .await?;
                let properties = record.properties().map(|p| p.len()).unwrap_or(0);
                ensure!(properties == 1, "expected one property, got {}", properties);
                Ok(())
            })
            .await;

        steps.finish()
    }
}

/// Selective updates of nested sub-structures leave their siblings alone.
pub struct NestedPartialUpdate;

#[async_trait]
impl Requirement for NestedPartialUpdate {
    fn name(&self) -> &'static str {
        "nested-partial-update"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<Company>()?;
        connection.register::<Person>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let since = Utc::now();
        let mut company = Company {
            name: unique("acme"),
            ceo: Executive {
                name: "X".into(),
                current_role: Role {
                    title: "CEO".into(),
                    since,
                },
            },
            founded: date_of_birth(),
            ..Company::default()
        };

        let Some(id) = steps
            .step("create", async {
                actor.mutate(&mut company, MutateOptions::new()).await?;
                Ok(company.base.id().clone())
            })
            .await
        else {
            return steps.finish();
        };

        steps
            .step("update-nested-title", async {
                company.ceo.current_role.title = "CTO".into();
                company.ceo.name = "not sent".into();
                actor
                    .mutate(&mut company, MutateOptions::new().select(["ceo.current_role.title"]))
                    .await?;
                Ok(())
            })
            .await;

        let expected_name = company.name.clone();
        steps
            .step("read-nested", async {
                let read: Company = actor.get(&id, RetrieveOptions::new()).await?;
                ensure!(read.ceo.current_role.title == "CTO", "title: {:?}", read.ceo.current_role.title);
                ensure!(read.ceo.name == "X", "sibling ceo.name clobbered: {:?}", read.ceo.name);
                ensure!(
                    same_second(&read.ceo.current_role.since, &since),
                    "sibling ceo.current_role.since clobbered"
                );
                ensure!(read.name == expected_name, "name clobbered");
                Ok(())
            })
            .await;

        let unique_id = unique("ext");
        let person_id = steps
            .step("set-extended", async {
                let mut person = super::person::sample_person("nested");
                actor.mutate(&mut person, MutateOptions::new()).await?;
                person.extended = Some(Extended {
                    unique_id: unique_id.clone(),
                    nickname: String::new(),
                });
                person.name = "not sent".into();
                actor
                    .mutate(&mut person, MutateOptions::new().select(["extended.unique_id"]))
                    .await?;
                Ok(person.base.id().clone())
            })
            .await;

        if let Some(person_id) = person_id {
            steps
                .step("read-by-nested-unique", async {
                    let read: Person = actor
                        .get(Target::unique("extended.unique_id", unique_id.as_str()), RetrieveOptions::new())
                        .await?;
                    ensure!(read.base.id() == &person_id, "unique lookup found {}", read.base.id());
                    ensure!(read.name == "nested", "name clobbered: {:?}", read.name);
                    let extended = read.extended.unwrap_or_default();
                    ensure!(extended.unique_id == unique_id, "extended.unique_id: {:?}", extended.unique_id);
                    Ok(())
                })
                .await;
        } else {
            steps.skip("read-by-nested-unique", "set-extended");
        }

        steps.finish()
    }
}
