use anyhow::{Context, ensure};
use async_trait::async_trait;

use crate::actor::{Actor, FindQuery, ListQuery, MutateOptions, RetrieveOptions};
use crate::connection::Connection;
use crate::core::{EntityId, EntityState, ErrorKind, Result};
use crate::marshal::{ChildLink, Entity};
use crate::runner::{Requirement, Steps, TestResult};
use crate::transport::proto::Predicate;
use crate::values::Amount;

use super::fixtures::{Contact, Renewal, Subscription};
use super::{expect_kind, unique};

const RENEWALS: i64 = 30;

async fn create_contact(actor: &Actor, name: &str, city: &str, age: i64) -> crate::Result<Contact> {
    let mut contact = Contact {
        name: name.to_string(),
        city: city.to_string(),
        age,
        ..Contact::default()
    };
    actor.mutate(&mut contact, MutateOptions::new()).await?;
    Ok(contact)
}

fn ids(records: &[crate::marshal::EntityRecord]) -> Vec<EntityId> {
    let mut ids: Vec<EntityId> = records.iter().map(|r| r.id.clone()).collect();
    ids.sort();
    ids
}

/// Value-indexed lookups, predicate finds and ordered, paged lists.
pub struct LookupsAndLists;

#[async_trait]
impl Requirement for LookupsAndLists {
    fn name(&self) -> &'static str {
        "lookups-and-lists"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<Contact>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let city = unique("city");
        let ann = unique("ann");
        let bob = unique("bob");

        let created = steps
            .step("create", async {
                let mut contacts = Vec::new();
                for (name, age) in [(ann.as_str(), 30), (bob.as_str(), 40), ("cy", 50)] {
                    contacts.push(create_contact(actor, name, &city, age).await?);
                }
                Ok(contacts)
            })
            .await;
        let Some(contacts) = created else {
            return steps.finish();
        };

        steps
            .step("lookup", async {
                let records = actor.lookup::<Contact>("name", ann.as_str()).await?;
                ensure!(records.len() == 1, "expected 1 match, got {}", records.len());
                ensure!(records[0].id == *contacts[0].base.id(), "lookup returned the wrong entity");
                Ok(())
            })
            .await;

        steps
            .step("lookup-one", async {
                let contact: Contact = actor.lookup_one("name", bob.as_str()).await?;
                ensure!(contact.age == 40, "age: {}", contact.age);
                expect_kind(
                    actor.lookup_one::<Contact>("name", unique("nobody")).await,
                    ErrorKind::NotFound,
                    "lookup of an absent value",
                )?;
                Ok(())
            })
            .await;

        steps
            .step("lookup-requires-declared-property", async {
                expect_kind(
                    actor.lookup::<Contact>("age", 30i64).await,
                    ErrorKind::Schema,
                    "lookup on a non-lookup property",
                )?;
                Ok(())
            })
            .await;

        steps
            .step("find-predicates", async {
                let in_city = Predicate::equals("city", city.as_str());
                let all = actor.find::<Contact>(FindQuery::new().matching(in_city.clone())).await?;
                ensure!(all.len() == 3, "equals: expected 3, got {}", all.len());

                let older = actor
                    .find::<Contact>(
                        FindQuery::new()
                            .matching(in_city.clone())
                            .matching(Predicate::greater_than("age", 35i64)),
                    )
                    .await?;
                ensure!(older.len() == 2, "greater-than: expected 2, got {}", older.len());

                let named = actor
                    .find_as::<Contact>(
                        FindQuery::new()
                            .matching(in_city)
                            .matching(Predicate::is_in("name", [ann.as_str(), bob.as_str()])),
                    )
                    .await?;
                ensure!(named.len() == 2, "in: expected 2, got {}", named.len());
                ensure!(named.iter().all(|c| c.age < 50), "in matched the wrong entities");
                Ok(())
            })
            .await;

        steps
            .step("list-sorted-paged", async {
                let query = ListQuery::new(["name", "age"])
                    .matching(Predicate::equals("city", city.as_str()))
                    .sort("age", false);
                let first = actor.list::<Contact>(query.clone().page(2, 0)).await?;
                ensure!(first.len() == 2, "first page: expected 2, got {}", first.len());
                let top: Contact = first[0].decode()?;
                ensure!(top.age == 50, "descending sort put age {} first", top.age);
                ensure!(top.city.is_empty(), "list returned a field outside the projection");

                let second = actor.list::<Contact>(query.page(2, 2)).await?;
                ensure!(second.len() == 1, "second page: expected 1, got {}", second.len());
                let last: Contact = second[0].decode()?;
                ensure!(last.age == 30, "last page holds age {}", last.age);
                Ok(())
            })
            .await;

        steps.finish()
    }
}

/// State transitions and the state subsets each filter selects.
pub struct StateFilters;

#[async_trait]
impl Requirement for StateFilters {
    fn name(&self) -> &'static str {
        "state-filters"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<Contact>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let city = unique("city");
        let in_city = || FindQuery::new().matching(Predicate::equals("city", city.as_str()));

        let created = steps
            .step("create", async {
                let active = create_contact(actor, &unique("active"), &city, 20).await?;
                let archived = create_contact(actor, &unique("archived"), &city, 21).await?;
                Ok((active, archived))
            })
            .await;
        let Some((active, mut other)) = created else {
            return steps.finish();
        };

        steps
            .step("archive", async {
                actor.archive(&mut other).await?;
                ensure!(other.base.state() == EntityState::Archived, "local state not updated");
                Ok(())
            })
            .await;

        steps
            .step("filter-subsets", async {
                let only_active = ids(&actor.find::<Contact>(in_city()).await?);
                let with_active = ids(
                    &actor
                        .find::<Contact>(in_city().with_states(vec![EntityState::Active]))
                        .await?,
                );
                let include_archived = ids(&actor.find::<Contact>(in_city().include_archived()).await?);
                let only_archived = ids(&actor.find::<Contact>(in_city().only_archived()).await?);
                let all = ids(&actor.find::<Contact>(in_city().all_states()).await?);

                ensure!(only_active == vec![active.base.id().clone()], "only-active: {:?}", only_active);
                ensure!(only_active == with_active, "with-states(active) differs from only-active");
                ensure!(only_archived == vec![other.base.id().clone()], "only-archived: {:?}", only_archived);
                ensure!(include_archived.len() == 2, "include-archived: {:?}", include_archived);
                ensure!(all.len() == 2, "all-states: {:?}", all);
                Ok(())
            })
            .await;

        steps
            .step("offline-and-corrupt", async {
                actor.set_offline(&mut other).await?;
                let offline = actor
                    .find::<Contact>(in_city().with_states(vec![EntityState::Offline]))
                    .await?;
                ensure!(offline.len() == 1, "offline: expected 1, got {}", offline.len());

                actor.mark_corrupt(&mut other).await?;
                let corrupt = actor
                    .find::<Contact>(in_city().with_states(vec![EntityState::Corrupt]))
                    .await?;
                ensure!(corrupt.len() == 1, "corrupt: expected 1, got {}", corrupt.len());
                Ok(())
            })
            .await;

        steps
            .step("restore", async {
                actor.restore(&mut other).await?;
                let active = actor.find::<Contact>(in_city()).await?;
                ensure!(active.len() == 2, "after restore: expected 2 active, got {}", active.len());
                Ok(())
            })
            .await;

        steps.finish()
    }
}

/// Child entities are counted and found through their parent.
pub struct Descendants;

#[async_trait]
impl Requirement for Descendants {
    fn name(&self) -> &'static str {
        "descendants"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<Subscription>()?;
        connection.register::<Renewal>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());

        let Some(parent) = steps
            .step("create-parent", async {
                let mut subscription = Subscription {
                    plan: unique("plan"),
                    ..Subscription::default()
                };
                actor.mutate(&mut subscription, MutateOptions::new()).await?;
                Ok(subscription.base.id().clone())
            })
            .await
        else {
            return steps.finish();
        };

        steps
            .step("create-children", async {
                for sequence in 1..=RENEWALS {
                    let mut renewal = Renewal {
                        link: ChildLink::new(parent.clone()),
                        sequence,
                        price: Amount::gbp(1200),
                        ..Renewal::default()
                    };
                    actor
                        .mutate(&mut renewal, MutateOptions::new())
                        .await
                        .with_context(|| format!("renewal {}", sequence))?;
                }
                Ok(())
            })
            .await;

        steps
            .step("descendant-count", async {
                let options = RetrieveOptions::new()
                    .with_summary()
                    .with_descendant_count(Renewal::schema_key());
                let subscription: Subscription = actor.get(&parent, options).await?;
                ensure!(
                    subscription.number_of_renewals == RENEWALS,
                    "number_of_renewals: {}",
                    subscription.number_of_renewals
                );
                Ok(())
            })
            .await;

        steps
            .step("count-absent-unless-requested", async {
                let subscription: Subscription = actor.get(&parent, RetrieveOptions::new()).await?;
                ensure!(
                    subscription.number_of_renewals == 0,
                    "count populated without being requested"
                );
                Ok(())
            })
            .await;

        steps
            .step("find-children", async {
                let children = actor
                    .find::<Renewal>(FindQuery::new().matching(Predicate::child_of(parent.clone())))
                    .await?;
                ensure!(
                    children.len() as i64 == RENEWALS,
                    "child-of: expected {}, got {}",
                    RENEWALS,
                    children.len()
                );

                let later = actor
                    .find_as::<Renewal>(
                        FindQuery::new()
                            .matching(Predicate::child_of(parent.clone()))
                            .matching(Predicate::greater_than("sequence", 20i64)),
                    )
                    .await?;
                ensure!(later.len() == 10, "child-of + greater-than: expected 10, got {}", later.len());
                ensure!(
                    later.iter().all(|r| r.sequence > 20),
                    "greater-than matched an earlier renewal"
                );
                Ok(())
            })
            .await;

        steps.finish()
    }
}
