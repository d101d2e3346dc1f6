use std::collections::BTreeMap;

use anyhow::ensure;
use async_trait::async_trait;

use crate::actor::{Actor, MutateOptions, RetrieveOptions};
use crate::connection::Connection;
use crate::core::Result;
use crate::marshal::Children;
use crate::runner::{Requirement, Steps, TestResult};
use crate::values::{
    Amount, Email, ExternalId, IntSet, Interval, KeyMixed, MinMax, Mixed, PersonName, Phone,
    StringSet, Translations,
};

use super::fixtures::{DataTypes, Order, OrderLine};
use super::unique;

fn sample() -> DataTypes {
    DataTypes {
        integer_set: IntSet::from_values([1, 2, 3, 4]),
        string_set: StringSet::of(&["red", "green"]),
        mixed_key: KeyMixed::from_entries([
            ("first", Mixed::Int(1)),
            ("second", Mixed::Text("text".into())),
        ]),
        mixed: Mixed::Bool(true),
        period: Interval::months(3),
        payload: vec![0xde, 0xad, 0xbe, 0xef],
        enabled: true,
        ratio: 0.25,
        range: MinMax::new(-5.0, 42.5),
        external: ExternalId::new("acme", "crm", "contact", "c-9"),
        titles: Translations::new().with("en", "Manager").with("fr", "Gérant"),
        contact_name: PersonName::new("John", "Doe"),
        email: Email::new("john.doe@example.com"),
        phone: Phone::new("+441234567890"),
        attributes: BTreeMap::from([("tier".to_string(), "gold".to_string())]),
        aliases: vec!["jd".into(), "johnny".into()],
        ..DataTypes::default()
    }
}

/// Every semantic value kind round-trips; set-like values apply deltas.
pub struct DataTypesRoundTrip;

#[async_trait]
impl Requirement for DataTypesRoundTrip {
    fn name(&self) -> &'static str {
        "data-types"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<DataTypes>()?;
        connection.register::<Order>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let mut entity = sample();

        let Some(id) = steps
            .step("create", async {
                actor.mutate(&mut entity, MutateOptions::new()).await?;
                Ok(entity.base.id().clone())
            })
            .await
        else {
            return steps.finish();
        };

        steps
            .step("read-all-kinds", async {
                let read: DataTypes = actor.get(&id, RetrieveOptions::new()).await?;
                let expected = sample();
                ensure!(read.integer_set == expected.integer_set, "integer_set: {:?}", read.integer_set.to_vec());
                ensure!(read.string_set == expected.string_set, "string_set: {:?}", read.string_set.to_vec());
                ensure!(read.mixed_key == expected.mixed_key, "mixed_key: {:?}", read.mixed_key.entries());
                ensure!(read.mixed == expected.mixed, "mixed: {:?}", read.mixed);
                ensure!(read.period == expected.period, "period: {}", read.period);
                ensure!(read.payload == expected.payload, "payload differs");
                ensure!(read.enabled, "enabled lost");
                ensure!(read.ratio == expected.ratio, "ratio: {}", read.ratio);
                ensure!(read.range == expected.range, "range: {:?}", read.range);
                ensure!(read.external == expected.external, "external: {:?}", read.external);
                ensure!(read.titles == expected.titles, "titles: {:?}", read.titles);
                ensure!(read.contact_name == expected.contact_name, "contact_name: {}", read.contact_name);
                ensure!(read.email == expected.email, "email: {:?}", read.email);
                ensure!(read.phone == expected.phone, "phone: {:?}", read.phone);
                ensure!(read.attributes == expected.attributes, "attributes: {:?}", read.attributes);
                ensure!(read.aliases == expected.aliases, "aliases: {:?}", read.aliases);
                ensure!(read.owner.is_empty(), "unset owner came back as {}", read.owner);
                Ok(())
            })
            .await;

        steps
            .step("add-deltas", async {
                entity.integer_set.add(7);
                entity.mixed_key.append("third", Mixed::Text("newval".into()));
                entity.string_set.add("blue".to_string());
                actor.mutate(&mut entity, MutateOptions::new()).await?;

                let read: DataTypes = actor.get(&id, RetrieveOptions::new()).await?;
                ensure!(
                    read.integer_set == IntSet::from_values([1, 2, 3, 4, 7]),
                    "integer_set: {:?}",
                    read.integer_set.to_vec()
                );
                ensure!(read.integer_set.diff(&[1, 2, 3, 4]) == vec![7], "diff mismatch");
                ensure!(read.mixed_key.contains_key("third"), "key 'third' missing");
                ensure!(read.mixed_key.get("second") == Some(&Mixed::Text("text".into())), "key 'second' changed");
                ensure!(read.string_set.contains(&"blue".to_string()), "string_set lacks 'blue'");
                Ok(())
            })
            .await;

        steps
            .step("remove-deltas", async {
                entity.integer_set.remove(&2);
                entity.mixed_key.remove("third");
                entity.string_set.remove(&"red".to_string());
                actor.mutate(&mut entity, MutateOptions::new()).await?;

                let read: DataTypes = actor.get(&id, RetrieveOptions::new()).await?;
                ensure!(
                    read.integer_set == IntSet::from_values([1, 3, 4, 7]),
                    "integer_set: {:?}",
                    read.integer_set.to_vec()
                );
                ensure!(!read.mixed_key.contains_key("third"), "key 'third' still present");
                ensure!(read.string_set == StringSet::of(&["green", "blue"]), "string_set: {:?}", read.string_set.to_vec());
                Ok(())
            })
            .await;

        steps
            .step("repeated-delta-idempotent", async {
                entity.integer_set.add(7);
                actor.mutate(&mut entity, MutateOptions::new()).await?;
                let read: DataTypes = actor.get(&id, RetrieveOptions::new()).await?;
                ensure!(read.integer_set.len() == 4, "integer_set: {:?}", read.integer_set.to_vec());
                Ok(())
            })
            .await;

        steps
            .step("cleared-set-replaces", async {
                entity.string_set.clear();
                actor.mutate(&mut entity, MutateOptions::new()).await?;
                let read: DataTypes = actor.get(&id, RetrieveOptions::new()).await?;
                ensure!(read.string_set.is_empty(), "string_set: {:?}", read.string_set.to_vec());
                ensure!(read.integer_set.len() == 4, "untouched integer_set changed");
                Ok(())
            })
            .await;

        steps
            .step("child-records", async {
                let mut order = Order {
                    number: unique("order"),
                    lines: Children::new(vec![
                        OrderLine {
                            sku: "sku-1".into(),
                            quantity: 2,
                            unit_price: Amount::gbp(250),
                        },
                        OrderLine {
                            sku: "sku-2".into(),
                            quantity: 1,
                            unit_price: Amount::gbp(999),
                        },
                    ]),
                    ..Order::default()
                };
                actor.mutate(&mut order, MutateOptions::new()).await?;
                let read: Order = actor.get(order.base.id(), RetrieveOptions::new()).await?;
                ensure!(read.lines.len() == 2, "expected 2 lines, got {}", read.lines.len());
                ensure!(read.lines == order.lines, "lines: {:?}", read.lines);
                Ok(())
            })
            .await;

        steps.finish()
    }
}
