use anyhow::ensure;
use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::actor::{Actor, ChartQuery, MutateOptions, RetrieveOptions};
use crate::connection::Connection;
use crate::core::{PropertySet, Result, Value};
use crate::marshal::TimeSeriesInput;
use crate::runner::{Requirement, Steps, TestResult};
use crate::transport::proto::Target;
use crate::values::{Amount, Interval};

use super::fixtures::{Account, Reading};
use super::unique;

/// Application key-value pairs, dynamic properties and hashed identities.
pub struct AkvAndDynamicProperties;

#[async_trait]
impl Requirement for AkvAndDynamicProperties {
    fn name(&self) -> &'static str {
        "akv-and-dynamic-properties"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<Account>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let key = unique("akv");

        steps
            .step("akv-round-trip", async {
                actor.akv_put(&key, "first").await?;
                actor.akv_put(&key, "second").await?;
                let value = actor.akv_get(&key).await?;
                ensure!(value == Some(Value::from("second")), "akv value: {:?}", value);

                let missing = actor.akv_get(&unique("absent")).await?;
                ensure!(missing.is_none(), "absent key returned {:?}", missing);
                Ok(())
            })
            .await;

        let hashed = unique("acct");
        let Some(id) = steps
            .step("create-hashed", async {
                let mut account = Account {
                    handle: unique("handle"),
                    balance: Amount::usd(250),
                    ..Account::default()
                };
                account.base.set_hashed_id(hashed.as_str());
                actor.mutate(&mut account, MutateOptions::new()).await?;
                ensure!(account.base.has_id(), "no id assigned");

                let read: Account = actor.get(Target::hashed(hashed.as_str()), RetrieveOptions::new()).await?;
                ensure!(read.base.id() == account.base.id(), "hashed lookup found {}", read.base.id());
                ensure!(read.balance == Amount::usd(250), "balance: {:?}", read.balance);
                Ok(account.base.id().clone())
            })
            .await
        else {
            return steps.finish();
        };

        steps
            .step("dynamic-properties", async {
                let mut properties = PropertySet::new();
                properties.insert("pref.colour", Value::from("teal"));
                properties.insert("pref.volume", Value::Int(7));
                properties.insert("limit", Value::Float(12.5));
                actor.set_dynamic_properties::<Account>(&id, properties).await?;

                let exact = actor.get_dynamic_properties::<Account>(&id, &["limit"]).await?;
                ensure!(exact.get("limit") == Some(&Value::Float(12.5)), "limit: {:?}", exact.get("limit"));
                ensure!(!exact.contains("pref.colour"), "exact key returned extra paths");

                let prefs = actor.get_dynamic_properties::<Account>(&id, &["pref.~"]).await?;
                let paths: Vec<&str> = prefs.paths().map(String::as_str).collect();
                ensure!(paths == ["pref.colour", "pref.volume"], "prefix read returned {:?}", paths);
                Ok(())
            })
            .await;

        steps
            .step("dynamic-outside-schema", async {
                let read = actor.get_record::<Account>(&id, RetrieveOptions::new()).await?;
                let declared = read.properties().is_some_and(|p| !p.contains("pref.colour"));
                ensure!(declared, "dynamic property leaked into the declared properties");
                Ok(())
            })
            .await;

        steps.finish()
    }
}

/// Time-series points are bucketed per metric-filter value, and snapshots
/// leave out `nosnapshot` properties.
pub struct TimeSeries;

#[async_trait]
impl Requirement for TimeSeries {
    fn name(&self) -> &'static str {
        "time-series"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<Reading>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let now = Utc::now();
        let warm = unique("warm");
        let cold = unique("cold");

        let reading = |sensor: &str, minutes: i64, celsius: f64| Reading {
            at: TimeSeriesInput::at(now - Duration::minutes(minutes)),
            sensor: sensor.to_string(),
            celsius,
            note: "hourly".into(),
            ..Reading::default()
        };

        steps
            .step("report", async {
                let points = vec![
                    reading(&warm, 1, 20.0),
                    reading(&warm, 2, 21.0),
                    reading(&warm, 3, 22.0),
                    reading(&cold, 1, 10.0),
                    reading(&cold, 2, 11.0),
                    reading(&cold, 3, 12.0),
                ];
                actor.report_time_series(&points).await?;
                Ok(())
            })
            .await;

        steps
            .step("missing-input-time-rejected", async {
                let point = Reading {
                    sensor: warm.clone(),
                    ..Reading::default()
                };
                let outcome = actor.report_time_series(&[point]).await;
                ensure!(outcome.is_err(), "point without an input time was accepted");
                Ok(())
            })
            .await;

        steps
            .step("chart-grouped", async {
                let query = ChartQuery::new("celsius", Interval::days(1), now - Duration::days(1), now + Duration::days(1))
                    .group_by("sensor");
                let series = actor.chart_time_series::<Reading>(query).await?;
                for (sensor, sum) in [(&warm, 63.0), (&cold, 33.0)] {
                    let Some(found) = series.iter().find(|s| s.group == *sensor) else {
                        anyhow::bail!("no series for {}", sensor);
                    };
                    ensure!(found.total_count() == 3, "{}: count {}", sensor, found.total_count());
                    ensure!((found.total_sum() - sum).abs() < 1e-9, "{}: sum {}", sensor, found.total_sum());
                }
                Ok(())
            })
            .await;

        steps
            .step("invalid-interval-rejected", async {
                let query = ChartQuery::new("celsius", Interval::days(0), now - Duration::days(1), now);
                let outcome = actor.chart_time_series::<Reading>(query).await;
                ensure!(outcome.is_err(), "zero interval was accepted");
                Ok(())
            })
            .await;

        steps
            .step("snapshot-omits-nosnapshot", async {
                let mut point = reading(&warm, 0, 23.5);
                point.note = "calibrated".into();
                actor.mutate(&mut point, MutateOptions::new()).await?;

                let snapshot = actor.snapshot::<Reading>(point.base.id()).await?;
                let properties = snapshot.properties().cloned().unwrap_or_default();
                ensure!(!properties.contains("note"), "snapshot carried 'note'");
                ensure!(
                    properties.get("sensor").and_then(Value::as_str) == Some(warm.as_str()),
                    "snapshot sensor: {:?}",
                    properties.get("sensor")
                );
                Ok(())
            })
            .await;

        steps.finish()
    }
}
