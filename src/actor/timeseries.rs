use chrono::{DateTime, Utc};

use crate::core::{EntityId, Result, StoreError, Timestamp};
use crate::marshal::{Entity, EntityRecord, Encoder};
use crate::transport::proto::{ChartRequest, SeriesPoint, Series};
use crate::transport::Request;
use crate::values::Interval;

use super::Actor;

/// Bucketed aggregation over a metric property.
#[derive(Debug, Clone)]
pub struct ChartQuery {
    metric: String,
    group_by: Option<String>,
    interval: Interval,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl ChartQuery {
    pub fn new(metric: impl Into<String>, interval: Interval, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            metric: metric.into(),
            group_by: None,
            interval,
            from,
            to,
        }
    }

    /// Splits the chart into one series per value of a metric-filter property.
    pub fn group_by(mut self, property: impl Into<String>) -> Self {
        self.group_by = Some(property.into());
        self
    }
}

impl Actor {
    /// Point-in-time snapshot of an entity. Properties declared
    /// `nosnapshot` are absent from the result.
    pub async fn snapshot<E: Entity>(&self, id: &EntityId) -> Result<EntityRecord> {
        self.call(Request::Snapshot {
            schema: E::schema_key(),
            id: id.clone(),
        })
        .await?
        .into_retrieved()
    }

    /// Reports one data point per entity. Each must carry an input time.
    pub async fn report_time_series<E: Entity>(&self, points: &[E]) -> Result<()> {
        if !E::type_options().time_series {
            return Err(StoreError::Schema(format!("'{}' is not a time-series type", E::schema_key())));
        }
        let mut encoded = Vec::with_capacity(points.len());
        for point in points {
            let at = point.time_series().and_then(|ts| ts.time()).ok_or_else(|| {
                StoreError::Marshal(format!("'{}' data point has no input time", E::schema_key()))
            })?;
            let mut encoder = Encoder::new(&[]);
            point.encode_properties("", &mut encoder);
            let (properties, _) = encoder.finish()?;
            encoded.push(SeriesPoint {
                at: Timestamp::from_datetime(&at),
                properties,
            });
        }
        self.call(Request::ReportTimeSeries {
            schema: E::schema_key(),
            points: encoded,
        })
        .await?
        .into_ack()
    }

    pub async fn chart_time_series<E: Entity>(&self, query: ChartQuery) -> Result<Vec<Series>> {
        if !query.interval.is_valid() {
            return Err(StoreError::validation(
                http::StatusCode::BAD_REQUEST,
                format!("invalid chart interval {}", query.interval),
            ));
        }
        let request = ChartRequest {
            schema: E::schema_key(),
            metric: query.metric,
            group_by: query.group_by,
            interval: query.interval,
            from: Timestamp::from_datetime(&query.from),
            to: Timestamp::from_datetime(&query.to),
        };
        self.call(Request::ChartTimeSeries(request))
            .await?
            .into_chart()
    }
}
