use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::{EntityId, Result, StoreError};
use crate::marshal::Entity;
use crate::transport::proto::{IncrementingIdRequest, RateLimitRequest, RateLimitStatus, Squat, SquidIssued};
use crate::transport::Request;

use super::Actor;

/// Sliding-window counter held by the server. Hitting the limit is a
/// normal response with `hit_limit` set, not an error.
#[derive(Clone)]
pub struct RateLimiter {
    actor: Actor,
    key: String,
    limit: u32,
    window: Duration,
    tracked: bool,
}

impl RateLimiter {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Counts one occurrence of `operation` and returns the new count.
    pub async fn trigger(&self, operation: &str) -> Result<RateLimitStatus> {
        let window_seconds = u32::try_from(self.window.as_secs()).unwrap_or(u32::MAX);
        if self.limit == 0 || window_seconds == 0 {
            return Err(StoreError::validation(
                http::StatusCode::BAD_REQUEST,
                format!("rate limit '{}' needs a positive limit and window", self.key),
            ));
        }
        self.actor
            .call(Request::RateLimit(RateLimitRequest {
                key: self.key.clone(),
                limit: self.limit,
                window_seconds,
                tracked: self.tracked,
                operation: operation.to_string(),
            }))
            .await?
            .into_rate_limited()
    }
}

/// Batch of named counters scoped to one entity.
#[derive(Clone)]
pub struct IncrementingIds {
    actor: Actor,
    schema: String,
    id: EntityId,
    counters: Vec<String>,
    read_only: Vec<String>,
}

impl IncrementingIds {
    /// Counters read alongside the batch without advancing.
    pub fn read_only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.read_only.extend(names.into_iter().map(Into::into));
        self
    }

    /// Advances every counter by one and returns all current values.
    pub async fn commit(&self) -> Result<BTreeMap<String, i64>> {
        if let Some(name) = self.counters.iter().find(|c| self.read_only.contains(c)) {
            return Err(StoreError::validation(
                http::StatusCode::BAD_REQUEST,
                format!("counter '{}' is both advancing and read-only", name),
            ));
        }
        self.actor
            .call(Request::IncrementingId(IncrementingIdRequest {
                schema: self.schema.clone(),
                id: self.id.clone(),
                counters: self.counters.clone(),
                read_only: self.read_only.clone(),
            }))
            .await?
            .into_counters()
    }
}

impl Actor {
    pub fn rate_limit(&self, key: impl Into<String>, limit: u32, window: Duration) -> RateLimiter {
        RateLimiter {
            actor: self.clone(),
            key: key.into(),
            limit,
            window,
            tracked: false,
        }
    }

    /// Rate limit whose triggers are also recorded per operation.
    pub fn tracked_rate_limit(&self, key: impl Into<String>, limit: u32, window: Duration) -> RateLimiter {
        RateLimiter {
            tracked: true,
            ..self.rate_limit(key, limit, window)
        }
    }

    /// Issues the next sequence id for `key`.
    pub async fn squid(&self, key: &str) -> Result<SquidIssued> {
        self.call(Request::Squid { key: key.to_string() })
            .await?
            .into_squid()
    }

    /// Returns the squid previously issued with `squat`.
    pub async fn squid_retrieve(&self, key: &str, squat: &Squat) -> Result<u32> {
        let issued = self
            .call(Request::SquidRetrieve {
                key: key.to_string(),
                squat: squat.clone(),
            })
            .await?
            .into_squid()?;
        Ok(issued.squid)
    }

    pub fn incrementing_ids<E: Entity>(&self, id: &EntityId, counters: &[&str]) -> IncrementingIds {
        IncrementingIds {
            actor: self.clone(),
            schema: E::schema_key(),
            id: id.clone(),
            counters: counters.iter().map(|c| c.to_string()).collect(),
            read_only: Vec::new(),
        }
    }
}
