//! The conformance suite, in execution order. Several requirements share
//! server-side schema state, so the order is part of the contract.

pub mod counters;
pub mod data_types;
pub mod documents;
pub mod fixtures;
pub mod integrity;
pub mod lifecycle;
pub mod person;
pub mod privacy;
pub mod queries;
pub mod records;
pub mod storage;
pub mod streams;

use std::fmt::Debug;

use anyhow::bail;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::connection::Connection;
use crate::core::{ErrorKind, StoreError};
use crate::runner::Requirement;

pub fn all() -> Vec<Box<dyn Requirement>> {
    vec![
        Box::new(person::PersonRoundTrip),
        Box::new(person::NestedPartialUpdate),
        Box::new(integrity::ImmutableTransaction),
        Box::new(integrity::PrimaryKey),
        Box::new(data_types::DataTypesRoundTrip),
        Box::new(queries::LookupsAndLists),
        Box::new(queries::StateFilters),
        Box::new(queries::Descendants),
        Box::new(records::LabelsAndRelationships),
        Box::new(documents::Documents),
        Box::new(records::EventsAndLogs),
        Box::new(storage::AkvAndDynamicProperties),
        Box::new(storage::TimeSeries),
        Box::new(counters::Squid),
        Box::new(counters::IncrementingIds),
        Box::new(counters::RateLimits),
        Box::new(privacy::Gdpr),
        Box::new(privacy::SharedViews),
        Box::new(streams::TaskQueue),
        Box::new(streams::EventStream),
        Box::new(lifecycle::Destroy),
    ]
}

/// Value unique to this run, so repeated runs against one store do not
/// collide on unique or primary properties.
pub(crate) fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

/// First 12 hex chars of SHA-256 over "first last".
pub fn name_hash(first: &str, last: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(format!("{} {}", first, last).as_bytes()));
    digest[..12].to_string()
}

/// Second tenant on the same transport, used for cross-tenant checks.
pub(crate) fn peer_connection(connection: &Connection) -> Connection {
    let auth = connection.authorization();
    connection.tenant(&auth.vendor, &format!("{}-peer", auth.app), &auth.access_token)
}

/// The error of an operation that was expected to fail.
pub(crate) fn expect_failure<T: Debug>(outcome: crate::Result<T>, what: &str) -> anyhow::Result<StoreError> {
    match outcome {
        Ok(value) => bail!("{} unexpectedly succeeded: {:?}", what, value),
        Err(err) => Ok(err),
    }
}

pub(crate) fn expect_kind<T: Debug>(outcome: crate::Result<T>, kind: ErrorKind, what: &str) -> anyhow::Result<StoreError> {
    let err = expect_failure(outcome, what)?;
    if err.kind() != kind {
        bail!("{}: expected {:?}, got {}", what, kind, err);
    }
    Ok(err)
}
