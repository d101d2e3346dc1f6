use chrono::{DateTime, Duration, Utc};

use crate::core::{Result, StoreError};
use crate::transport::proto::GdprToken;
use crate::transport::Request;

use super::Actor;

/// Anonymized data stays recoverable for at most this many days.
pub const RECOVERY_WINDOW_DAYS: i64 = 7;

/// True when `deadline` lies after `now` and no more than the recovery
/// window ahead of it.
pub fn within_recovery_window(deadline: &DateTime<Utc>, now: &DateTime<Utc>) -> bool {
    *deadline > *now && *deadline <= *now + Duration::days(RECOVERY_WINDOW_DAYS)
}

impl Actor {
    /// Issues a PII token for `reference` in `region`.
    pub async fn new_gdpr_token(&self, reference: &str, region: &str) -> Result<GdprToken> {
        self.call(Request::GdprToken {
            reference: reference.to_string(),
            region: region.to_string(),
        })
        .await?
        .into_gdpr_token()
    }

    /// Anonymizes PII written under the token's reference and returns the
    /// deadline until which the data can be recovered.
    pub async fn anonymize(&self, token: &GdprToken) -> Result<DateTime<Utc>> {
        let deadline = self
            .call(Request::Anonymize {
                reference: token.reference.clone(),
                token: token.token.clone(),
            })
            .await?
            .into_anonymized()?
            .to_datetime();
        if deadline <= Utc::now() {
            return Err(StoreError::conflict(format!(
                "anonymize returned a recovery deadline in the past: {}",
                deadline
            )));
        }
        Ok(deadline)
    }

    /// Restores plaintext and removes the recovery deadline.
    pub async fn anonymize_rollback(&self, token: &GdprToken) -> Result<()> {
        self.call(Request::AnonymizeRollback {
            reference: token.reference.clone(),
            token: token.token.clone(),
        })
        .await?
        .into_ack()
    }
}
