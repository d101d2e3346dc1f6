//! Semantic value types used by entity fixtures.

pub mod amount;
pub mod interval;
pub mod misc;
pub mod mixed;
pub mod secure;
pub mod sets;

pub use amount::Amount;
pub use interval::{Interval, IntervalUnit};
pub use misc::{Email, ExternalId, Id, MinMax, PersonName, Phone, Translations};
pub use mixed::{KeyMixed, Mixed};
pub use secure::{SecureString, VerifyString};
pub use sets::{DeltaSet, IntSet, StringSet};
