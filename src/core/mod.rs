pub mod error;
pub mod types;
pub mod value;

pub use error::{ErrorKind, FieldError, IMMUTABLE_UPDATE_MESSAGE, Result, StoreError};
pub use types::{EntityId, EntityState, PropertySet, StateFilter, join_path, path_within};
pub use value::{Timestamp, Value, same_second};
