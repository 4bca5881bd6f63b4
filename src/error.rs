use std::collections::TryReserveError;

use thiserror::Error;

/// Errors surfaced by fallible [`StrMap`](crate::StrMap) operations.
///
/// Absent keys are not errors: lookups and removals report them as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrMapError {
    /// The node arena could not grow. The map is left unchanged.
    #[error("node allocation failed: {0}")]
    Alloc(#[from] TryReserveError),

    /// [`StrMap::insert_new`](crate::StrMap::insert_new) found the key already present.
    #[error("key already exists")]
    KeyExists,
}
