//! The pull watermark.

use crate::{error::Result, Error, ProductId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position in the remote change history up to which changes have been pulled.
///
/// Changes are ordered by `(stamp, id)` where `stamp` is the change stamp the
/// remote store assigned when the document was last written. The origin
/// cursor (`stamp == 0`, empty id) precedes every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    pub stamp: u64,
    pub id: ProductId,
}

impl SyncCursor {
    pub fn new(stamp: u64, id: impl Into<ProductId>) -> Self {
        Self {
            stamp,
            id: id.into(),
        }
    }

    /// The cursor before any change.
    pub fn origin() -> Self {
        Self::default()
    }

    pub fn is_origin(&self) -> bool {
        *self == Self::origin()
    }

    /// Move to `next` if it lies after the current position.
    ///
    /// Returns whether the cursor moved.
    pub fn advance(&mut self, next: SyncCursor) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }

    /// Encode as an opaque token: `"{stamp}_{id}"`, or `""` at the origin.
    pub fn to_token(&self) -> String {
        if self.is_origin() {
            String::new()
        } else {
            format!("{}_{}", self.stamp, self.id)
        }
    }

    /// Decode a token produced by [`SyncCursor::to_token`].
    pub fn from_token(token: &str) -> Result<Self> {
        if token.is_empty() {
            return Ok(Self::origin());
        }
        let (stamp, id) = token
            .split_once('_')
            .ok_or_else(|| Error::InvalidCursor(token.to_string()))?;
        let stamp = stamp
            .parse()
            .map_err(|_| Error::InvalidCursor(token.to_string()))?;
        Ok(Self::new(stamp, id))
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_origin() {
            write!(f, "origin")
        } else {
            write!(f, "{}@{}", self.id, self.stamp)
        }
    }
}
