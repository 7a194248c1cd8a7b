//! Manual-correction log.
//!
//! When a compensating action keeps failing after its retries, the engine
//! writes a [`CorrectionRecord`] here instead of losing the discrepancy.
//! Operators list open records with [`CorrectionLog::pending`] and close them
//! with [`CorrectionLog::resolve`] once the ledger has been fixed by hand.

use crate::error::StoreError;
use crate::types::{CorrectionId, ItemId, OrderId};
use crate::BoxFuture;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What needs correcting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CorrectionKind {
    /// Units that were reserved but never given back.
    ReleaseStock {
        /// Item whose counter is too low
        item_id: ItemId,
        /// Units to add back
        quantity: u32,
    },
    /// Grants of a cancelled order that could not be deleted.
    RevokeGrants,
}

impl CorrectionKind {
    /// Label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ReleaseStock { .. } => "release_stock",
            Self::RevokeGrants => "revoke_grants",
        }
    }
}

impl fmt::Display for CorrectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReleaseStock { item_id, quantity } => {
                write!(f, "release {quantity} of item {item_id}")
            }
            Self::RevokeGrants => f.write_str("revoke access grants"),
        }
    }
}

/// A discrepancy awaiting an operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    /// Record identifier
    pub id: CorrectionId,
    /// What needs correcting
    pub kind: CorrectionKind,
    /// Order involved, if one had been created
    pub order_id: Option<OrderId>,
    /// Last error observed
    pub reason: String,
    /// When the record was written
    pub recorded_at: DateTime<Utc>,
    /// When an operator closed it
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who closed it
    pub resolved_by: Option<String>,
}

impl CorrectionRecord {
    /// A new, unresolved record.
    #[must_use]
    pub fn open(
        id: CorrectionId,
        kind: CorrectionKind,
        order_id: Option<OrderId>,
        reason: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            order_id,
            reason: reason.into(),
            recorded_at,
            resolved_at: None,
            resolved_by: None,
        }
    }

    /// Whether an operator has closed the record.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Append-only store of correction records.
pub trait CorrectionLog: Send + Sync {
    /// Append a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn record(&self, record: CorrectionRecord) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Unresolved records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn pending(&self, limit: usize) -> BoxFuture<'_, Result<Vec<CorrectionRecord>, StoreError>>;

    /// Close a record. Returns `false` if it does not exist or is already
    /// resolved.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn resolve(
        &self,
        id: CorrectionId,
        resolved_by: String,
        resolved_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<bool, StoreError>>;
}
