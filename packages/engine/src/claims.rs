//! Claim overrides
//!
//! A claim is a citizen-supplied value for one field of one law, e.g. a
//! corrected income. The claim lifecycle (submission, review, objection) lives
//! outside the engine; the engine only needs the lookup contract in
//! [`ClaimProvider`]. Claims are consulted before any other named lookup when
//! the evaluation has a `BSN` parameter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Value;

/// Review status of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    Pending,
    Approved,
    Rejected,
}

/// Which claims an evaluation should see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimMode {
    /// Only approved claims apply
    #[default]
    ApprovedOnly,
    /// Approved and pending claims apply (e.g. for a what-if preview)
    IncludePending,
}

impl ClaimMode {
    /// Whether a claim with this status is visible in this mode.
    pub fn admits(self, status: ClaimStatus) -> bool {
        match status {
            ClaimStatus::Approved => true,
            ClaimStatus::Pending => self == ClaimMode::IncludePending,
            ClaimStatus::Rejected => false,
        }
    }
}

/// A claimed value for `(bsn, service, law, key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub bsn: String,
    pub service: String,
    pub law: String,
    /// Field name the claim overrides
    pub key: String,
    pub new_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    pub status: ClaimStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Lookup contract for claim stores.
pub trait ClaimProvider: Send + Sync {
    /// Claims visible under `mode` for one subject and law, keyed by field.
    fn claims_for(
        &self,
        bsn: &str,
        service: &str,
        law: &str,
        mode: ClaimMode,
    ) -> BTreeMap<String, Claim>;
}

/// Claim store backed by a list. A later claim for the same field replaces
/// an earlier one.
#[derive(Debug, Clone, Default)]
pub struct InMemoryClaims {
    claims: Vec<Claim>,
}

impl InMemoryClaims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, claim: Claim) {
        self.claims.push(claim);
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

impl FromIterator<Claim> for InMemoryClaims {
    fn from_iter<I: IntoIterator<Item = Claim>>(iter: I) -> Self {
        Self {
            claims: iter.into_iter().collect(),
        }
    }
}

impl ClaimProvider for InMemoryClaims {
    fn claims_for(
        &self,
        bsn: &str,
        service: &str,
        law: &str,
        mode: ClaimMode,
    ) -> BTreeMap<String, Claim> {
        self.claims
            .iter()
            .filter(|c| c.bsn == bsn && c.service == service && c.law == law)
            .filter(|c| mode.admits(c.status))
            .map(|c| (c.key.clone(), c.clone()))
            .collect()
    }
}
