//! Role assignment audit trail: entry types, the integrity hash chain, query
//! filtering, CSV export, and role-history reconstruction.
//!
//! This module lives in `core` so the store implementations, the engine,
//! and the API all agree on the canonical form of an entry.

use chrono::{SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hashing;
use crate::types::{DbId, OperationId, Timestamp};

// ---------------------------------------------------------------------------
// Action and category constants
// ---------------------------------------------------------------------------

pub mod action_types {
    pub const ROLE_CHANGE: &str = "role_change";
    pub const ROLE_CHANGE_REJECTED: &str = "role_change_rejected";
}

pub mod log_categories {
    pub const ROLE_ASSIGNMENT: &str = "role_assignment";
}

/// Rejection code recorded when a user already holds the requested role.
pub const REJECTION_ALREADY_ASSIGNED: &str = "already_assigned";
/// The user already holds a role that needs no v2 migration.
pub const REJECTION_ALREADY_COMPATIBLE: &str = "already_compatible";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    RoleChange,
    RoleChangeRejected,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleChange => action_types::ROLE_CHANGE,
            Self::RoleChangeRejected => action_types::ROLE_CHANGE_REJECTED,
        }
    }

    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        match s {
            action_types::ROLE_CHANGE => Ok(Self::RoleChange),
            action_types::ROLE_CHANGE_REJECTED => Ok(Self::RoleChangeRejected),
            _ => Err(CoreError::Validation(format!("Unknown audit action '{s}'"))),
        }
    }

    pub fn category(&self) -> &'static str {
        log_categories::ROLE_ASSIGNMENT
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// An audit entry about to be appended. The store assigns `id` and chains
/// `integrity_hash`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAuditEntry {
    pub operation_id: Option<OperationId>,
    pub bulk_operation_id: Option<OperationId>,
    pub rollback_of: Option<OperationId>,
    pub target_user_id: Option<DbId>,
    pub target_email: Option<String>,
    pub action: AuditAction,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub reason: Option<String>,
    pub rejection_code: Option<String>,
    pub performed_by: DbId,
    pub ip_address: Option<String>,
    pub timestamp: Timestamp,
}

impl NewAuditEntry {
    /// A successful role change.
    pub fn change(
        target_user_id: DbId,
        target_email: &str,
        old_value: &str,
        new_value: &str,
        performed_by: DbId,
    ) -> Self {
        Self {
            operation_id: None,
            bulk_operation_id: None,
            rollback_of: None,
            target_user_id: Some(target_user_id),
            target_email: Some(target_email.to_string()),
            action: AuditAction::RoleChange,
            old_value: Some(old_value.to_string()),
            new_value: Some(new_value.to_string()),
            reason: None,
            rejection_code: None,
            performed_by,
            ip_address: None,
            timestamp: entry_timestamp(Utc::now()),
        }
    }

    /// A refused role change. `rejection_code` is the error code or a
    /// rejection constant such as [`REJECTION_ALREADY_ASSIGNED`].
    pub fn rejection(
        target_user_id: Option<DbId>,
        target_email: Option<&str>,
        old_value: Option<&str>,
        requested_value: Option<&str>,
        rejection_code: &str,
        performed_by: DbId,
    ) -> Self {
        Self {
            operation_id: None,
            bulk_operation_id: None,
            rollback_of: None,
            target_user_id,
            target_email: target_email.map(str::to_string),
            action: AuditAction::RoleChangeRejected,
            old_value: old_value.map(str::to_string),
            new_value: requested_value.map(str::to_string),
            reason: None,
            rejection_code: Some(rejection_code.to_string()),
            performed_by,
            ip_address: None,
            timestamp: entry_timestamp(Utc::now()),
        }
    }

    pub fn with_operation(mut self, operation_id: OperationId, bulk_operation_id: Option<OperationId>) -> Self {
        self.operation_id = Some(operation_id);
        self.bulk_operation_id = bulk_operation_id;
        self
    }

    pub fn with_reason(mut self, reason: Option<&str>) -> Self {
        self.reason = reason.map(str::to_string);
        self
    }

    pub fn with_ip(mut self, ip: Option<&str>) -> Self {
        self.ip_address = ip.map(str::to_string);
        self
    }

    pub fn with_rollback_of(mut self, operation_id: OperationId) -> Self {
        self.rollback_of = Some(operation_id);
        self
    }

    /// Attach the chain hash and id assigned by the store.
    pub fn into_entry(self, id: DbId, integrity_hash: String) -> AuditEntry {
        AuditEntry {
            id,
            operation_id: self.operation_id,
            bulk_operation_id: self.bulk_operation_id,
            rollback_of: self.rollback_of,
            target_user_id: self.target_user_id,
            target_email: self.target_email,
            action: self.action,
            old_value: self.old_value,
            new_value: self.new_value,
            reason: self.reason,
            rejection_code: self.rejection_code,
            performed_by: self.performed_by,
            ip_address: self.ip_address,
            timestamp: self.timestamp,
            integrity_hash,
        }
    }
}

/// An appended, immutable audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: DbId,
    pub operation_id: Option<OperationId>,
    pub bulk_operation_id: Option<OperationId>,
    pub rollback_of: Option<OperationId>,
    pub target_user_id: Option<DbId>,
    pub target_email: Option<String>,
    pub action: AuditAction,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub reason: Option<String>,
    pub rejection_code: Option<String>,
    pub performed_by: DbId,
    pub ip_address: Option<String>,
    pub timestamp: Timestamp,
    pub integrity_hash: String,
}

/// Truncate to the microsecond precision PostgreSQL stores, so a hash
/// computed before insert matches one recomputed after a read.
pub fn entry_timestamp(now: Timestamp) -> Timestamp {
    now.trunc_subsecs(6)
}

// ---------------------------------------------------------------------------
// Integrity hash chain
// ---------------------------------------------------------------------------

/// Seed used in place of a previous hash for the first entry.
const CHAIN_SEED: &str = "ROLE_AUDIT_CHAIN_SEED_V1";

/// Canonical string form of an entry's content.
pub fn canonical_entry_data(entry: &NewAuditEntry) -> String {
    fn opt<T: ToString>(v: &Option<T>) -> String {
        v.as_ref().map(ToString::to_string).unwrap_or_default()
    }
    [
        entry.timestamp.to_rfc3339(),
        entry.action.as_str().to_string(),
        opt(&entry.target_user_id),
        opt(&entry.target_email),
        opt(&entry.old_value),
        opt(&entry.new_value),
        opt(&entry.reason),
        opt(&entry.rejection_code),
        entry.performed_by.to_string(),
        opt(&entry.ip_address),
        opt(&entry.operation_id),
        opt(&entry.bulk_operation_id),
        opt(&entry.rollback_of),
    ]
    .join("\u{1f}")
}

/// Compute the SHA-256 chain hash for an entry.
///
/// `prev_hash` is the hash of the previous entry, or `None` for the first
/// entry in the chain.
pub fn compute_integrity_hash(prev_hash: Option<&str>, entry_data: &str) -> String {
    let prev = prev_hash.unwrap_or(CHAIN_SEED);
    hashing::sha256_hex_parts(&[prev.as_bytes(), entry_data.as_bytes()])
}

impl AuditEntry {
    fn as_new(&self) -> NewAuditEntry {
        NewAuditEntry {
            operation_id: self.operation_id,
            bulk_operation_id: self.bulk_operation_id,
            rollback_of: self.rollback_of,
            target_user_id: self.target_user_id,
            target_email: self.target_email.clone(),
            action: self.action,
            old_value: self.old_value.clone(),
            new_value: self.new_value.clone(),
            reason: self.reason.clone(),
            rejection_code: self.rejection_code.clone(),
            performed_by: self.performed_by,
            ip_address: self.ip_address.clone(),
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub verified_entries: usize,
    pub chain_valid: bool,
    /// Id of the first entry whose hash does not match.
    pub first_break_at: Option<DbId>,
}

/// Recompute the chain over entries in append order.
pub fn verify_chain(entries: &[AuditEntry]) -> ChainVerification {
    let mut prev: Option<&str> = None;
    for (i, entry) in entries.iter().enumerate() {
        let expected = compute_integrity_hash(prev, &canonical_entry_data(&entry.as_new()));
        if expected != entry.integrity_hash {
            return ChainVerification {
                verified_entries: i,
                chain_valid: false,
                first_break_at: Some(entry.id),
            };
        }
        prev = Some(&entry.integrity_hash);
    }
    ChainVerification {
        verified_entries: entries.len(),
        chain_valid: true,
        first_break_at: None,
    }
}

// ---------------------------------------------------------------------------
// Query filter
// ---------------------------------------------------------------------------

pub const DEFAULT_QUERY_LIMIT: i64 = 100;
pub const MAX_QUERY_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AuditQuery {
    pub target_user_id: Option<DbId>,
    pub performed_by: Option<DbId>,
    pub action: Option<AuditAction>,
    /// Event category; only `role_assignment` exists today.
    #[serde(rename = "type")]
    pub category: Option<String>,
    pub bulk_operation_id: Option<OperationId>,
    pub operation_id: Option<OperationId>,
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditQuery {
    pub fn for_user(user_id: DbId) -> Self {
        Self {
            target_user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT).clamp(1, MAX_QUERY_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    /// Whether `entry` passes every filter (pagination excluded).
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.target_user_id.map_or(true, |id| entry.target_user_id == Some(id))
            && self.performed_by.map_or(true, |id| entry.performed_by == id)
            && self.action.map_or(true, |a| entry.action == a)
            && self
                .category
                .as_deref()
                .map_or(true, |c| entry.action.category() == c)
            && self
                .bulk_operation_id
                .map_or(true, |id| entry.bulk_operation_id == Some(id))
            && self.operation_id.map_or(true, |id| entry.operation_id == Some(id))
            && self.from.map_or(true, |from| entry.timestamp >= from)
            && self.to.map_or(true, |to| entry.timestamp <= to)
    }
}

// ---------------------------------------------------------------------------
// CSV export
// ---------------------------------------------------------------------------

pub const CSV_HEADER: &str = "id,timestamp,action,target_user_id,target_email,old_value,new_value,reason,rejection_code,performed_by,ip_address,operation_id,bulk_operation_id,integrity_hash";

/// Export file name for a given day, e.g. `role-assignment-audit-2026-10-19.csv`.
pub fn export_filename(now: Timestamp) -> String {
    format!("role-assignment-audit-{}.csv", now.format("%Y-%m-%d"))
}

pub fn to_csv(entries: &[AuditEntry]) -> String {
    let mut csv = String::from(CSV_HEADER);
    csv.push('\n');
    for e in entries {
        let row = [
            e.id.to_string(),
            e.timestamp.to_rfc3339(),
            e.action.as_str().to_string(),
            e.target_user_id.map(|v| v.to_string()).unwrap_or_default(),
            csv_escape(e.target_email.as_deref().unwrap_or("")),
            csv_escape(e.old_value.as_deref().unwrap_or("")),
            csv_escape(e.new_value.as_deref().unwrap_or("")),
            csv_escape(e.reason.as_deref().unwrap_or("")),
            csv_escape(e.rejection_code.as_deref().unwrap_or("")),
            e.performed_by.to_string(),
            csv_escape(e.ip_address.as_deref().unwrap_or("")),
            e.operation_id.map(|v| v.to_string()).unwrap_or_default(),
            e.bulk_operation_id.map(|v| v.to_string()).unwrap_or_default(),
            e.integrity_hash.clone(),
        ];
        csv.push_str(&row.join(","));
        csv.push('\n');
    }
    csv
}

/// Quote a CSV field when it contains a delimiter, quote, or line break.
pub fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// ---------------------------------------------------------------------------
// Role history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleHistoryEntry {
    pub role: String,
    pub assigned_at: Timestamp,
    /// `None` for the role the account was created with.
    pub assigned_by: Option<DbId>,
    pub reason: Option<String>,
    pub operation_id: Option<OperationId>,
}

/// Reconstruct the sequence of roles a user has held from their successful
/// role-change entries. The first element is the role the account started
/// with, dated at account creation.
pub fn role_history(
    created_at: Timestamp,
    current_role: &str,
    entries: &[AuditEntry],
) -> Vec<RoleHistoryEntry> {
    let mut changes: Vec<&AuditEntry> = entries
        .iter()
        .filter(|e| e.action == AuditAction::RoleChange)
        .collect();
    changes.sort_by_key(|e| (e.timestamp, e.id));

    let initial_role = changes
        .first()
        .and_then(|e| e.old_value.clone())
        .unwrap_or_else(|| current_role.to_string());

    let mut history = vec![RoleHistoryEntry {
        role: initial_role,
        assigned_at: created_at,
        assigned_by: None,
        reason: None,
        operation_id: None,
    }];
    history.extend(changes.into_iter().map(|e| RoleHistoryEntry {
        role: e.new_value.clone().unwrap_or_default(),
        assigned_at: e.timestamp,
        assigned_by: Some(e.performed_by),
        reason: e.reason.clone(),
        operation_id: e.operation_id,
    }));
    history
}
