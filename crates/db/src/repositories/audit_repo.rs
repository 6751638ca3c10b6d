//! Repository for the append-only `role_audit_log` table.

use roleshift_core::audit::{
    canonical_entry_data, compute_integrity_hash, AuditEntry, AuditQuery, NewAuditEntry,
};
use roleshift_core::types::{DbId, Timestamp};
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use crate::models::audit::AuditRow;
use crate::store::StoreError;

// ---------------------------------------------------------------------------
// Column lists
// ---------------------------------------------------------------------------

const COLUMNS: &str = "\
    id, operation_id, bulk_operation_id, rollback_of, target_user_id, target_email, \
    action, old_value, new_value, reason, rejection_code, performed_by, ip_address, \
    timestamp, integrity_hash";

const INSERT_COLUMNS: &str = "\
    operation_id, bulk_operation_id, rollback_of, target_user_id, target_email, \
    action, old_value, new_value, reason, rejection_code, performed_by, ip_address, \
    timestamp, integrity_hash";

/// Advisory lock key serializing appends so the hash chain never forks.
const CHAIN_LOCK_KEY: i64 = 0x524f_4c45_4155_4454;

// ---------------------------------------------------------------------------
// RoleAuditRepo
// ---------------------------------------------------------------------------

pub struct RoleAuditRepo;

impl RoleAuditRepo {
    /// Append an entry, chaining its hash to the latest one.
    ///
    /// Must run inside a transaction: the advisory lock taken here is held
    /// until that transaction ends.
    pub async fn append(conn: &mut PgConnection, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(CHAIN_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let prev = Self::find_last_hash(&mut *conn).await?;
        let hash = compute_integrity_hash(prev.as_deref(), &canonical_entry_data(&entry));

        let query = format!(
            "INSERT INTO role_audit_log ({INSERT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, AuditRow>(&query)
            .bind(entry.operation_id)
            .bind(entry.bulk_operation_id)
            .bind(entry.rollback_of)
            .bind(entry.target_user_id)
            .bind(&entry.target_email)
            .bind(entry.action.as_str())
            .bind(&entry.old_value)
            .bind(&entry.new_value)
            .bind(&entry.reason)
            .bind(&entry.rejection_code)
            .bind(entry.performed_by)
            .bind(&entry.ip_address)
            .bind(entry.timestamp)
            .bind(&hash)
            .fetch_one(&mut *conn)
            .await?;
        row.try_into()
    }

    pub async fn find_last_hash<'e, E: PgExecutor<'e>>(executor: E) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT integrity_hash FROM role_audit_log ORDER BY id DESC LIMIT 1")
            .fetch_optional(executor)
            .await
    }

    /// Query with filtering and pagination, newest first.
    pub async fn query<'e, E: PgExecutor<'e>>(executor: E, params: &AuditQuery) -> Result<Vec<AuditRow>, sqlx::Error> {
        let (where_clause, bind_values, bind_idx) = build_audit_filter(params);
        let query = format!(
            "SELECT {COLUMNS} FROM role_audit_log {where_clause} \
             ORDER BY id DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1
        );
        let mut q = sqlx::query_as::<_, AuditRow>(&query);
        for val in &bind_values {
            q = match val {
                BindValue::BigInt(v) => q.bind(*v),
                BindValue::Text(v) => q.bind(v.as_str()),
                BindValue::Uuid(v) => q.bind(*v),
                BindValue::Timestamp(v) => q.bind(*v),
            };
        }
        q.bind(params.effective_limit())
            .bind(params.effective_offset())
            .fetch_all(executor)
            .await
    }

    /// Every entry ordered by id ASC for sequential hash chain checking.
    pub async fn fetch_chain<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<AuditRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM role_audit_log ORDER BY id ASC");
        sqlx::query_as::<_, AuditRow>(&query).fetch_all(executor).await
    }
}

// ---------------------------------------------------------------------------
// Dynamic filter
// ---------------------------------------------------------------------------

enum BindValue {
    BigInt(DbId),
    Text(String),
    Uuid(Uuid),
    Timestamp(Timestamp),
}

/// Build a WHERE clause and bind values from `AuditQuery` filters.
///
/// Returns `(where_clause, bind_values, next_bind_index)`.
fn build_audit_filter(params: &AuditQuery) -> (String, Vec<BindValue>, u32) {
    let mut conditions: Vec<String> = Vec::new();
    let mut bind_idx = 1u32;
    let mut bind_values: Vec<BindValue> = Vec::new();

    let mut push = |column: &str, op: &str, value: BindValue, conditions: &mut Vec<String>| {
        conditions.push(format!("{column} {op} ${bind_idx}"));
        bind_idx += 1;
        bind_values.push(value);
    };

    if let Some(id) = params.target_user_id {
        push("target_user_id", "=", BindValue::BigInt(id), &mut conditions);
    }
    if let Some(id) = params.performed_by {
        push("performed_by", "=", BindValue::BigInt(id), &mut conditions);
    }
    if let Some(action) = params.action {
        push("action", "=", BindValue::Text(action.as_str().to_string()), &mut conditions);
    }
    if let Some(id) = params.bulk_operation_id {
        push("bulk_operation_id", "=", BindValue::Uuid(id), &mut conditions);
    }
    if let Some(id) = params.operation_id {
        push("operation_id", "=", BindValue::Uuid(id), &mut conditions);
    }
    if let Some(from) = params.from {
        push("timestamp", ">=", BindValue::Timestamp(from), &mut conditions);
    }
    if let Some(to) = params.to {
        push("timestamp", "<=", BindValue::Timestamp(to), &mut conditions);
    }
    // Every action belongs to the role-assignment category.
    if let Some(category) = params.category.as_deref() {
        if category != roleshift_core::audit::log_categories::ROLE_ASSIGNMENT {
            conditions.push("FALSE".to_string());
        }
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    (where_clause, bind_values, bind_idx)
}
