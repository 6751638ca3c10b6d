//! Read side of the role audit log: queries, exports, chain verification,
//! and per-user role history.

use std::sync::Arc;

use chrono::Utc;
use roleshift_core::audit::{
    export_filename, role_history, to_csv, verify_chain, AuditEntry, AuditQuery, ChainVerification, RoleHistoryEntry,
    MAX_QUERY_LIMIT,
};
use roleshift_core::error::CoreError;
use roleshift_core::types::DbId;
use roleshift_db::MigrationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(CoreError::Validation(format!(
                "Unsupported export format '{other}'; expected csv or json"
            ))),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Json => "application/json",
        }
    }
}

/// A rendered export, ready to be served as a download.
#[derive(Debug, Clone)]
pub struct AuditExport {
    pub filename: String,
    pub content_type: &'static str,
    pub body: String,
    pub entries: usize,
}

#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn MigrationStore>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn MigrationStore>) -> Self {
        Self { store }
    }

    /// One page of matching entries, newest first.
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, CoreError> {
        Ok(self.store.query_audit(query).await?)
    }

    /// Every matching entry, ignoring the query's pagination.
    pub async fn collect_all(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, CoreError> {
        let mut page = query.clone();
        page.limit = Some(MAX_QUERY_LIMIT);
        page.offset = Some(0);

        let mut all = Vec::new();
        loop {
            let batch = self.store.query_audit(&page).await?;
            let fetched = batch.len() as i64;
            all.extend(batch);
            if fetched < MAX_QUERY_LIMIT {
                return Ok(all);
            }
            page.offset = Some(page.effective_offset() + fetched);
        }
    }

    pub async fn export(&self, query: &AuditQuery, format: ExportFormat) -> Result<AuditExport, CoreError> {
        let entries = self.collect_all(query).await?;
        let now = Utc::now();
        let (filename, body) = match format {
            ExportFormat::Csv => (export_filename(now), to_csv(&entries)),
            ExportFormat::Json => (
                export_filename(now).replace(".csv", ".json"),
                serde_json::to_string_pretty(&entries)
                    .map_err(|e| CoreError::Internal(format!("Failed to serialize audit export: {e}")))?,
            ),
        };
        tracing::info!(entries = entries.len(), filename = %filename, "Audit log exported");
        Ok(AuditExport {
            filename,
            content_type: format.content_type(),
            body,
            entries: entries.len(),
        })
    }

    /// Recompute the hash chain over the whole log.
    pub async fn verify_integrity(&self) -> Result<ChainVerification, CoreError> {
        let chain = self.store.audit_chain().await?;
        let verification = verify_chain(&chain);
        if !verification.chain_valid {
            tracing::error!(
                first_break_at = ?verification.first_break_at,
                verified = verification.verified_entries,
                "Audit hash chain is broken",
            );
        }
        Ok(verification)
    }

    pub async fn role_history(&self, user_id: DbId) -> Result<Vec<RoleHistoryEntry>, CoreError> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| CoreError::not_found("User", user_id))?;
        let entries = self.collect_all(&AuditQuery::for_user(user_id)).await?;
        Ok(role_history(user.created_at, user.role.as_str(), &entries))
    }
}
