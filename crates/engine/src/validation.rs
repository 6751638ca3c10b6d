//! Production data validation run before large migrations.

use std::sync::Arc;

use roleshift_core::error::CoreError;
use roleshift_core::integrity::{assess_health, scan};
use roleshift_core::roles::Role;
use roleshift_db::{MigrationStore, ReferentialProbe};
use serde::{Deserialize, Serialize};

pub const CHECK_REFERENTIAL: &str = "referential_integrity";
pub const CHECK_CONSISTENCY: &str = "data_consistency";
pub const CHECK_CONSTRAINTS: &str = "constraints";

/// Which checks to run. All are on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ValidationChecks {
    pub referential_integrity: bool,
    pub data_consistency: bool,
    pub constraints: bool,
}

impl Default for ValidationChecks {
    fn default() -> Self {
        Self {
            referential_integrity: true,
            data_consistency: true,
            constraints: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub name: &'static str,
    pub passed: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductionValidation {
    pub overall_status: bool,
    pub health: &'static str,
    pub checks: Vec<CheckOutcome>,
    pub corrupted_users: usize,
    pub orphaned_rows: i64,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Clone)]
pub struct ProductionValidator {
    store: Arc<dyn MigrationStore>,
}

impl ProductionValidator {
    pub fn new(store: Arc<dyn MigrationStore>) -> Self {
        Self { store }
    }

    pub async fn validate(&self, checks: ValidationChecks) -> Result<ProductionValidation, CoreError> {
        let mut outcomes = Vec::new();
        let mut recommendations = Vec::new();
        let mut corrupted_users = 0;
        let mut orphaned_rows = 0;

        let probe = if checks.referential_integrity || checks.constraints {
            Some(self.store.referential_probe().await?)
        } else {
            None
        };

        if let (true, Some(probe)) = (checks.referential_integrity, &probe) {
            orphaned_rows = probe.orphan_total();
            let issues = orphan_issues(probe);
            if !issues.is_empty() {
                recommendations.push(format!(
                    "Remove or reassign the {orphaned_rows} related rows that reference missing users"
                ));
            }
            outcomes.push(CheckOutcome {
                name: CHECK_REFERENTIAL,
                passed: issues.is_empty(),
                issues,
            });
        }

        if checks.data_consistency {
            let mut issues = Vec::new();
            for user in self.store.list_users().await? {
                let findings = scan(&user);
                if findings.is_empty() {
                    continue;
                }
                corrupted_users += 1;
                let fields: Vec<String> = findings
                    .iter()
                    .map(|f| format!("{} ({})", f.field, f.issue))
                    .collect();
                issues.push(format!("User {} ({}): {}", user.id, user.email, fields.join(", ")));
            }
            if corrupted_users > 0 {
                recommendations.push(format!(
                    "Migrate with handle_corruption=fix to repair {corrupted_users} corrupted users"
                ));
            }
            outcomes.push(CheckOutcome {
                name: CHECK_CONSISTENCY,
                passed: issues.is_empty(),
                issues,
            });
        }

        if let (true, Some(probe)) = (checks.constraints, &probe) {
            let mut issues: Vec<String> = probe
                .duplicate_emails
                .iter()
                .map(|email| format!("Email {email} is used by more than one account"))
                .collect();
            if !issues.is_empty() {
                recommendations.push("Merge or rename accounts that share an email address".to_string());
            }
            if self.store.count_by_role(Role::Admin).await? == 0 {
                issues.push("No user holds the ADMIN role".to_string());
                recommendations.push("Promote at least one user to ADMIN before migrating".to_string());
            }
            outcomes.push(CheckOutcome {
                name: CHECK_CONSTRAINTS,
                passed: issues.is_empty(),
                issues,
            });
        }

        let issues: Vec<String> = outcomes.iter().flat_map(|o| o.issues.clone()).collect();
        let overall_status = outcomes.iter().all(|o| o.passed);
        let health = assess_health(corrupted_users, orphaned_rows.max(0) as usize);

        if overall_status {
            tracing::info!(checks = outcomes.len(), "Production data validation passed");
        } else {
            tracing::warn!(issues = issues.len(), health, "Production data validation found issues");
        }

        Ok(ProductionValidation {
            overall_status,
            health,
            checks: outcomes,
            corrupted_users,
            orphaned_rows,
            issues,
            recommendations,
        })
    }
}

fn orphan_issues(probe: &ReferentialProbe) -> Vec<String> {
    [
        ("orders", probe.orphaned_orders),
        ("donations", probe.orphaned_donations),
        ("library items", probe.orphaned_library_items),
        ("bookmarks", probe.orphaned_bookmarks),
    ]
    .into_iter()
    .filter(|(_, count)| *count > 0)
    .map(|(table, count)| format!("{count} {table} reference missing users"))
    .collect()
}
