//! Corruption detection and repair for user aggregates.
//!
//! A scan reports every field that is missing or unparseable. Whether those
//! findings abort the change or get repaired is decided by
//! [`CorruptionMode`].

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::user::{UserAggregate, DEFAULT_DISPLAY_NAME};

// ---------------------------------------------------------------------------
// Issue and fix constants
// ---------------------------------------------------------------------------

/// A required scalar field is NULL or blank.
pub const ISSUE_NULL_VALUE: &str = "null_value";
/// A structured field does not parse as its versioned schema.
pub const ISSUE_INVALID_JSON: &str = "invalid_json";

/// Replace a missing scalar with its documented default.
pub const FIX_SET_DEFAULT: &str = "set_default";
/// Replace a malformed structured field with its schema default.
pub const FIX_RESET_TO_DEFAULT: &str = "reset_to_default";

pub const FIELD_NAME: &str = "name";
pub const FIELD_PREFERENCES: &str = "preferences";
pub const FIELD_PROFILE: &str = "profile";

// ---------------------------------------------------------------------------
// Health status constants
// ---------------------------------------------------------------------------

pub const HEALTH_HEALTHY: &str = "healthy";
pub const HEALTH_WARNING: &str = "warning";
pub const HEALTH_CRITICAL: &str = "critical";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What to do when a scan finds corruption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionMode {
    /// Refuse the change with `CorruptionDetected`.
    #[default]
    Abort,
    /// Repair each finding with its default and record the fix.
    Fix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub field: &'static str,
    pub issue: &'static str,
}

/// A repair applied during a migration, reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFix {
    pub field: String,
    pub issue: String,
    pub fix: String,
}

// ---------------------------------------------------------------------------
// Scan and repair
// ---------------------------------------------------------------------------

/// List every corrupted field on the aggregate.
pub fn scan(user: &UserAggregate) -> Vec<Finding> {
    let mut findings = Vec::new();
    if user.name.as_deref().map(str::trim).unwrap_or_default().is_empty() {
        findings.push(Finding {
            field: FIELD_NAME,
            issue: ISSUE_NULL_VALUE,
        });
    }
    if user.preferences.is_malformed() {
        findings.push(Finding {
            field: FIELD_PREFERENCES,
            issue: ISSUE_INVALID_JSON,
        });
    }
    if user.profile.is_malformed() {
        findings.push(Finding {
            field: FIELD_PROFILE,
            issue: ISSUE_INVALID_JSON,
        });
    }
    findings
}

#[derive(Debug, Clone)]
pub struct IntegrityRepairPolicy {
    pub mode: CorruptionMode,
    pub default_name: String,
}

impl IntegrityRepairPolicy {
    pub fn new(mode: CorruptionMode) -> Self {
        Self {
            mode,
            default_name: DEFAULT_DISPLAY_NAME.to_string(),
        }
    }

    pub fn with_default_name(mut self, name: impl Into<String>) -> Self {
        self.default_name = name.into();
        self
    }

    /// Scan `user` and either repair it in place or fail.
    ///
    /// Returns the fixes applied, empty when the aggregate was clean.
    pub fn apply(&self, user: &mut UserAggregate) -> Result<Vec<DataFix>, CoreError> {
        let findings = scan(user);
        if findings.is_empty() {
            return Ok(Vec::new());
        }
        if self.mode == CorruptionMode::Abort {
            return Err(CoreError::CorruptionDetected {
                user_id: user.id,
                fields: findings.iter().map(|f| f.field.to_string()).collect(),
            });
        }

        let mut fixes = Vec::with_capacity(findings.len());
        for finding in findings {
            let fix = match finding.field {
                FIELD_NAME => {
                    user.name = Some(self.default_name.clone());
                    FIX_SET_DEFAULT
                }
                FIELD_PREFERENCES => {
                    user.preferences.reset();
                    FIX_RESET_TO_DEFAULT
                }
                FIELD_PROFILE => {
                    user.profile.reset();
                    FIX_RESET_TO_DEFAULT
                }
                other => {
                    return Err(CoreError::Internal(format!("No repair defined for field '{other}'")));
                }
            };
            fixes.push(DataFix {
                field: finding.field.to_string(),
                issue: finding.issue.to_string(),
                fix: fix.to_string(),
            });
        }
        Ok(fixes)
    }
}

/// Overall health from corruption and orphan counts.
pub fn assess_health(corrupted_users: usize, orphaned_rows: usize) -> &'static str {
    if orphaned_rows > 0 {
        HEALTH_CRITICAL
    } else if corrupted_users > 0 {
        HEALTH_WARNING
    } else {
        HEALTH_HEALTHY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::sample_user;
    use crate::roles::Role;
    use crate::user::{Preferences, StructuredField};
    use assert_matches::assert_matches;

    fn corrupted() -> UserAggregate {
        let mut user = sample_user(9, Role::Learner);
        user.name = None;
        user.preferences = StructuredField::Malformed(Some("{invalid json".into()));
        user
    }

    #[test]
    fn clean_user_has_no_findings() {
        assert!(scan(&sample_user(1, Role::Learner)).is_empty());
    }

    #[test]
    fn scan_finds_null_name_and_bad_json() {
        let findings = scan(&corrupted());
        assert_eq!(
            findings,
            vec![
                Finding { field: FIELD_NAME, issue: ISSUE_NULL_VALUE },
                Finding { field: FIELD_PREFERENCES, issue: ISSUE_INVALID_JSON },
            ]
        );
    }

    #[test]
    fn abort_mode_refuses() {
        let mut user = corrupted();
        let before = user.clone();
        assert_matches!(
            IntegrityRepairPolicy::new(CorruptionMode::Abort).apply(&mut user),
            Err(CoreError::CorruptionDetected { user_id: 9, fields }) if fields == vec!["name", "preferences"]
        );
        assert_eq!(user, before);
    }

    #[test]
    fn fix_mode_repairs_and_reports() {
        let mut user = corrupted();
        let fixes = IntegrityRepairPolicy::new(CorruptionMode::Fix).apply(&mut user).unwrap();
        assert_eq!(user.name.as_deref(), Some(DEFAULT_DISPLAY_NAME));
        assert_eq!(user.preferences, StructuredField::Valid(Preferences::default()));
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[0].fix, FIX_SET_DEFAULT);
        assert_eq!(fixes[1].fix, FIX_RESET_TO_DEFAULT);
        assert!(scan(&user).is_empty());
    }

    #[test]
    fn custom_default_name() {
        let mut user = corrupted();
        IntegrityRepairPolicy::new(CorruptionMode::Fix)
            .with_default_name("Reader")
            .apply(&mut user)
            .unwrap();
        assert_eq!(user.name.as_deref(), Some("Reader"));
    }

    #[test]
    fn health_assessment() {
        assert_eq!(assess_health(0, 0), HEALTH_HEALTHY);
        assert_eq!(assess_health(2, 0), HEALTH_WARNING);
        assert_eq!(assess_health(0, 1), HEALTH_CRITICAL);
    }
}
