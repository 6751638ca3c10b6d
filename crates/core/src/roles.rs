//! The role catalogue.
//!
//! These names must match the `CHECK` constraint on `users.role` in
//! `20261001000001_create_users.sql`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const ROLE_ADMIN: &str = "ADMIN";
pub const ROLE_CONTENT_ADMIN: &str = "CONTENT_ADMIN";
pub const ROLE_BOOK_MANAGER: &str = "BOOK_MANAGER";
pub const ROLE_STORY_MANAGER: &str = "STORY_MANAGER";
pub const ROLE_PROGRAM_LEAD: &str = "PROGRAM_LEAD";
pub const ROLE_TEACHER: &str = "TEACHER";
pub const ROLE_INSTITUTION: &str = "INSTITUTION";
pub const ROLE_VOLUNTEER: &str = "VOLUNTEER";
pub const ROLE_WRITER: &str = "WRITER";
pub const ROLE_PUBLISHER: &str = "PUBLISHER";
pub const ROLE_EDITOR: &str = "EDITOR";
pub const ROLE_LEARNER: &str = "LEARNER";
pub const ROLE_CUSTOMER: &str = "CUSTOMER";

/// Every role a user account may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    ContentAdmin,
    BookManager,
    StoryManager,
    ProgramLead,
    Teacher,
    Institution,
    Volunteer,
    Writer,
    Publisher,
    Editor,
    Learner,
    Customer,
}

impl Role {
    pub const ALL: [Role; 13] = [
        Role::Admin,
        Role::ContentAdmin,
        Role::BookManager,
        Role::StoryManager,
        Role::ProgramLead,
        Role::Teacher,
        Role::Institution,
        Role::Volunteer,
        Role::Writer,
        Role::Publisher,
        Role::Editor,
        Role::Learner,
        Role::Customer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => ROLE_ADMIN,
            Role::ContentAdmin => ROLE_CONTENT_ADMIN,
            Role::BookManager => ROLE_BOOK_MANAGER,
            Role::StoryManager => ROLE_STORY_MANAGER,
            Role::ProgramLead => ROLE_PROGRAM_LEAD,
            Role::Teacher => ROLE_TEACHER,
            Role::Institution => ROLE_INSTITUTION,
            Role::Volunteer => ROLE_VOLUNTEER,
            Role::Writer => ROLE_WRITER,
            Role::Publisher => ROLE_PUBLISHER,
            Role::Editor => ROLE_EDITOR,
            Role::Learner => ROLE_LEARNER,
            Role::Customer => ROLE_CUSTOMER,
        }
    }

    /// Parse a stored role name. Matching is exact.
    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| CoreError::InvalidRole(s.to_string()))
    }

    /// Parse a role supplied by an operator.
    ///
    /// Missing or blank input is rejected, as is anything outside the
    /// catalogue. Surrounding whitespace and letter case are ignored.
    pub fn parse_input(raw: Option<&str>) -> Result<Self, CoreError> {
        let trimmed = raw.map(str::trim).unwrap_or_default();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidRole(String::new()));
        }
        Self::from_str_value(&trimmed.to_ascii_uppercase())
            .map_err(|_| CoreError::InvalidRole(trimmed.to_string()))
    }

    /// The single privileged role guarded by the last-admin invariant.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// The role a v1 account is moved to by the v2 migration, if any.
    pub fn v2_target(&self) -> Option<Role> {
        match self {
            Role::Learner => Some(Role::Customer),
            _ => None,
        }
    }

    pub fn valid_names() -> Vec<&'static str> {
        Self::ALL.iter().map(Role::as_str).collect()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_value(s)
    }
}

/// Whether a change between two roles touches the privileged role.
pub fn is_sensitive_change(from: Role, to: Role) -> bool {
    from != to && (from.is_privileged() || to.is_privileged())
}
