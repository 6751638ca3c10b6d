//! The user aggregate: a user row plus the related data a role migration
//! must carry across unchanged.
//!
//! Structured columns (`preferences`, `profile`) are stored as raw JSON text
//! so that malformed values survive a load and can be detected, repaired, or
//! restored byte-for-byte from a snapshot.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::roles::Role;
use crate::types::{DbId, Timestamp};

/// Name assigned when repairing a user whose display name is missing.
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous User";

pub const PREFERENCES_SCHEMA_VERSION: u32 = 1;
pub const PROFILE_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Versioned structured fields
// ---------------------------------------------------------------------------

/// A structured column whose shape carries an explicit schema version.
pub trait Versioned: Default {
    const SCHEMA_VERSION: u32;

    fn schema_version(&self) -> u32;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    #[serde(default = "enabled")]
    pub email: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub newsletter: bool,
}

fn enabled() -> bool {
    true
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email: true,
            push: false,
            newsletter: false,
        }
    }
}

/// User interface and notification preferences.
///
/// `version` has no default, so `{}` is not a valid preferences document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub version: u32,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default)]
    pub notifications: NotificationPreferences,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_theme() -> String {
    "light".to_string()
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            version: PREFERENCES_SCHEMA_VERSION,
            language: default_language(),
            theme: default_theme(),
            notifications: NotificationPreferences::default(),
        }
    }
}

impl Versioned for Preferences {
    const SCHEMA_VERSION: u32 = PREFERENCES_SCHEMA_VERSION;

    fn schema_version(&self) -> u32 {
        self.version
    }
}

/// Optional profile details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub version: u32,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            version: PROFILE_SCHEMA_VERSION,
            bio: None,
            country: None,
            timezone: None,
        }
    }
}

impl Versioned for Profile {
    const SCHEMA_VERSION: u32 = PROFILE_SCHEMA_VERSION;

    fn schema_version(&self) -> u32 {
        self.version
    }
}

/// A structured column as loaded: either a typed value or the raw text that
/// failed to parse (`None` when the column was NULL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum StructuredField<T> {
    Valid(T),
    Malformed(Option<String>),
}

impl<T> StructuredField<T>
where
    T: Versioned + Serialize + DeserializeOwned,
{
    /// Parse a raw column value.
    ///
    /// Anything that is not a JSON document of the expected shape and
    /// schema version is kept verbatim as `Malformed`.
    pub fn from_raw(raw: Option<&str>) -> Self {
        let Some(text) = raw else {
            return Self::Malformed(None);
        };
        match serde_json::from_str::<T>(text) {
            Ok(value) if value.schema_version() == T::SCHEMA_VERSION => Self::Valid(value),
            _ => Self::Malformed(Some(text.to_string())),
        }
    }

    /// The text to persist for this field.
    pub fn to_raw(&self) -> Option<String> {
        match self {
            Self::Valid(value) => serde_json::to_string(value).ok(),
            Self::Malformed(raw) => raw.clone(),
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }

    pub fn valid(&self) -> Option<&T> {
        match self {
            Self::Valid(value) => Some(value),
            Self::Malformed(_) => None,
        }
    }

    /// Replace the field with the schema default.
    pub fn reset(&mut self) {
        *self = Self::Valid(T::default());
    }
}

impl<T: Default> Default for StructuredField<T> {
    fn default() -> Self {
        Self::Valid(T::default())
    }
}

// ---------------------------------------------------------------------------
// Related data summary
// ---------------------------------------------------------------------------

/// Aggregates over the rows owned by a user in other tables.
///
/// Every value is an order-independent aggregate so the summary is stable
/// regardless of how the related rows are returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedSummary {
    pub orders_count: i64,
    pub total_order_value_cents: i64,
    pub donations_count: i64,
    pub total_donation_cents: i64,
    pub library_items: i64,
    pub bookmarks: i64,
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAggregate {
    pub id: DbId,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
    pub subscription_status: Option<String>,
    pub preferences: StructuredField<Preferences>,
    pub profile: StructuredField<Profile>,
    pub related: RelatedSummary,
    pub created_at: Timestamp,
    pub last_login_at: Option<Timestamp>,
    /// Bumped by exactly one on every committed change.
    pub version: i64,
}

impl UserAggregate {
    /// Display name, or the default used for accounts without one.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => DEFAULT_DISPLAY_NAME,
        }
    }
}
