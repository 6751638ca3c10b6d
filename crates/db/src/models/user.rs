use roleshift_core::roles::Role;
use roleshift_core::types::{DbId, Timestamp};
use roleshift_core::user::{RelatedSummary, StructuredField, UserAggregate};
use sqlx::FromRow;

use crate::store::StoreError;

/// A `users` row joined with its related-data aggregates.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: DbId,
    pub email: String,
    pub name: Option<String>,
    pub role: String,
    pub subscription_status: Option<String>,
    pub preferences: Option<String>,
    pub profile: Option<String>,
    pub created_at: Timestamp,
    pub last_login_at: Option<Timestamp>,
    pub version: i64,
    pub orders_count: i64,
    pub total_order_value_cents: i64,
    pub donations_count: i64,
    pub total_donation_cents: i64,
    pub library_items: i64,
    pub bookmarks: i64,
}

impl UserRow {
    pub fn into_aggregate(self) -> Result<UserAggregate, StoreError> {
        let role = Role::from_str_value(&self.role)
            .map_err(|_| StoreError::Decode(format!("user {} has unknown role '{}'", self.id, self.role)))?;
        Ok(UserAggregate {
            id: self.id,
            email: self.email,
            name: self.name,
            role,
            subscription_status: self.subscription_status,
            preferences: StructuredField::from_raw(self.preferences.as_deref()),
            profile: StructuredField::from_raw(self.profile.as_deref()),
            related: RelatedSummary {
                orders_count: self.orders_count,
                total_order_value_cents: self.total_order_value_cents,
                donations_count: self.donations_count,
                total_donation_cents: self.total_donation_cents,
                library_items: self.library_items,
                bookmarks: self.bookmarks,
            },
            created_at: self.created_at,
            last_login_at: self.last_login_at,
            version: self.version,
        })
    }
}
