pub mod audit;
pub mod checksum;
pub mod error;
pub mod governor;
pub mod hashing;
pub mod integrity;
pub mod migration;
pub mod progress;
pub mod roles;
pub mod snapshot;
pub mod transition;
pub mod types;
pub mod user;

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{Duration, Utc};

    use crate::roles::Role;
    use crate::types::DbId;
    use crate::user::{Preferences, Profile, RelatedSummary, StructuredField, UserAggregate};

    pub fn sample_user(id: DbId, role: Role) -> UserAggregate {
        let created_at = Utc::now() - Duration::days(30);
        UserAggregate {
            id,
            email: format!("user{id}@example.com"),
            name: Some(format!("User {id}")),
            role,
            subscription_status: Some("active".into()),
            preferences: StructuredField::Valid(Preferences::default()),
            profile: StructuredField::Valid(Profile::default()),
            related: RelatedSummary {
                orders_count: 2,
                total_order_value_cents: 4_500,
                donations_count: 1,
                total_donation_cents: 1_000,
                library_items: 3,
                bookmarks: 1,
            },
            created_at,
            last_login_at: Some(created_at + Duration::days(1)),
            version: 1,
        }
    }
}
