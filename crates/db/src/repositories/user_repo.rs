//! Repository for the `users` table.

use roleshift_core::roles::Role;
use roleshift_core::types::DbId;
use roleshift_core::user::UserAggregate;
use sqlx::PgExecutor;

use crate::models::user::UserRow;
use crate::store::NewUser;

/// Aggregate projection: user columns plus related-data summaries.
const SELECT_AGGREGATE: &str = "\
    SELECT u.id, u.email, u.name, u.role, u.subscription_status, u.preferences, u.profile, \
           u.created_at, u.last_login_at, u.version, \
           (SELECT COUNT(*) FROM orders o WHERE o.user_id = u.id)::BIGINT AS orders_count, \
           (SELECT COALESCE(SUM(o.amount_cents), 0) FROM orders o WHERE o.user_id = u.id)::BIGINT \
               AS total_order_value_cents, \
           (SELECT COUNT(*) FROM donations d WHERE d.user_id = u.id)::BIGINT AS donations_count, \
           (SELECT COALESCE(SUM(d.amount_cents), 0) FROM donations d WHERE d.user_id = u.id)::BIGINT \
               AS total_donation_cents, \
           (SELECT COUNT(*) FROM library_items l WHERE l.user_id = u.id)::BIGINT AS library_items, \
           (SELECT COUNT(*) FROM bookmarks b WHERE b.user_id = u.id)::BIGINT AS bookmarks \
    FROM users u";

/// Provides lookups and versioned updates for users.
pub struct UserRepo;

impl UserRepo {
    /// Insert a user at version 1, returning the new id.
    pub async fn insert<'e, E: PgExecutor<'e>>(executor: E, user: &NewUser) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "INSERT INTO users \
                (email, name, role, subscription_status, preferences, profile, created_at, last_login_at) \
             VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, NOW()), $8) \
             RETURNING id",
        )
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.role.as_str())
        .bind(&user.subscription_status)
        .bind(user.preferences.to_raw())
        .bind(user.profile.to_raw())
        .bind(user.created_at)
        .bind(user.last_login_at)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(executor: E, id: DbId) -> Result<Option<UserRow>, sqlx::Error> {
        let query = format!("{SELECT_AGGREGATE} WHERE u.id = $1");
        sqlx::query_as::<_, UserRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Case-insensitive email lookup.
    pub async fn find_by_email<'e, E: PgExecutor<'e>>(
        executor: E,
        email: &str,
    ) -> Result<Option<UserRow>, sqlx::Error> {
        let query = format!("{SELECT_AGGREGATE} WHERE LOWER(u.email) = LOWER($1)");
        sqlx::query_as::<_, UserRow>(&query)
            .bind(email)
            .fetch_optional(executor)
            .await
    }

    pub async fn list<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<UserRow>, sqlx::Error> {
        let query = format!("{SELECT_AGGREGATE} ORDER BY u.id");
        sqlx::query_as::<_, UserRow>(&query).fetch_all(executor).await
    }

    pub async fn list_by_role<'e, E: PgExecutor<'e>>(executor: E, role: Role) -> Result<Vec<UserRow>, sqlx::Error> {
        let query = format!("{SELECT_AGGREGATE} WHERE u.role = $1 ORDER BY u.id");
        sqlx::query_as::<_, UserRow>(&query)
            .bind(role.as_str())
            .fetch_all(executor)
            .await
    }

    pub async fn count_by_role<'e, E: PgExecutor<'e>>(executor: E, role: Role) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*)::BIGINT FROM users WHERE role = $1")
            .bind(role.as_str())
            .fetch_one(executor)
            .await
    }

    /// Lock every row holding `role` until the transaction ends.
    pub async fn lock_role_holders<'e, E: PgExecutor<'e>>(executor: E, role: Role) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>("SELECT id FROM users WHERE role = $1 ORDER BY id FOR UPDATE")
            .bind(role.as_str())
            .fetch_all(executor)
            .await
    }

    /// Compare-and-swap write of the mutable columns.
    ///
    /// Returns `false` when the row is missing or no longer at
    /// `expected_version`; the version is bumped by one on success.
    pub async fn update_versioned<'e, E: PgExecutor<'e>>(
        executor: E,
        state: &UserAggregate,
        expected_version: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET \
                role = $3, name = $4, subscription_status = $5, preferences = $6, profile = $7, \
                version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND version = $2",
        )
        .bind(state.id)
        .bind(expected_version)
        .bind(state.role.as_str())
        .bind(&state.name)
        .bind(&state.subscription_status)
        .bind(state.preferences.to_raw())
        .bind(state.profile.to_raw())
        .execute(executor)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn exists<'e, E: PgExecutor<'e>>(executor: E, id: DbId) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(executor)
            .await
    }

    /// Lower-cased emails held by more than one account.
    pub async fn duplicate_emails<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT LOWER(email) FROM users GROUP BY LOWER(email) HAVING COUNT(*) > 1 ORDER BY 1",
        )
        .fetch_all(executor)
        .await
    }
}
