//! Repository for the tables holding user-owned rows: `orders`,
//! `donations`, `library_items`, and `bookmarks`.

use sqlx::PgExecutor;

use crate::store::RelatedRow;

pub struct RelatedRepo;

impl RelatedRepo {
    pub async fn insert<'e, E: PgExecutor<'e>>(executor: E, row: &RelatedRow) -> Result<(), sqlx::Error> {
        let query = match row {
            RelatedRow::Order { user_id, amount_cents } => {
                sqlx::query("INSERT INTO orders (user_id, amount_cents) VALUES ($1, $2)")
                    .bind(*user_id)
                    .bind(*amount_cents)
            }
            RelatedRow::Donation { user_id, amount_cents } => {
                sqlx::query("INSERT INTO donations (user_id, amount_cents) VALUES ($1, $2)")
                    .bind(*user_id)
                    .bind(*amount_cents)
            }
            RelatedRow::LibraryItem { user_id, book_ref } => {
                sqlx::query("INSERT INTO library_items (user_id, book_ref) VALUES ($1, $2)")
                    .bind(*user_id)
                    .bind(book_ref.as_str())
            }
            RelatedRow::Bookmark { user_id, story_ref } => {
                sqlx::query("INSERT INTO bookmarks (user_id, story_ref) VALUES ($1, $2)")
                    .bind(*user_id)
                    .bind(story_ref.as_str())
            }
        };
        query.execute(executor).await?;
        Ok(())
    }

    /// Count rows in `table` whose owner no longer exists.
    ///
    /// `table` must be one of the four related tables; it is never taken from
    /// user input.
    pub async fn count_orphans<'e, E: PgExecutor<'e>>(executor: E, table: &'static str) -> Result<i64, sqlx::Error> {
        let query = format!(
            "SELECT COUNT(*)::BIGINT FROM {table} r \
             LEFT JOIN users u ON u.id = r.user_id \
             WHERE u.id IS NULL"
        );
        sqlx::query_scalar::<_, i64>(&query).fetch_one(executor).await
    }
}
