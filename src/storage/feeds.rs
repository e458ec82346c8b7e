use sqlx::QueryBuilder;

use super::schema::Database;
use super::store::FeedStore;
use super::types::{Feed, FeedDbRow, StoreError, Story, StoryDbRow};

impl FeedStore for Database {
    async fn get_feed(&self, url: &str) -> Result<Option<Feed>, StoreError> {
        let row: Option<FeedDbRow> = sqlx::query_as(
            r#"
            SELECT url, title, link, updated, checked, next_update, last_viewed
            FROM feeds
            WHERE url = ?
        "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        row.map(FeedDbRow::into_feed).transpose()
    }

    async fn put_feed(&self, feed: &Feed) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO feeds (url, title, link, updated, checked, next_update, last_viewed)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                link = excluded.link,
                updated = excluded.updated,
                checked = excluded.checked,
                next_update = excluded.next_update,
                last_viewed = excluded.last_viewed
        "#,
        )
        .bind(&feed.url)
        .bind(&feed.title)
        .bind(&feed.link)
        .bind(feed.updated.timestamp())
        .bind(feed.checked.timestamp())
        .bind(feed.next_update.timestamp())
        .bind(feed.last_viewed.timestamp())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    /// Upserts stories in batches inside one transaction.
    ///
    /// An existing story keeps its original `created` time; its other fields
    /// are refreshed. Requires the feed row to exist (foreign key).
    async fn put_stories(&self, feed_url: &str, stories: &[Story]) -> Result<usize, StoreError> {
        if stories.is_empty() {
            return Ok(0);
        }

        const BATCH_SIZE: usize = 50;
        let mut written = 0;
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        for chunk in stories.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO stories (feed_url, id, title, link, summary, published, created) ",
            );

            builder.push_values(chunk, |mut b, story| {
                b.push_bind(feed_url)
                    .push_bind(&story.id)
                    .push_bind(&story.title)
                    .push_bind(&story.link)
                    .push_bind(&story.summary)
                    .push_bind(story.published.timestamp())
                    .push_bind(story.created.timestamp());
            });

            builder.push(
                " ON CONFLICT(feed_url, id) DO UPDATE SET title = excluded.title, \
                 link = excluded.link, summary = excluded.summary, published = excluded.published",
            );

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from_sqlx)?;
            written += result.rows_affected() as usize;
        }

        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(written)
    }
}

impl Database {
    /// All feeds ordered by title, for listings and admin views.
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let rows: Vec<FeedDbRow> = sqlx::query_as(
            r#"
            SELECT url, title, link, updated, checked, next_update, last_viewed
            FROM feeds
            ORDER BY title, url
        "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        rows.into_iter().map(FeedDbRow::into_feed).collect()
    }

    /// Stories of one feed, newest first.
    pub async fn get_stories(&self, feed_url: &str) -> Result<Vec<Story>, StoreError> {
        let rows: Vec<StoryDbRow> = sqlx::query_as(
            r#"
            SELECT feed_url, id, title, link, summary, published, created
            FROM stories
            WHERE feed_url = ?
            ORDER BY published DESC, id
        "#,
        )
        .bind(feed_url)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        rows.into_iter().map(StoryDbRow::into_story).collect()
    }
}
