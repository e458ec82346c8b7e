use super::schema::Database;
use super::store::TreeStore;
use super::types::{StoreError, StoredTree};

impl TreeStore for Database {
    async fn load_tree(&self, user_id: &str) -> Result<StoredTree, StoreError> {
        let row: Option<(Vec<u8>, i64)> =
            sqlx::query_as("SELECT tree, version FROM user_trees WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;

        Ok(row
            .map(|(tree, version)| StoredTree { tree, version })
            .unwrap_or_default())
    }

    async fn save_tree_if_version(
        &self,
        user_id: &str,
        tree: &[u8],
        expected: i64,
    ) -> Result<bool, StoreError> {
        // Version 0 means "no row yet": only the first inserter wins
        let result = (if expected == 0 {
            sqlx::query(
                "INSERT INTO user_trees (user_id, tree, version) VALUES (?, ?, 1)
                 ON CONFLICT(user_id) DO NOTHING",
            )
            .bind(user_id)
            .bind(tree)
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                "UPDATE user_trees SET tree = ?, version = version + 1
                 WHERE user_id = ? AND version = ?",
            )
            .bind(tree)
            .bind(user_id)
            .bind(expected)
            .execute(&self.pool)
            .await
        })
        .map_err(StoreError::from_sqlx)?;

        let saved = result.rows_affected() == 1;
        if !saved {
            tracing::debug!(
                user = %user_id,
                expected = expected,
                "Subscription tree changed since it was loaded"
            );
        }
        Ok(saved)
    }
}

/// Unconditional writes, for seeding tests. The application only writes
/// through [`TreeStore::save_tree_if_version`].
#[cfg(test)]
impl Database {
    pub(crate) async fn save_tree(&self, user_id: &str, tree: &[u8]) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_trees (user_id, tree, version)
            VALUES (?, ?, 1)
            ON CONFLICT(user_id) DO UPDATE SET
                tree = excluded.tree,
                version = user_trees.version + 1
        "#,
        )
        .bind(user_id)
        .bind(tree)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }
}
