use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use wavecast_core::{SelectedRenderers, SelectionStore};

/// SQLite-backed store for the user's renderer selection
#[derive(Clone)]
pub struct SqliteSelectionStore {
    pool: SqlitePool,
}

impl SqliteSelectionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SelectionStore for SqliteSelectionStore {
    async fn get_selected_renderers(&self) -> Result<SelectedRenderers> {
        let rows = sqlx::query("SELECT uuid, name FROM selected_renderer ORDER BY uuid")
            .fetch_all(&self.pool)
            .await?;

        let renderers = rows
            .iter()
            .map(|r| (r.get::<String, _>(0), r.get::<String, _>(1)))
            .collect();

        Ok(renderers)
    }

    async fn set_selected_renderers(&self, renderers: &SelectedRenderers) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM selected_renderer")
            .execute(&mut *tx)
            .await?;

        for (uuid, name) in renderers {
            sqlx::query("INSERT INTO selected_renderer (uuid, name, updated_at) VALUES (?, ?, ?)")
                .bind(uuid)
                .bind(name)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::debug!("Stored {} selected renderer(s)", renderers.len());
        Ok(())
    }

    async fn erase_selected_renderers(&self) -> Result<()> {
        sqlx::query("DELETE FROM selected_renderer")
            .execute(&self.pool)
            .await?;

        tracing::info!("Erased stored renderer selection");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;

    fn selection(entries: &[(&str, &str)]) -> SelectedRenderers {
        entries
            .iter()
            .map(|(uuid, name)| (uuid.to_string(), name.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = SqliteSelectionStore::new(init_memory_db().await.unwrap());
        assert!(store.get_selected_renderers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_replaces_previous_selection() {
        let store = SqliteSelectionStore::new(init_memory_db().await.unwrap());

        store
            .set_selected_renderers(&selection(&[("a", "Kitchen"), ("b", "Office")]))
            .await
            .unwrap();
        store
            .set_selected_renderers(&selection(&[("c", "Garage")]))
            .await
            .unwrap();

        assert_eq!(
            store.get_selected_renderers().await.unwrap(),
            selection(&[("c", "Garage")])
        );
    }

    #[tokio::test]
    async fn test_erase() {
        let store = SqliteSelectionStore::new(init_memory_db().await.unwrap());
        store
            .set_selected_renderers(&selection(&[("a", "Kitchen")]))
            .await
            .unwrap();

        store.erase_selected_renderers().await.unwrap();
        assert!(store.get_selected_renderers().await.unwrap().is_empty());
    }
}
