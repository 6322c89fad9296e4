use crate::models::SelectedRenderers;
use crate::traits::SelectionStore;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Selection store kept in memory, lost on restart
#[derive(Default)]
pub struct MemorySelectionStore {
    renderers: RwLock<SelectedRenderers>,
}

impl MemorySelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a selection
    pub fn with_selection(renderers: SelectedRenderers) -> Self {
        Self {
            renderers: RwLock::new(renderers),
        }
    }
}

#[async_trait]
impl SelectionStore for MemorySelectionStore {
    async fn get_selected_renderers(&self) -> Result<SelectedRenderers> {
        Ok(self.renderers.read().await.clone())
    }

    async fn set_selected_renderers(&self, renderers: &SelectedRenderers) -> Result<()> {
        *self.renderers.write().await = renderers.clone();
        Ok(())
    }

    async fn erase_selected_renderers(&self) -> Result<()> {
        self.renderers.write().await.clear();
        Ok(())
    }
}
