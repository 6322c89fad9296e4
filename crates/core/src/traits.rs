use crate::models::SelectedRenderers;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Persistent key/value storage for the set of renderers the user selected
#[async_trait]
pub trait SelectionStore: Send + Sync {
    /// Load the persisted selection (uuid -> name)
    async fn get_selected_renderers(&self) -> Result<SelectedRenderers>;

    /// Replace the persisted selection
    async fn set_selected_renderers(&self, renderers: &SelectedRenderers) -> Result<()>;

    /// Forget every selected renderer
    async fn erase_selected_renderers(&self) -> Result<()>;
}

/// Blocking producer of raw interleaved S16LE audio
///
/// Implementations are driven from a dedicated thread, never from the async runtime.
pub trait SampleSource: Send {
    /// Human readable name for logs
    fn name(&self) -> &str;

    /// Read up to `buf.len()` bytes, waiting at most `timeout`.
    ///
    /// A full frame is returned under normal operation. `Ok(0)` means nothing
    /// arrived in time; `ErrorKind::UnexpectedEof` means the source is exhausted.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;
}
