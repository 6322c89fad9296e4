/// JSON API for listing renderers and editing the selection
///
/// Served on the same listener as the audio stream.

pub mod routes;
pub mod types;

pub use routes::{create_router, AppState};
pub use types::*;
