pub mod memory;
pub mod models;
pub mod registry;
pub mod traits;

pub use memory::*;
pub use models::*;
pub use registry::*;
pub use traits::*;
