pub mod activity;
pub mod config;
pub mod control_api;
pub mod error;
pub mod source;
pub mod stream;
pub mod types;
pub mod upnp;
pub mod wav;

pub use activity::*;
pub use config::*;
pub use error::*;
pub use source::*;
pub use types::*;
