pub mod api;
pub mod ws;

pub use api::*;
pub use ws::*;
