pub mod messages;
pub mod health;
pub mod ready;
pub mod status;
pub mod diagnostics;
pub mod session;
pub mod error;

pub use messages::*;
pub use health::*;
pub use ready::*;
pub use status::*;
pub use diagnostics::*;
pub use session::*;
pub use error::*;
