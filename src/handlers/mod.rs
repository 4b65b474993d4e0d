pub mod health;
pub mod status;
pub mod session;
pub mod diagnostics;

pub use health::*;
pub use status::*;
pub use session::*;
pub use diagnostics::*;
