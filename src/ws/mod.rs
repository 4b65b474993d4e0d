pub mod connctx;
pub mod coordinator;
pub mod docsession;
pub mod reaper;
pub mod sweeper;
pub mod syncstate;
