pub mod handler;
pub mod router;
pub mod msg_join_handler;
pub mod msg_leave_handler;
pub mod msg_sync_handler;
pub mod msg_edit_handler;
pub mod msg_heartbeat_handler;
