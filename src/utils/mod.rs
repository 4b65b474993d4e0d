pub mod disconnect_guard;
