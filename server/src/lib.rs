pub mod client_handler;
pub mod commands;
pub mod errors;
pub mod rooms;
pub mod server_listener;
pub mod state;
