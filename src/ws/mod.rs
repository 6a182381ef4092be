pub mod connection;
pub mod handler;
pub mod sender;
pub mod server;
