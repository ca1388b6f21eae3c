pub mod chat;
pub mod connection;
pub mod envelope;
pub mod sink;
