pub mod bootstrap;
pub mod broadcaster;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod poll;
pub mod qr;
pub mod scheduler;
pub mod session_store;
pub mod status;
pub mod terminal;

#[cfg(test)]
mod tests;
