//! Network layer: TCP accept loop and the command dispatcher.

pub mod connection;
mod gateway;

pub use gateway::Gateway;
