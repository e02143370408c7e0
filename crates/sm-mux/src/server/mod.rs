//! Inbound and outbound connection setup

mod listener;

pub use listener::ListenerManager;
