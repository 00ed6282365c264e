pub mod channel;
pub mod channel_service;
pub mod connection;
pub mod events;
pub mod hub;
pub mod membership;
pub mod memory_storage;
pub mod message_store;
pub mod presence;
pub mod server;
pub mod storage;
pub mod validation;
