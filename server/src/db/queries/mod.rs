pub mod channels;
pub mod messages;
pub mod servers;
