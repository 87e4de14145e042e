pub mod chat;
pub mod messages;
pub mod player;

// Re-export all types
pub use chat::*;
pub use messages::*;
pub use player::*;
