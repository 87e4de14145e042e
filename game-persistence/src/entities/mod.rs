pub mod prelude;

pub mod chats;
pub mod mutes;
pub mod players;
pub mod rooms;
pub mod tokens;
