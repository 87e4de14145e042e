pub use super::chats::Entity as Chats;
pub use super::mutes::Entity as Mutes;
pub use super::players::Entity as Players;
pub use super::rooms::Entity as Rooms;
pub use super::tokens::Entity as Tokens;
