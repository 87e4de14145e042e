pub mod mute_repository;
pub mod player_repository;
pub mod room_repository;
pub mod token_repository;

pub use mute_repository::MuteRepository;
pub use player_repository::PlayerRepository;
pub use room_repository::RoomRepository;
pub use token_repository::TokenRepository;
