pub mod connection;
pub mod entities;
pub mod repositories;

pub use repositories::*;

use sea_orm::{DatabaseConnection, DbErr};

/// Owns the connection and hands out repositories over it.
#[derive(Clone)]
pub struct DatabaseManager {
    connection: DatabaseConnection,
}

impl DatabaseManager {
    pub async fn connect(database_url: &str) -> Result<Self, DbErr> {
        let connection = connection::connect_and_migrate(database_url).await?;
        Ok(Self { connection })
    }

    pub fn from_connection(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    pub fn get_connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    pub fn players(&self) -> PlayerRepository {
        PlayerRepository::new(self.connection.clone())
    }

    pub fn rooms(&self) -> RoomRepository {
        RoomRepository::new(self.connection.clone())
    }

    pub fn mutes(&self) -> MuteRepository {
        MuteRepository::new(self.connection.clone())
    }

    pub fn tokens(&self) -> TokenRepository {
        TokenRepository::new(self.connection.clone())
    }
}
