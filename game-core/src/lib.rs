pub mod clock;
pub mod hooks;
pub mod password;
pub mod session;
pub mod token;

// Re-export main components
pub use clock::*;
pub use hooks::*;
pub use password::*;
pub use session::*;
pub use token::*;
