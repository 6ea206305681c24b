pub mod mfa;
pub mod password;
pub mod registration;
pub mod session;

pub use password::{change_password, me};
pub use registration::register;
pub use session::{list_sessions, login, logout, refresh, verify};
