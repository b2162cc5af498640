// Authentication module
// Credential persistence and the login/logout session

mod session;
mod store;
mod types;

pub use session::Session;
pub use store::CredentialStore;
pub use types::{CredentialKeys, Credentials, LoginRequest, LoginResponse, User};
