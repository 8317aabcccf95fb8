//! Credential hashing and generated identity values (ids and stamps).

pub mod passwords;
pub mod stamps;

pub use passwords::{CredentialHasher, PasswordService};
pub use stamps::{UuidGenerator, ValueGenerator};
