pub mod password;
pub mod token;

pub use password::{hash_password, Password};
pub use token::{random_alphanumeric, sha256_hex};
