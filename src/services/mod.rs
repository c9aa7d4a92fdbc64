pub mod directory;
pub mod iam_client;
pub mod metrics;
pub mod session_auth;
