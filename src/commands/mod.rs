//! CLI commands implementation

pub mod init;
pub mod rebuild;
pub mod status;

pub use init::*;
pub use rebuild::*;
pub use status::*;
