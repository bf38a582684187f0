//! Command implementations that need more than a storage call.

pub mod init;
