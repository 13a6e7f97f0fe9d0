//! CLI command modules.

pub mod broadcast;
pub mod http;
pub mod sessions;
pub mod status;
pub mod verify;
