//! Host-specific paths and filesystem permission handling.

pub mod paths;
pub mod permissions;
