//! Crate-wide constants.

/// Application name used for data, cache and lock paths.
pub const APP_NAME: &str = "buildbox";

/// Environment variable overriding the on-disk CAS directory.
pub const STORE_ENV: &str = "BBX_STORE";

/// Environment variable overriding the build workspace base directory.
pub const WORKSPACE_ENV: &str = "BBX_WORKSPACE";

/// Credentials the sandboxed command runs under when the worker is root.
pub const DEFAULT_SANDBOX_UID: u32 = 1;
pub const DEFAULT_SANDBOX_GID: u32 = 1;

/// Permission bits for materialized inputs and prepared output directories.
pub const INPUT_FILE_MODE: u32 = 0o444;
pub const INPUT_EXECUTABLE_MODE: u32 = 0o555;
pub const INPUT_DIRECTORY_MODE: u32 = 0o555;
pub const OUTPUT_DIRECTORY_MODE: u32 = 0o777;
pub const TMP_DIRECTORY_MODE: u32 = 0o777;
