use crate::consts::{APP_NAME, STORE_ENV, WORKSPACE_ENV};
use std::path::PathBuf;

/// Returns the user's home directory, or the system temp directory if `HOME` is unset.
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// Returns the directory for data files for the application
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the directory for cache files for the application
pub fn cache_dir() -> PathBuf {
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Root of the on-disk content-addressable store.
pub fn store_dir() -> PathBuf {
  if let Ok(path) = std::env::var(STORE_ENV) {
    return PathBuf::from(path);
  }
  data_dir().join("cas")
}

/// Base directory holding the build root and temp directory of local actions.
pub fn workspace_dir() -> PathBuf {
  if let Ok(path) = std::env::var(WORKSPACE_ENV) {
    return PathBuf::from(path);
  }
  cache_dir().join("workspace")
}
