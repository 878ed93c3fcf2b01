//! buildbox-lib: content-addressed storage and local action execution
//!
//! This crate provides the worker side of a remote-execution system:
//! - `digest`: content digests and their validation
//! - `blobstore`: the `BlobStore` trait, concrete stores and the integrity guard
//! - `tree`: materializing and uploading Merkle directory trees
//! - `execute`: running one action in a sandboxed build workspace
//! - `workspace`: the build root and temp directory an action runs in

#[cfg(not(unix))]
compile_error!("buildbox-lib only supports Unix hosts");

pub mod blobstore;
pub mod consts;
pub mod digest;
pub mod execute;
pub mod platform;
pub mod proto;
pub mod tree;
pub mod workspace;
