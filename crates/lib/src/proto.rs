//! Remote-execution wire messages.
//!
//! Field numbers follow the remote execution API so that blobs written by
//! standard clients decode here unchanged. Only the fields this worker acts on
//! are declared; unknown fields are skipped by the decoder.

use prost::Message;

/// Content digest as it appears on the wire (no instance).
#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct Digest {
  #[prost(string, tag = "1")]
  pub hash: String,
  #[prost(int64, tag = "2")]
  pub size_bytes: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct FileNode {
  #[prost(string, tag = "1")]
  pub name: String,
  #[prost(message, optional, tag = "2")]
  pub digest: Option<Digest>,
  #[prost(bool, tag = "4")]
  pub is_executable: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct DirectoryNode {
  #[prost(string, tag = "1")]
  pub name: String,
  #[prost(message, optional, tag = "2")]
  pub digest: Option<Digest>,
}

/// One level of a Merkle directory tree.
#[derive(Clone, PartialEq, Message)]
pub struct Directory {
  #[prost(message, repeated, tag = "1")]
  pub files: Vec<FileNode>,
  #[prost(message, repeated, tag = "2")]
  pub directories: Vec<DirectoryNode>,
}

#[derive(Clone, PartialEq, Message)]
pub struct EnvironmentVariable {
  #[prost(string, tag = "1")]
  pub name: String,
  #[prost(string, tag = "2")]
  pub value: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Command {
  #[prost(string, repeated, tag = "1")]
  pub arguments: Vec<String>,
  #[prost(message, repeated, tag = "2")]
  pub environment_variables: Vec<EnvironmentVariable>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Action {
  #[prost(message, optional, tag = "1")]
  pub command_digest: Option<Digest>,
  #[prost(message, optional, tag = "2")]
  pub input_root_digest: Option<Digest>,
  #[prost(string, repeated, tag = "3")]
  pub output_files: Vec<String>,
  #[prost(string, repeated, tag = "4")]
  pub output_directories: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ExecuteRequest {
  #[prost(string, tag = "1")]
  pub instance_name: String,
  #[prost(message, optional, tag = "2")]
  pub action: Option<Action>,
}

impl Command {
  /// Build a command from argv and environment pairs.
  pub fn new<I, K, V>(arguments: Vec<String>, environment: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    Self {
      arguments,
      environment_variables: environment
        .into_iter()
        .map(|(name, value)| EnvironmentVariable {
          name: name.into(),
          value: value.into(),
        })
        .collect(),
    }
  }
}

/// Encode any message to its wire bytes.
pub fn encode<M: Message>(message: &M) -> Vec<u8> {
  message.encode_to_vec()
}
