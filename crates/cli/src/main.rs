mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{RunArgs, cmd_cas_delete, cmd_cas_find_missing, cmd_cas_get, cmd_cas_put, cmd_run, cmd_upload};
use output::{OutputFormat, print_error};

/// bbx - content-addressable store and local remote-execution worker
#[derive(Parser)]
#[command(name = "bbx")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
  output: OutputFormat,

  /// Instance name that scopes every digest
  #[arg(long, global = true, default_value = "")]
  instance: String,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Read and write blobs in the store
  Cas {
    #[command(subcommand)]
    command: CasCommand,
  },

  /// Upload a directory as a Merkle tree and print its root digest
  Upload {
    /// Directory to upload
    dir: PathBuf,
  },

  /// Execute a command in the local build workspace
  Run(RunArgs),
}

#[derive(Subcommand)]
enum CasCommand {
  /// Store a file and print its digest
  Put {
    /// File to store
    file: PathBuf,
  },

  /// Fetch a blob by digest
  Get {
    /// Digest as <hash>/<size>
    digest: String,

    /// Write the blob here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
  },

  /// Delete a blob
  Delete {
    /// Digest as <hash>/<size>
    digest: String,
  },

  /// List the given digests that are not in the store
  FindMissing {
    /// Digests as <hash>/<size>
    #[arg(required = true)]
    digests: Vec<String>,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match run(cli) {
    Ok(code) => code,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}

fn run(cli: Cli) -> Result<ExitCode> {
  let instance = cli.instance.as_str();
  match cli.command {
    Commands::Cas { command } => match command {
      CasCommand::Put { file } => cmd_cas_put(&file, instance, cli.output)?,
      CasCommand::Get { digest, out } => cmd_cas_get(&digest, out.as_deref(), instance, cli.output)?,
      CasCommand::Delete { digest } => cmd_cas_delete(&digest, instance, cli.output)?,
      CasCommand::FindMissing { digests } => cmd_cas_find_missing(&digests, instance, cli.output)?,
    },
    Commands::Upload { dir } => cmd_upload(&dir, instance, cli.output)?,
    Commands::Run(args) => {
      let code = cmd_run(args, instance, cli.output)?;
      return Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)));
    }
  }

  Ok(ExitCode::SUCCESS)
}
