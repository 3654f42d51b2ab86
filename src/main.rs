use std::process::ExitCode;

use clap::Parser;

use bpkgchk::{FileStatus, MerkleTree, Package};

#[derive(Parser)]
#[command(name = "bpkgchk")]
#[command(author, version, about = "Inspect and verify chunked package downloads")]
struct Args {
  /// Path to the package descriptor
  pkgfile: String,

  /// Print every hash recorded in the descriptor
  #[arg(long, default_value_t = false)]
  all_hashes: bool,

  /// Report whether the data file exists, creating it at the declared size if absent
  #[arg(long, default_value_t = false)]
  file_check: bool,

  /// Print the hashes of chunks whose data is already correct
  #[arg(long, default_value_t = false)]
  completed_chunks: bool,

  /// Print the minimal hash set covering the verified byte ranges
  #[arg(long, default_value_t = false)]
  min_hashes: bool,

  /// Print the chunk hashes beneath the node with the given hash
  #[arg(long, value_name = "HASH")]
  hashes_of: Option<String>,
}

fn main() -> ExitCode {
  let args = Args::parse();
  match run(&args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("bpkgchk: {e}");
      ExitCode::FAILURE
    }
  }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
  let package = Package::load(&args.pkgfile)?;

  if args.file_check {
    match package.ensure_data_file()? {
      FileStatus::Exists => println!("File Exists"),
      FileStatus::Created => println!("File Created"),
    }
    return Ok(());
  }

  if !(args.all_hashes || args.completed_chunks || args.min_hashes || args.hashes_of.is_some()) {
    // No query requested; loading the descriptor already validated it.
    return Ok(());
  }

  // The data file must exist before the tree can be rebuilt.
  package.ensure_data_file()?;
  let tree = MerkleTree::build(&package)?;

  let hashes = if args.all_hashes {
    tree.all_hashes()
  } else if args.completed_chunks {
    tree.completed_chunks()
  } else if args.min_hashes {
    tree.min_completed_hashes()
  } else {
    tree.chunk_hashes_from(args.hashes_of.as_deref().unwrap_or(""))
  };
  for hash in &hashes {
    println!("{hash}");
  }
  Ok(())
}
