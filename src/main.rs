//! The command-line driver: read sources, run the pipeline, write the
//! artifact into the current directory.

use std::io::IsTerminal as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
enum BackendArg {
  C,
  Llvm,
}

/// Compiler for the Lyre language.
#[derive(Parser)]
#[command(name = "lyrec", version, about)]
struct Args {
  /// Source files to compile.
  #[arg(required = true)]
  files: Vec<PathBuf>,

  /// Dump tokens, syntax trees, and typed IR to standard output.
  #[arg(long)]
  print_debug: bool,

  /// Code emitter to use.
  #[arg(long, value_enum, default_value = "c")]
  backend: BackendArg,
}

fn main() -> ExitCode {
  env_logger::init();
  let args = Args::parse();

  let mut sources = Vec::with_capacity(args.files.len());
  for path in &args.files {
    match std::fs::read_to_string(path) {
      Ok(text) => sources.push((path.display().to_string(), text)),
      Err(err) => {
        eprintln!("{}: error[{}]: {err}", path.display(), lyrec::diag::UNREADABLE_FILE);
        return ExitCode::from(255)
      }
    }
  }

  let backend = match args.backend {
    BackendArg::C => lyrec::Backend::C,
    BackendArg::Llvm => lyrec::Backend::Llvm,
  };
  let options = lyrec::Options { backend, print_debug: args.print_debug };
  let result = lyrec::compile(sources, &options);

  let color = std::io::stderr().is_terminal();
  eprint!("{}", result.render_diagnostics(color));

  match result.artifact {
    Some(text) => {
      let out = backend.file_name();
      if let Err(err) = std::fs::write(out, text) {
        eprintln!("{out}: error[{}]: {err}", lyrec::diag::UNWRITABLE_OUTPUT);
        return ExitCode::from(255)
      }
      log::debug!("wrote {out}");
      ExitCode::SUCCESS
    }
    None => ExitCode::from(255),
  }
}
