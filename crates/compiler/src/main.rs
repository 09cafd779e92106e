//! Pico Compiler CLI
//!
//! Command-line interface for compiling `.pico` programs to `.pexb`
//! bytecode modules.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "picoc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pico compiler - compile .pico programs to bytecode modules", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a .pico file to a .pexb module
    Build {
        /// Input .pico source file
        input: PathBuf,

        /// Output module path (defaults to the input with a .pexb extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Extern manifest file(s) to validate extern blocks against
        #[arg(long = "extern-manifest", value_name = "PATH")]
        extern_manifests: Vec<PathBuf>,
    },

    /// Print the token stream of a source file
    Tokens {
        /// Input .pico source file
        input: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            extern_manifests,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension("pexb"));
            run_build(&input, &output, &extern_manifests);
        }
        Commands::Tokens { input } => {
            run_tokens(&input);
        }
        Commands::Completions { shell } => {
            run_completions(shell);
        }
    }
}

fn run_build(input: &Path, output: &Path, extern_manifests: &[PathBuf]) {
    let mut config = picoc::CompilerConfig::new();
    for path in extern_manifests {
        match picoc::ExternManifest::load(path) {
            Ok(manifest) => config.extern_manifests.push(manifest),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
    }

    match picoc::compile_file_with_config(input, output, &config) {
        Ok(()) => {
            println!("Compiled {} -> {}", input.display(), output.display());
        }
        Err(rendered) => {
            eprint!("{}", ensure_trailing_newline(rendered));
            process::exit(1);
        }
    }
}

fn run_tokens(input: &Path) {
    let source = match fs::read_to_string(input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: failed to read '{}': {}", input.display(), e);
            process::exit(1);
        }
    };

    match picoc::Tokenizer::tokenize(&source) {
        Ok(tokens) => {
            for token in &tokens {
                println!("{}", token);
            }
        }
        Err(err) => {
            let label = input.display().to_string();
            eprint!("{}", picoc::diagnostics::render(&source, &label, &err));
            process::exit(1);
        }
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "picoc", &mut io::stdout());
}

fn ensure_trailing_newline(mut message: String) -> String {
    if !message.ends_with('\n') {
        message.push('\n');
    }
    message
}
