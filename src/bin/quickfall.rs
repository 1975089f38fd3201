//! Quickfall command-line driver.
//!
//! Reads IR (a textual listing or serialized IR), compiles it and writes a
//! PE32+ executable, or converts and inspects IR files.

use bumpalo::Bump;
use clap::{Parser, Subcommand};
use quickfall::disasm::format_module;
use quickfall::{
    compile_module, load_module, write_executable_file, write_module, CompilationSession,
    CompileError, CompileOptions, ImageConfig, Module,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Quickfall - compile Quickfall IR to x86-64 executables
#[derive(Parser, Debug)]
#[command(name = "quickfall")]
#[command(about = "Compile Quickfall IR to x86-64 executables", long_about = None)]
struct Args {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile IR into an executable
    Compile {
        /// IR listing or serialized IR
        input: PathBuf,

        /// Output executable
        #[arg(short, long)]
        output: PathBuf,

        /// Function the image starts executing at
        #[arg(long, default_value = "main")]
        entry: String,

        /// Byte alignment of each function
        #[arg(long, default_value_t = CompileOptions::default().function_alignment)]
        align: usize,
    },

    /// Convert an IR listing into serialized IR
    Assemble {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Compile IR and print the disassembled machine code
    Disasm {
        input: PathBuf,

        #[arg(long, default_value_t = CompileOptions::default().function_alignment)]
        align: usize,
    },

    /// Print version information
    Version,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn read_input(path: &Path) -> Result<Module, CompileError> {
    let data = std::fs::read(path)?;
    let module = load_module(&data)?;
    log::info!("loaded {} functions from {}", module.len(), path.display());
    Ok(module)
}

fn run(command: Command) -> Result<(), CompileError> {
    match command {
        Command::Compile {
            input,
            output,
            entry,
            align,
        } => {
            let module = read_input(&input)?;
            let arena = Bump::new();
            let session = CompilationSession::new(&arena);
            let options = CompileOptions {
                function_alignment: align,
            };
            let compiled = compile_module(&module, &session, &options)?;
            write_executable_file(&output, &compiled, &entry, &ImageConfig::default())?;
        }

        Command::Assemble { input, output } => {
            let module = read_input(&input)?;
            std::fs::write(&output, write_module(&module))?;
            log::info!("wrote {}", output.display());
        }

        Command::Disasm { input, align } => {
            let module = read_input(&input)?;
            let arena = Bump::new();
            let session = CompilationSession::new(&arena);
            let options = CompileOptions {
                function_alignment: align,
            };
            let compiled = compile_module(&module, &session, &options)?;
            print!("{}", format_module(&compiled));
        }

        Command::Version => {
            println!("quickfall {}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
