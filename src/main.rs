use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use tack::analyzer;
use tack::compiler::{self, CompileError};
use tack::lexer;
use tack::vm::Vm;

/// Exit codes keep the historical one-code-per-error-class mapping.
const EXIT_LEX: u8 = 3;
const EXIT_UNEXPECTED_TOKEN: u8 = 6;
const EXIT_MALFORMED_CONTEXT: u8 = 8;
const EXIT_UNKNOWN_FUNCTION: u8 = 9;
const EXIT_VM_FAULT: u8 = 10;
const EXIT_ARITY_MISMATCH: u8 = 11;

#[derive(Parser)]
#[command(name = "tack", version, about = "Compile and run a tack program")]
struct Args {
    /// Source file to compile and run.
    file: PathBuf,

    /// Print the token sequence.
    #[arg(long)]
    dump_tokens: bool,

    /// Print the compiled instruction program.
    #[arg(long)]
    dump_bytecode: bool,

    /// Print the basic-block partition.
    #[arg(long)]
    dump_blocks: bool,

    /// Report intra-block dead stores.
    #[arg(long)]
    dead_stores: bool,

    /// Emit the compiled program as JSON instead of running it.
    #[arg(long)]
    emit_json: bool,

    /// Compile and analyze only; skip execution.
    #[arg(long)]
    no_run: bool,
}

fn compile_exit_code(err: &CompileError) -> u8 {
    match err {
        CompileError::UnexpectedTokenKind { .. } => EXIT_UNEXPECTED_TOKEN,
        CompileError::UnknownFunction { .. } => EXIT_UNKNOWN_FUNCTION,
        CompileError::ArityMismatch { .. } => EXIT_ARITY_MISMATCH,
        CompileError::MalformedContext => EXIT_MALFORMED_CONTEXT,
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let source = match std::fs::read_to_string(&args.file) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Error reading {}: {}", args.file.display(), err);
            return ExitCode::from(1);
        }
    };

    let tokens = match lexer::lex(&source) {
        Ok(tokens) => tokens,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::from(EXIT_LEX);
        }
    };

    if args.dump_tokens {
        for token in &tokens {
            println!("{:<16} {:?}", token.kind.as_str(), token.text);
        }
    }

    let program = match compiler::compile(&tokens) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("Compile error: {}", err);
            return ExitCode::from(compile_exit_code(&err));
        }
    };

    if args.dump_bytecode {
        println!("Program:");
        for (offset, inst) in program.insts.iter().enumerate() {
            println!("{:>4}: \t{}", offset, inst);
        }
        println!("-----");
    }

    if args.emit_json {
        match serde_json::to_string_pretty(&program) {
            Ok(json) => println!("{}", json),
            Err(err) => {
                eprintln!("Serialization error: {}", err);
                return ExitCode::from(1);
            }
        }
        return ExitCode::SUCCESS;
    }

    let blocks = analyzer::partition_into_blocks(&program.insts);

    if args.dump_blocks {
        println!("Blocks:");
        for block in &blocks {
            println!("\t#{}: start {} len {}", block.number, block.start, block.len);
        }
        println!("-----");
    }

    if args.dead_stores {
        for dead in analyzer::detect_dead_stores(&program.insts, &blocks) {
            println!("{}", dead);
        }
    }

    if args.no_run {
        return ExitCode::SUCCESS;
    }

    let mut vm = Vm::new();
    vm.load(program.insts);
    if let Err(err) = vm.run() {
        eprintln!("{}", err);
        return ExitCode::from(EXIT_VM_FAULT);
    }

    ExitCode::SUCCESS
}
