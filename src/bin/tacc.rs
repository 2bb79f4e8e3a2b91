//! Dumps a program's tokens or its compiled instruction list. Does not
//! execute anything.
//!
//! run with `--help` for more info.

use clap::{Parser, ValueEnum};
use tacvm::front::lex::Lexer;
use tacvm::middle;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    file: String,
    /// what to dump
    #[arg(value_enum, short, long, default_value_t = Output::Instructions)]
    out: Output,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
enum Output {
    /// the raw token stream
    Tokens,
    /// the compiled three-address instruction list
    Instructions,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let input = match std::fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("tacc: cannot read {}: {e}", args.file);
            std::process::exit(1);
        }
    };

    match args.out {
        Output::Tokens => dump_tokens(&input),
        Output::Instructions => dump_instructions(&input),
    }
}

fn dump_tokens(input: &str) {
    let mut lexer = Lexer::new(input);
    loop {
        match lexer.next() {
            Ok(tok) => {
                let is_eof = tok.kind == tacvm::front::lex::TokenKind::Eof;
                println!("{tok}");
                if is_eof {
                    break;
                }
            }
            Err(e) => {
                eprintln!("tacc: {e}");
                std::process::exit(e.exit_code());
            }
        }
    }
}

fn dump_instructions(input: &str) {
    match middle::compile(input) {
        Ok(program) => {
            for (address, instruction) in program.instructions.iter() {
                println!("{address:>5}: {:?} {:?} {:?} {:?}", instruction.opcode, instruction.op1, instruction.op2, instruction.op3);
            }
        }
        Err(e) => {
            eprintln!("tacc: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
