//! Compiles and runs a program, reading `input()` calls from stdin.
//!
//! run with `--help` for more info.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    file: String,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let source = match std::fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("tacvm: cannot read {}: {e}", args.file);
            std::process::exit(1);
        }
    };

    log::info!("compiling {}", args.file);
    let stdin = std::io::stdin();
    if let Err(e) = tacvm::compile_and_run(&source, stdin.lock()) {
        eprintln!("tacvm: {e}");
        std::process::exit(e.exit_code());
    }
}
