//! arcueid - CLI for the Arcueid interpreter
//!
//! Usage:
//!   arcueid                 # interactive REPL
//!   arcueid script.arc      # run a script
//!   arcueid -e '(+ 1 2)'    # evaluate one expression and print it
//!
//! Exit code 0 on clean completion, 1 on an unhandled error.

mod repl;

use std::path::PathBuf;
use std::process;

use clap::Parser as ClapParser;
use tracing_subscriber::EnvFilter;

use arcueid_compiler::eval_source;
use arcueid_core::pprint::write_value;
use arcueid_runtime::{boot_with, RuntimeConfig};

#[derive(ClapParser)]
#[command(name = "arcueid")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Arcueid - an interpreter for the Arc language", long_about = None)]
struct Args {
    /// Script file to run
    file: Option<PathBuf>,

    /// Evaluate an expression, print its value, and exit
    #[arg(short = 'e', long = "eval", value_name = "EXPR")]
    expr: Option<String>,

    /// Runtime configuration file (TOML)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => match RuntimeConfig::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("arcueid: {}", e);
                process::exit(1);
            }
        },
        None => RuntimeConfig::default(),
    };
    let mut interp = boot_with(&config);

    if let Some(expr) = args.expr {
        match eval_source(&mut interp, &expr) {
            Ok(v) => {
                println!("{}", write_value(&mut interp, v, true));
            }
            Err(e) => {
                eprintln!("arcueid: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    if let Some(file) = args.file {
        let source = match std::fs::read_to_string(&file) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("arcueid: {}: {}", file.display(), e);
                process::exit(1);
            }
        };
        if let Err(e) = eval_source(&mut interp, &source) {
            eprintln!("arcueid: {}", e);
            process::exit(1);
        }
        return;
    }

    if let Err(e) = repl::run(&mut interp) {
        eprintln!("arcueid: {}", e);
        process::exit(1);
    }
}
