use clap::Parser;
use ptymux::cli::{self, Args};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = cli::init_logging(&args) {
        eprintln!("ptymux: {e:#}");
        return ExitCode::FAILURE;
    }

    match cli::run(&args) {
        Ok(statuses) => {
            for (index, status) in statuses.iter().enumerate() {
                eprintln!("session {} exited with status {status}", index + 1);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("ptymux: {e:#}");
            ExitCode::FAILURE
        }
    }
}
