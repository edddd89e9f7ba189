//! Atelier agent server binary.
//! Run with: cargo run --bin atelier-server

use std::process::ExitCode;

use atelier_agent::start_atelier_agent;

fn main() -> ExitCode {
    start_atelier_agent::run()
}
