use clap::Parser;

use epidrift::args::Args;
use epidrift::runner::Runner;

fn main() {
    let args = Args::parse();
    let mut runner = Runner::new(args).unwrap_or_else(|error| {
        eprintln!("Unable to initialize simulation: {error}.");
        std::process::exit(1);
    });
    if let Err(error) = runner.start() {
        eprintln!("Simulation failed: {error}.");
        std::process::exit(1);
    }
}
