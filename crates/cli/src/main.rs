use clap::Parser;

use splitledger_cli::args::Cli;

fn main() {
    splitledger_observability::init();

    let cli = Cli::parse();
    if let Err(err) = splitledger_cli::run(&cli) {
        tracing::error!(error = %format!("{err:#}"), "splitledger failed");
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}
