mod cli;
mod client;
mod config;
mod error;
mod logging;
mod model;
mod orchestrator;
mod text_summary;

use clap::Parser;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    let is_silent = args.silent;
    if let Err(e) = logging::init_logging(args.log_level) {
        eprintln!("{e:#}");
    }

    match cli::run(args).await {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            match cli::fatal_error_line(&e, is_silent) {
                cli::OutputLine::Stdout(msg) => println!("{msg}"),
                cli::OutputLine::Stderr(msg) => eprintln!("{msg}"),
            }
            std::process::exit(1);
        }
    }
}
