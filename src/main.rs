mod cli;
mod execute;

use clap::Parser;
use colored::Colorize;

use crate::cli::Cli;

fn main() {
    let cli = Cli::parse();
    match execute::execute(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            std::process::exit(1);
        }
    }
}
