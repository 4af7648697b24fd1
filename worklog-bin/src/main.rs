use clap::Parser;
use console::style;
use worklog_cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        eprintln!("{} {e}", style("error:").red().bold());
        std::process::exit(1);
    }
}
