use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = hlsgrabctl::Cli::parse();
    hlsgrabctl::init_tracing(cli.verbose);
    if let Err(err) = hlsgrabctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
