use clap::Parser;

use range_sync_app::Config;

/// Overrides config derived from the environment with a couple of
/// operational flags a deployer wants at the command line rather than
/// baked into `.env`.
#[derive(Parser, Debug)]
#[command(name = "range-sync-server")]
struct Cli {
    /// Path to the rule-set document; overrides RANGE_SYNC_RULE_SET_PATH.
    #[arg(long)]
    rule_set: Option<String>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("configuration error: {e}");
        std::process::exit(1);
    });

    range_sync_app::run(config, cli.rule_set).await
}
