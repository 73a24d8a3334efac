use likesyncd::config::SyncConfig;
use likesyncd::runtime::{SyncRuntime, print_summary};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Sync { json: bool },
    List,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Sync { json: false };
    let mut json = false;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "sync" => mode = CliMode::Sync { json: false },
            "list" => mode = CliMode::List,
            "--json" => json = true,
            "--help" | "-h" => return Ok(CliMode::Help),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(match mode {
        CliMode::Sync { .. } => CliMode::Sync { json },
        CliMode::List if json => anyhow::bail!("--json only applies to sync"),
        other => other,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    likesyncd::logging::init();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: likesyncd [sync] [--json] | likesyncd list");
        println!("  sync     Mirror liked tracks into the local library (default)");
        println!("  --json   Print the session summary as JSON");
        println!("  list     Print indexed tracks and exit");
        return Ok(());
    }

    let config = SyncConfig::from_env()?;
    let runtime = SyncRuntime::bootstrap(config).await?;
    match mode {
        CliMode::List => runtime.list().await,
        CliMode::Sync { json } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupted, finishing in-flight tracks");
                    on_signal.cancel();
                }
            });
            let result = runtime.sync(&cancel).await?;
            print_summary(&result, json)
        }
        CliMode::Help => Ok(()),
    }
}
