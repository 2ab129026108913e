//! Command-line client for portfolio analysis jobs.

mod cli;
mod observability;
mod render;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser as _;
use portfolio_runner::{CompanyDirectory, QueryEchoAnalyzer, RunnerConfig, RunnerState};
use portfolio_stream::{AnalysisClient, ClientConfig, PortfolioAnalysis};
use tracing::info;

use crate::cli::{AnalyzeArgs, Cli, Command};
use crate::observability::init_observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_observability(cli.verbose);

    match cli.command {
        Command::Analyze(args) => analyze(&client(cli.base_url)?, args).await,
        Command::Single { symbol, date, json } => {
            let record = client(cli.base_url)?
                .analyze_single(&symbol, date.as_deref())
                .await
                .with_context(|| format!("analysis of {symbol} failed"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("{}", render::result_line(&record));
            }
            Ok(())
        }
        Command::Companies { list, json } => {
            let companies = client(cli.base_url)?
                .companies(list)
                .await
                .with_context(|| format!("failed to fetch {list}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&*companies)?);
            } else {
                for company in companies.iter() {
                    println!("{company}");
                }
            }
            Ok(())
        }
        Command::Serve { addr, directory } => serve(addr, directory).await,
    }
}

/// Client configured from `PORTFOLIO_*` variables, with `--base-url` on top.
fn client(base_url: Option<String>) -> anyhow::Result<AnalysisClient> {
    let mut config = ClientConfig::from_env().context("invalid client configuration")?;
    if let Some(base_url) = base_url {
        config = config.base_url(base_url);
    }
    AnalysisClient::builder()
        .config(config)
        .build()
        .context("failed to create analysis client")
}

async fn analyze(client: &AnalysisClient, args: AnalyzeArgs) -> anyhow::Result<()> {
    let tickers = match args.list {
        Some(list) => client
            .companies(list)
            .await
            .with_context(|| format!("failed to fetch {list}"))?
            .to_vec(),
        None => args.tickers,
    };

    let mut call = client.portfolio(tickers);
    if let Some(amount) = args.amount {
        call = call.investment_amount(amount);
    }
    if let Some(weeks) = args.weeks {
        call = call.tenure_weeks(weeks);
    }
    if let (Some(start), Some(end)) = (args.start, args.end) {
        call = call.date_range(start, end);
    }
    if let Some(date) = args.date {
        call = call.analysis_date(date);
    }
    if let Some(secs) = args.idle_timeout {
        call = call.idle_timeout(Duration::from_secs(secs));
    }

    let analysis = if args.batch {
        call.collect().await.context("portfolio analysis failed")?
    } else {
        stream_with_progress(call).await?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else {
        print!("{}", render::report(&analysis, args.amount));
    }
    Ok(())
}

/// Streams the call, reporting progress on stderr. Ctrl-C cancels the call.
async fn stream_with_progress(
    call: portfolio_stream::PortfolioCall,
) -> anyhow::Result<PortfolioAnalysis> {
    let stream = call
        .on_progress(|current, total, item| eprintln!("[{current}/{total}] analyzing {item}"))
        .on_result(|record, completed, total| {
            eprintln!("[{completed}/{total}]{}", render::result_line(record))
        })
        .start_stream()
        .await
        .context("failed to start analysis stream")?;

    let abort = stream.abort_handle();
    let call_id = stream.call_id();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(%call_id, "interrupted; cancelling analysis");
            abort.abort();
        }
    });

    stream.finish().await.context("portfolio analysis failed")
}

/// Built-in lists, overridden by the lists in `path` when given.
fn load_directory(path: Option<&std::path::Path>) -> anyhow::Result<CompanyDirectory> {
    let Some(path) = path else {
        return Ok(CompanyDirectory::builtin());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file = CompanyDirectory::from_json(&text)
        .with_context(|| format!("invalid company directory {}", path.display()))?;
    Ok(CompanyDirectory::builtin().merge(file))
}

async fn serve(
    addr: std::net::SocketAddr,
    directory: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let directory = load_directory(directory.as_deref())?;
    let config = RunnerConfig::from_env().context("invalid runner configuration")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let state = RunnerState::new(Arc::new(QueryEchoAnalyzer), directory).with_config(config);
    portfolio_runner::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .context("job runner stopped unexpectedly")
}
