use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use portfolio_stream::CompanyList;

#[derive(Debug, Parser)]
#[command(name = "portfolio", version, about = "Run and follow portfolio analysis jobs")]
pub struct Cli {
    /// Job runner base URL.
    #[arg(long, global = true, env = "PORTFOLIO_API_BASE_URL")]
    pub base_url: Option<String>,

    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Analyze a portfolio of tickers.
    Analyze(AnalyzeArgs),
    /// Analyze one ticker.
    Single {
        symbol: String,
        /// Analysis day, `YYYY-MM-DD`.
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Print an index constituent list.
    Companies {
        #[arg(value_parser = parse_list)]
        list: CompanyList,
        #[arg(long)]
        json: bool,
    },
    /// Serve a local job runner that echoes queries instead of analyzing.
    Serve {
        #[arg(long, default_value = "127.0.0.1:7777")]
        addr: SocketAddr,
        /// JSON file mapping list names to tickers, layered over the built-in NIFTY 50.
        #[arg(long)]
        directory: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Tickers to analyze.
    #[arg(required_unless_present = "list")]
    pub tickers: Vec<String>,

    /// Analyze every constituent of an index list instead.
    #[arg(long, value_parser = parse_list, conflicts_with = "tickers")]
    pub list: Option<CompanyList>,

    /// Use the non-streaming endpoint.
    #[arg(long)]
    pub batch: bool,

    /// Total investment amount; also prints an equal-weight split.
    #[arg(long)]
    pub amount: Option<f64>,

    #[arg(long)]
    pub weeks: Option<u32>,

    /// Range start, `YYYY-MM-DD`.
    #[arg(long, requires = "end")]
    pub start: Option<String>,

    /// Range end, `YYYY-MM-DD`.
    #[arg(long, requires = "start")]
    pub end: Option<String>,

    /// Single analysis day, `YYYY-MM-DD`.
    #[arg(long, conflicts_with_all = ["start", "end"])]
    pub date: Option<String>,

    /// Fail the stream after this many seconds without an event.
    #[arg(long, env = "PORTFOLIO_IDLE_TIMEOUT_SECS")]
    pub idle_timeout: Option<u64>,

    /// Print the full result as JSON.
    #[arg(long)]
    pub json: bool,
}

fn parse_list(value: &str) -> Result<CompanyList, String> {
    value.parse().map_err(|e: portfolio_stream::ClientError| e.to_string())
}
