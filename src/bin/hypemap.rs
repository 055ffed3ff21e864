//! HypeMap reader
//!
//! Prints a page of the live ranking or the per-event summary as JSON.
//!
//! Usage:
//!   cargo run --bin hypemap -- live --game val --lang es --limit 10
//!   cargo run --bin hypemap -- summary --offset 20

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use hypeatlas::clock::SystemClock;
use hypeatlas::config::WorkerConfig;
use hypeatlas::ranking::{HypeMapQuery, HypeRankingEngine};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "hypemap", about = "Ranked live co-streams and per-event hype")]
struct Cli {
    /// SQLite database (defaults to HYPEATLAS_DB_PATH)
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    view: View,
}

#[derive(Subcommand, Debug)]
enum View {
    /// Active co-streams ranked by hype score
    Live(PageArgs),
    /// Active co-streams aggregated per event
    Summary(PageArgs),
}

#[derive(clap::Args, Debug)]
struct PageArgs {
    #[arg(long)]
    game: Option<String>,

    #[arg(long)]
    lang: Option<String>,

    /// 0 uses the default page size; capped at 100
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    limit: i64,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    offset: i64,
}

impl From<PageArgs> for HypeMapQuery {
    fn from(args: PageArgs) -> Self {
        HypeMapQuery {
            game: args.game,
            lang: args.lang,
            limit: args.limit,
            offset: args.offset,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env();
    let db_path = cli.db.unwrap_or(config.db_path);

    let engine = HypeRankingEngine::open(&db_path, Arc::new(SystemClock), config.active_window)?;

    let json = match cli.view {
        View::Live(args) => serde_json::to_string_pretty(&engine.live(&args.into())?)?,
        View::Summary(args) => serde_json::to_string_pretty(&engine.summary(&args.into())?)?,
    };

    println!("{}", json);
    Ok(())
}
