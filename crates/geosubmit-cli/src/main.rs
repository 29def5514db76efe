//! 🚀 geosubmit-cli: the front door, the bouncer, the maitre d' of geosubmit.
//!
//! 🎬 *[narrator voice]* "It all started with a phone that wouldn't stop talking about cell towers..."
//! 📦 This binary crate is the thin CLI wrapper that loads config, sets up logging,
//! and then lets the library do the heavy lifting. Like a manager. 🦆

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use geosubmit::jobs::{JobReport, JobSpec};
use geosubmit::storage::InMemoryStorage;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 📡 Accepts location observations from phones and rolls them into daily counters.
#[derive(Debug, Parser)]
#[command(name = "geosubmit", version)]
struct Cli {
    /// Config file. Missing is fine; defaults and GEOSUBMIT_* env vars still apply.
    #[arg(short, long, default_value = "geosubmit.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the submission endpoint with the insert worker and scheduler alongside (default).
    Serve,
    /// Run every configured aggregation job once and print what happened.
    Aggregate,
}

/// 🚀 main(): where it all begins. The "I pressed F5 and held my breath" moment.
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 println! debugging is a lifestyle choice we're trying to move past
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // 🔒 make sure the config file exists before we get emotionally attached
    let config_file = cli.config.as_path();
    let config_file_path_which_is_validated_to_exist = match config_file.try_exists().with_context(|| {
        format!(
            "💀 Couldn't tell whether the configuration file exists. Relative paths resolve against the cwd; an absolute path removes all doubt. Was checking here: '{}'",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        false => None, // 💤 not there. defaults and env it is.
    };

    let app_config = geosubmit::app_config::load_config(config_file_path_which_is_validated_to_exist)
        .context("💀 In geosubmit-cli, main, we couldn't load the config. Check the file and any GEOSUBMIT_* env vars for typos")?;

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            // ⚠️ storage lives in this process only; a restart forgets everything
            let storage = Arc::new(InMemoryStorage::new());
            geosubmit::run(app_config, storage, async {
                let _ = tokio::signal::ctrl_c().await;
                info!("🛑 ctrl-c received, wrapping up");
            })
            .await
        }
        Command::Aggregate => {
            let today = Utc::now().date_naive();
            let reports = geosubmit::aggregate(app_config, Arc::new(InMemoryStorage::new()), today).await;
            println!("{}", render(&reports));
            Ok(())
        }
    };

    // 💀 the part where we find out what went wrong and print it in a way that's helpful at 3am
    if let Err(err) = result {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_bind_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("Address already in use") || cause_str.contains("Permission denied") {
                the_vibes_are_giving_bind_issues = true;
            }
        }

        if the_vibes_are_giving_bind_issues {
            error!(
                "🔧 hint: the listen address is taken or off-limits. \
                Pick another one with GEOSUBMIT_SERVER__BIND_ADDR or [server] bind_addr, \
                or find the squatter with `ss -ltnp`. ☕"
            );
        }

        std::process::exit(1);
    }

    Ok(())
}

/// 🍽️ One row per job, in the order they ran.
fn render(reports: &[(JobSpec, JobReport)]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Job", "Result"]);
    for (spec, report) in reports {
        table.add_row(vec![
            Cell::new(spec.to_string()),
            Cell::new(report.to_string()).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}
