use anyhow::Result;
use bankrev_sync::{
    CollectRunSummary, EnrichRunSummary, LoadRunSummary, SyncConfig, SyncPipeline,
};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "bankrev-cli")]
#[command(about = "Bank app review collection, enrichment and loading")]
struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Commands {
    /// Page the listing service and write the raw checkpoint.
    Collect,
    /// Score sentiment, assign themes and write the enriched checkpoint.
    Enrich,
    /// Print top keywords per source from the enriched checkpoint.
    Keywords,
    /// Insert enriched reviews into the database.
    Load,
    /// Collect, enrich and load in sequence.
    Run,
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow::anyhow!("invalid log filter: {e}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}

fn print_collect(summary: &CollectRunSummary) {
    println!(
        "collect complete: run_id={} collected={} duplicates={} invalid={} written={} file={}",
        summary.run_id,
        summary.collected,
        summary.duplicates_removed,
        summary.invalid_removed,
        summary.written,
        summary.raw_path.as_deref().unwrap_or("(none)")
    );
    for (source, count) in &summary.per_source {
        println!("  {source}: {count}");
    }
}

fn print_enrich(summary: &EnrichRunSummary) {
    println!(
        "enrich complete: run_id={} records={} classifier={} failures={} coverage={:.1}% file={} report={}",
        summary.run_id,
        summary.records,
        summary.classifier,
        summary.classifier_failures,
        summary.coverage * 100.0,
        summary.enriched_path,
        summary.report_path
    );
}

fn print_load(summary: &LoadRunSummary) {
    println!(
        "load complete: run_id={} inserted={} skipped={} total={}",
        summary.run_id, summary.inserted, summary.skipped, summary.total_reviews
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let command = cli.command.unwrap_or(Commands::Run);
    info!(?command, "starting");
    let pipeline = SyncPipeline::new(SyncConfig::from_env())?;

    match command {
        Commands::Collect => print_collect(&pipeline.run_collect().await?),
        Commands::Enrich => print_enrich(&pipeline.run_enrich().await?),
        Commands::Keywords => {
            let summary = pipeline.run_keywords().await?;
            println!(
                "keywords complete: run_id={} records={} report={}",
                summary.run_id, summary.records, summary.report_path
            );
            for (source, terms) in &summary.keywords {
                if terms.is_empty() {
                    println!("  {source}: (not enough reviews)");
                } else {
                    println!("  {source}: {}", terms.join(", "));
                }
            }
        }
        Commands::Load => print_load(&pipeline.run_load().await?),
        Commands::Run => {
            let summary = pipeline.run_all().await?;
            print_collect(&summary.collect);
            if let Some(enrich) = &summary.enrich {
                print_enrich(enrich);
            }
            if let Some(load) = &summary.load {
                print_load(load);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subcommand_defaults_to_none() {
        let cli = Cli::parse_from(["bankrev-cli", "--log-level", "debug"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "debug");
        let cli = Cli::parse_from(["bankrev-cli", "load"]);
        assert!(matches!(cli.command, Some(Commands::Load)));
    }
}
