use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use placefeed::{AppConfig, AxisOrder, BoundsHint, FeedFormat};

/// Resolve a spreadsheet feed of places into a map-ready GeoJSON document.
#[derive(Parser)]
#[command(name = "placefeed", author, version, about)]
struct Cli {
    /// Feed URL or local file (overrides DATA_SOURCE_URL)
    #[arg(short, long)]
    source: Option<String>,

    /// Feed format: csv or json (overrides DATA_MODE)
    #[arg(short, long)]
    mode: Option<String>,

    /// Write the GeoJSON here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Minimum milliseconds between geocoding requests
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Axis order of combined coordinates: auto, latlng or lnglat
    #[arg(long)]
    coord_order: Option<String>,

    /// Tie-break region for ambiguous coordinates: south,west,north,east
    #[arg(long)]
    bounds: Option<String>,

    /// Skip the durable geocode cache for this run
    #[arg(long)]
    no_cache: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(source) = &self.source {
            config.data_source_url = Some(source.clone());
        }
        if let Some(mode) = &self.mode {
            config.data_mode = FeedFormat::parse(mode)?;
        }
        if let Some(delay) = self.delay_ms {
            config.geocode_delay_ms = delay;
        }
        if let Some(order) = &self.coord_order {
            config.coord_order = AxisOrder::parse(order)?;
        }
        if let Some(bounds) = &self.bounds {
            config.bounds_hint = Some(BoundsHint::parse(bounds)?);
        }
        if self.no_cache {
            config.cache_enabled = false;
        }
        Ok(())
    }

    fn log_directives(&self) -> String {
        match (self.quiet, self.verbose) {
            (true, _) => "warn".to_string(),
            (_, 0) => "info".to_string(),
            (_, 1) => placefeed::log_directives("info", "debug"),
            (_, _) => placefeed::log_directives("debug", "trace"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    placefeed::init_tracing(&cli.log_directives());

    let mut config = AppConfig::from_env().context("invalid environment configuration")?;
    cli.apply(&mut config)?;

    if cli.show_config {
        println!("{}", serde_json::to_string_pretty(&config.public_profile())?);
        return Ok(());
    }

    placefeed::run(&config, cli.output.as_deref())
        .await
        .context("map build failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_flags_reach_library_targets() {
        let cli = Cli::parse_from(["placefeed", "-v"]);
        let directives = cli.log_directives();
        assert!(directives.starts_with("info,"));
        for target in placefeed::LOG_TARGETS {
            assert!(directives.contains(&format!("{target}=debug")), "{target}");
        }

        let cli = Cli::parse_from(["placefeed", "-vv"]);
        assert!(cli.log_directives().contains("resolver=trace"));

        let cli = Cli::parse_from(["placefeed", "-q", "-v"]);
        assert_eq!(cli.log_directives(), "warn");
    }
}
