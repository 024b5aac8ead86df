//! Command-line interface for `ForecastKit`

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::Receiver;

use forecastkit::{DataManager, Forecast, ForecastWarning, Geoposition};

/// ForecastKit - NOAA forecasts by zipcode or coordinates
#[derive(Parser, Debug)]
#[command(
    name = "forecastkit",
    version,
    about = "Fetch and cache NOAA NDFD forecasts",
    long_about = "Fetches day-by-day forecasts from the NOAA National Digital Forecast Database
for a US zipcode or a coordinate and keeps them in a local store."
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Forecast for a five digit zipcode
    Zip {
        /// Zipcode, e.g. 20001
        zipcode: String,
    },

    /// Forecast for a coordinate
    Point(PointArgs),

    /// Forecast for the configured default position
    Here,

    /// Import zipcode locations from a JSON array
    ImportZipcodes {
        /// File with `[{"zipcode": 20001, "city": ..., "state": ..., "latitude": ..., "longitude": ...}]`
        file: PathBuf,
    },

    /// Show a stored forecast without fetching
    Show {
        #[command(flatten)]
        point: PointArgs,

        /// Period start, RFC 3339 (e.g. 2014-01-08T06:00:00-05:00)
        #[arg(long)]
        start: DateTime<Utc>,
    },
}

#[derive(Args, Debug, Clone, Copy)]
pub struct PointArgs {
    /// Latitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lat: f64,

    /// Longitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lon: f64,
}

impl PointArgs {
    fn position(self) -> Geoposition {
        Geoposition::new(self.lat, self.lon)
    }
}

/// Run one command against the manager
pub async fn execute(command: Commands, manager: &DataManager) -> Result<()> {
    match command {
        Commands::Zip { zipcode } => {
            let location = manager
                .location_for_zipcode(&zipcode)?
                .with_context(|| format!("Unknown zipcode {zipcode}, import zipcodes first"))?;
            println!(
                "{} {}, {} ({})",
                location.formatted_zipcode(),
                location.city,
                location.state,
                location.geoposition().format_coordinates()
            );
            let warnings = manager.subscribe_warnings();
            let forecasts = manager.forecasts_for_zipcode(&zipcode).await?;
            print_forecasts(&forecasts);
            print_warnings(warnings);
        }
        Commands::Point(point) => {
            let warnings = manager.subscribe_warnings();
            let forecasts = manager.forecasts_for_geoposition(point.position()).await?;
            print_forecasts(&forecasts);
            print_warnings(warnings);
        }
        Commands::Here => {
            let warnings = manager.subscribe_warnings();
            let forecasts = manager.forecasts_for_current_location().await?;
            print_forecasts(&forecasts);
            print_warnings(warnings);
        }
        Commands::ImportZipcodes { file } => {
            let count = manager
                .import_locations(&file)
                .with_context(|| format!("Failed to import {}", file.display()))?;
            println!("Imported {count} zipcode locations");
        }
        Commands::Show { point, start } => {
            match manager.forecast_for_geoposition(&point.position(), start)? {
                Some(forecast) => print_forecasts(std::slice::from_ref(&forecast)),
                None => println!("No stored forecast for {} at {start}", point.position()),
            }
        }
    }
    Ok(())
}

fn print_forecasts(forecasts: &[Forecast]) {
    if forecasts.is_empty() {
        println!("No forecasts returned");
        return;
    }
    for forecast in forecasts {
        println!(
            "{}  {:<24} {:<16} precip {}",
            forecast.start_date.format("%a %Y-%m-%d %H:%M UTC"),
            forecast.summary.as_deref().unwrap_or("-"),
            forecast.format_temperature(),
            forecast.format_precipitation()
        );
    }
}

fn print_warnings(mut warnings: Receiver<ForecastWarning>) {
    while let Ok(warning) = warnings.try_recv() {
        eprintln!("warning: {}", warning.error().user_message());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point_with_negative_longitude() {
        let cli = Cli::try_parse_from(["forecastkit", "point", "--lat", "38.99", "--lon", "-77.01"])
            .unwrap();
        match cli.command {
            Commands::Point(point) => {
                assert_eq!(point.position(), Geoposition::new(38.99, -77.01));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_show_start() {
        let cli = Cli::try_parse_from([
            "forecastkit",
            "show",
            "--lat",
            "38.99",
            "--lon",
            "-77.01",
            "--start",
            "2014-01-08T06:00:00-05:00",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Show { .. }));
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["forecastkit", "zip", "20001", "--verbose"]).unwrap();
        assert!(cli.verbose);
    }
}
