//! ALICE-Insight CLI
//!
//! Command-line interface for profiling JSON tables.

use alice_insight::{
    read_dataset, ColumnProfile, EngineConfig, FilterClause, FilterSet, Histogram, ProfileStats,
    RawTable, Session,
};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "alice-insight")]
#[command(author = "Moroya Sakamoto")]
#[command(version)]
#[command(about = "Interactive data profiling - filter, summarize, repeat")]
#[command(long_about = r#"
ALICE-Insight: Interactive Data Profiling

Pipeline:
  JSON table → Typed columns → Filter mask → Cached profile / histogram

Filter clauses (--where, repeatable, AND-ed):
  age between 18..65      city = Oslo       name ~ son
  city in Oslo|Lima       score is null     score is not null
"#)]
struct Cli {
    /// Engine configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Filter clause, may be repeated
    #[arg(short = 'w', long = "where", global = true)]
    filters: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show row count and column types
    Info {
        /// Input table (.json, .json.gz or zstd-compressed)
        input: PathBuf,
    },

    /// Profile columns under the filters
    Profile {
        /// Input table (.json, .json.gz or zstd-compressed)
        input: PathBuf,

        /// Columns to profile (comma-separated, default: all)
        #[arg(short = 's', long)]
        columns: Option<String>,
    },

    /// Histogram of a numeric or timestamp column
    Histogram {
        /// Input table (.json, .json.gz or zstd-compressed)
        input: PathBuf,

        /// Column name
        column: String,
    },

    /// Show the first rows passing the filters
    Preview {
        /// Input table (.json, .json.gz or zstd-compressed)
        input: PathBuf,

        /// Limit output rows (default: preview_limit from config)
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };
    let filters = cli
        .filters
        .iter()
        .map(|s| s.parse::<FilterClause>())
        .collect::<Result<FilterSet, _>>()?;

    match cli.command {
        Commands::Info { input } => {
            // Only the shape is needed; skip the session
            let dataset = read_dataset(&input)?;
            let summary = dataset.summary();
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Table => {
                    println!("File:    {}", input.display());
                    println!("Rows:    {}", summary.row_count);
                    println!("Columns: {}", summary.columns.len());
                    println!();
                    println!("{:<24} {:<10} {:>8}", "column", "type", "nulls");
                    println!("{}", "-".repeat(44));
                    for c in &summary.columns {
                        println!(
                            "{:<24} {:<10} {:>8}",
                            c.name,
                            c.semantic_type.name(),
                            c.null_count
                        );
                    }
                }
            }
        }
        Commands::Profile { input, columns } => {
            let session = open_session(&input, config, filters)?;
            let names: Vec<String> = match columns {
                Some(list) => list.split(',').map(|s| s.trim().to_string()).collect(),
                None => session
                    .summary()?
                    .columns
                    .into_iter()
                    .map(|c| c.name)
                    .collect(),
            };
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();

            let start = Instant::now();
            let results = session.get_profiles(&refs)?;
            info!(
                "profiled {} column(s) in {:.2}ms",
                refs.len(),
                start.elapsed().as_secs_f64() * 1000.0
            );

            let mut profiles = Vec::with_capacity(results.len());
            for (name, result) in results {
                match result {
                    Ok(profile) => profiles.push(profile),
                    Err(e) => eprintln!("Error: {}: {}", name, e),
                }
            }
            let profiles: Vec<&ColumnProfile> = profiles.iter().map(|p| p.as_ref()).collect();
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&profiles)?),
                OutputFormat::Table => {
                    for profile in profiles {
                        print_profile(profile);
                    }
                }
            }
        }
        Commands::Histogram { input, column } => {
            let session = open_session(&input, config, filters)?;
            let histogram = session.get_histogram(&column)?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&*histogram)?),
                OutputFormat::Table => print_histogram(&histogram),
            }
        }
        Commands::Preview { input, limit } => {
            let session = open_session(&input, config, filters)?;
            let summary = session.summary()?;
            let rows = session.preview(limit)?;
            let header: Vec<&str> = summary.columns.iter().map(|c| c.name.as_str()).collect();
            match cli.format {
                OutputFormat::Json => {
                    let records: Vec<serde_json::Map<String, serde_json::Value>> = rows
                        .iter()
                        .map(|row| {
                            header
                                .iter()
                                .zip(row)
                                .map(|(name, value)| {
                                    serde_json::to_value(value).map(|v| (name.to_string(), v))
                                })
                                .collect::<serde_json::Result<_>>()
                        })
                        .collect::<serde_json::Result<_>>()?;
                    println!("{}", serde_json::to_string_pretty(&records)?);
                }
                OutputFormat::Table => {
                    println!("{}", header.join("\t"));
                    println!("{}", "-".repeat(header.len() * 20));
                    for row in &rows {
                        let values: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                        println!("{}", values.join("\t"));
                    }
                    println!();
                    println!(
                        "({} of {} rows)",
                        rows.len(),
                        session.mask()?.selected_count()
                    );
                }
            }
        }
    }

    Ok(())
}

fn open_session(
    input: &Path,
    config: EngineConfig,
    filters: FilterSet,
) -> Result<Session, Box<dyn std::error::Error>> {
    let mut session = Session::new(config);
    session.load_table(RawTable::open(input)?)?;
    if !filters.is_empty() {
        session.set_filters(filters)?;
    }
    Ok(session)
}

fn print_profile(profile: &ColumnProfile) {
    println!("{} ({})", profile.column, profile.semantic_type);
    println!("  Count:    {}", profile.count);
    println!("  Nulls:    {}", profile.null_count);
    match &profile.stats {
        ProfileStats::Numeric(Some(s)) => {
            println!("  Min:      {}", s.min);
            println!("  Max:      {}", s.max);
            println!("  Mean:     {:.4}", s.mean);
            println!("  Std:      {:.4}", s.std_dev);
            println!("  Q1:       {}", s.q1);
            println!("  Median:   {}", s.median);
            println!("  Q3:       {}", s.q3);
        }
        ProfileStats::Text(s) => {
            println!("  Distinct: {}", s.distinct_count);
            for vc in &s.top_values {
                println!("    {:<20} {}", vc.value, vc.count);
            }
        }
        ProfileStats::Boolean(s) => {
            println!("  True:     {}", s.true_count);
            println!("  False:    {}", s.false_count);
        }
        ProfileStats::Timestamp(Some(s)) => {
            println!("  Min:      {}", alice_insight::format_timestamp(s.min));
            println!("  Max:      {}", alice_insight::format_timestamp(s.max));
            println!("  Span:     {:.1}s", s.span_ms as f64 / 1000.0);
        }
        ProfileStats::Numeric(None) | ProfileStats::Timestamp(None) => {
            println!("  (no values selected)");
        }
    }
    println!();
}

fn print_histogram(histogram: &Histogram) {
    println!("{} ({})", histogram.column, histogram.semantic_type);
    let peak = histogram.bins.iter().map(|b| b.count).max().unwrap_or(0).max(1);
    for bin in &histogram.bins {
        let bar = "#".repeat(bin.count * 40 / peak);
        println!(
            "  [{:>12.3}, {:>12.3}) {:>8} {}",
            bin.lower, bin.upper, bin.count, bar
        );
    }
    println!("  Total: {}", histogram.total);
}
