use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use foods_collector::config::{split_keys, Settings};
use foods_collector::fetcher::{extract_items, parse_count, Fetcher, Query};
use foods_collector::ledger::{self, MergeSummary};
use foods_collector::pipeline::{self, Batch, CollectOptions, Progress};
use foods_collector::record::{is_amount_field, Record};

/// Columns shown in the preview table.
const PREVIEW_COLUMNS: &[&str] = &[
    "NUM",
    "MAKER_NM",
    "FOOD_NM_KR",
    "FOOD_CAT1_NM",
    "SERVING_SIZE",
    "NUTRI_AMOUNT_SERVING",
    "Z10500",
];

#[derive(Parser)]
#[command(
    name = "foods_collector",
    about = "Collect sugar-free products from FoodNtrCpntDbInfo02 into a CSV ledger"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch pages from the API, filter, dedup and optionally merge into a ledger
    Collect {
        /// API service key (default: FOODS_SERVICE_KEY / foods.toml)
        #[arg(long)]
        service_key: Option<String>,
        /// Product name filter (FOOD_NM_KR)
        #[arg(long)]
        name: Option<String>,
        /// Maker filter (MAKER_NM)
        #[arg(long)]
        maker: Option<String>,
        /// Top-level category filter (FOOD_CAT1_NM), e.g. "음료류"
        #[arg(long)]
        category: Option<String>,
        /// First page number (pageNo)
        #[arg(long)]
        page_no: Option<String>,
        /// Rows per page (numOfRows, default 100)
        #[arg(long)]
        num_of_rows: Option<String>,
        /// Number of consecutive pages to fetch
        #[arg(long, default_value = "1")]
        pages: u32,
        #[command(flatten)]
        filter: FilterArgs,
        /// Comma-separated dedup keys (default: FOOD_CD,FOOD_NM_KR)
        #[arg(long)]
        dedupe_key: Option<String>,
        /// Disable the composite-key dedup
        #[arg(long)]
        no_dedupe: bool,
        /// Max preview rows to display
        #[arg(short = 'n', long, default_value = "200")]
        preview_rows: usize,
        /// Merge the result into this ledger CSV
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Leave AMT_NUM* columns out of a newly created ledger
        #[arg(long)]
        no_amount_columns: bool,
    },
    /// Merge a saved API response (JSON) into a ledger
    Merge {
        /// JSON file holding a response envelope or a list of records
        input: PathBuf,
        /// Ledger CSV to create or append to
        #[arg(short, long)]
        out: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
        /// Leave AMT_NUM* columns out of a newly created ledger
        #[arg(long)]
        no_amount_columns: bool,
    },
    /// Show ledger statistics
    Stats {
        /// Ledger CSV
        ledger: PathBuf,
    },
}

#[derive(Args)]
struct FilterArgs {
    /// Keep every product, not only sugar-free ones
    #[arg(long)]
    all: bool,
    /// Extra keyword that must appear in the product or maker name
    #[arg(short, long, default_value = "")]
    keyword: String,
}

impl FilterArgs {
    fn options(&self, settings: &Settings, dedupe_keys: Vec<String>) -> CollectOptions {
        CollectOptions {
            only_zero: settings.only_zero && !self.all,
            extra_keyword: self.keyword.trim().to_string(),
            dedupe_keys,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load().context("Failed to load settings")?;
    info!(endpoint = %settings.endpoint, only_zero = settings.only_zero, "Settings loaded");

    let result = match cli.command {
        Commands::Collect {
            service_key,
            name,
            maker,
            category,
            page_no,
            num_of_rows,
            pages,
            filter,
            dedupe_key,
            no_dedupe,
            preview_rows,
            out,
            no_amount_columns,
        } => {
            let service_key = match service_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
                Some(k) => k.to_string(),
                None => match settings.service_key() {
                    Some(k) => k.to_string(),
                    None => bail!("serviceKey is empty: pass --service-key or set FOODS_SERVICE_KEY"),
                },
            };
            let query = Query {
                service_key,
                num_of_rows: parse_count("numOfRows", num_of_rows.as_deref().unwrap_or(""))?
                    .or(Some(settings.num_of_rows)),
                page_no: parse_count("pageNo", page_no.as_deref().unwrap_or(""))?,
                food_name: name,
                maker,
                category,
            };
            let dedupe_keys = if no_dedupe {
                Vec::new()
            } else {
                dedupe_key
                    .as_deref()
                    .map(split_keys)
                    .unwrap_or_else(|| settings.dedupe_keys())
            };
            let opts = filter.options(&settings, dedupe_keys);

            let fetcher = Fetcher::from_settings(&settings)?;
            let pb = spinner();
            let batch = pipeline::collect(&fetcher, &query, pages, &opts, &mut |p| report(&pb, p))?;
            pb.finish_and_clear();

            print_preview(&batch, preview_rows);
            if let Some(out) = out {
                let summary = pipeline::persist(&batch, &out, !no_amount_columns, &mut |_| {})?;
                print_summary(&summary, &out);
            }
            Ok(())
        }
        Commands::Merge {
            input,
            out,
            filter,
            no_amount_columns,
        } => {
            let raw = read_records(&input)?;
            println!("Loaded {} records from {}", raw.len(), input.display());
            let opts = filter.options(&settings, settings.dedupe_keys());
            let batch = pipeline::process(raw, &opts, &mut |_| {});
            println!(
                "Kept {} after filtering, {} after dedup",
                batch.filtered,
                batch.records.len()
            );
            let summary = pipeline::persist(&batch, &out, !no_amount_columns, &mut |_| {})?;
            print_summary(&summary, &out);
            Ok(())
        }
        Commands::Stats { ledger: path } => {
            let index = ledger::inspect(&path)?;
            let amount_cols = index.amount_columns();
            println!("Ledger:    {}", path.display());
            println!("Rows:      {}", index.rows);
            println!("IDs:       {}", index.ids.len());
            println!("Columns:   {}", index.columns.len());
            println!("Amounts:   {}", amount_cols.len());
            let base: Vec<&str> = index
                .columns
                .iter()
                .map(String::as_str)
                .filter(|c| !is_amount_field(c))
                .collect();
            println!("\n{}", base.join(", "));
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn read_records(path: &Path) -> anyhow::Result<Vec<Record>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let data: serde_json::Value = serde_json::from_str(raw.trim_start_matches('\u{feff}'))
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    let records: Vec<Record> = extract_items(&data).iter().map(|obj| Record::from_json(obj)).collect();
    Ok(records)
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn report(pb: &ProgressBar, p: Progress) {
    match p {
        Progress::PageFetched { page, records } => {
            pb.set_message(format!("page {page}: {records} records"));
        }
        Progress::Filtered { kept, zero, total } => {
            pb.println(format!("Filtered {total} -> {kept} ({zero} sugar-free)"));
        }
        Progress::Deduplicated { before, after } => {
            pb.println(format!("Name+amount dedup: {before} -> {after}"));
        }
        Progress::KeyDeduplicated { before, after } => {
            pb.println(format!("Key dedup: {before} -> {after}"));
        }
        Progress::Merged { appended, skipped } => {
            pb.set_message(format!("merged {appended} (skipped {skipped})"));
        }
    }
}

fn print_preview(batch: &Batch, limit: usize) {
    if batch.records.is_empty() {
        println!("No records matched.");
        return;
    }
    println!(
        "{:<10} | {:<16} | {:<28} | {:<10} | {:<8} | {:<8} | {:<8}",
        "NUM", "Maker", "Name", "Category", "Serving", "Nutri", "Total"
    );
    println!("{}", "-".repeat(110));
    let widths = [10, 16, 28, 10, 8, 8, 8];
    for rec in batch.records.iter().take(limit) {
        let cells: Vec<String> = PREVIEW_COLUMNS
            .iter()
            .zip(widths)
            .map(|(col, w)| format!("{:<w$}", truncate(rec.get(col).unwrap_or_default(), w)))
            .collect();
        println!("{}", cells.join(" | "));
    }
    println!(
        "\n{} shown | {} fetched | {} filtered | {} for ledger",
        batch.records.len().min(limit),
        batch.fetched,
        batch.filtered,
        batch.records.len()
    );
}

fn print_summary(summary: &MergeSummary, path: &Path) {
    println!(
        "{}: {} appended, {} skipped -> {} ({} ids known, {} columns)",
        summary.mode,
        summary.appended,
        summary.skipped,
        path.display(),
        summary.total_known,
        summary.columns.len()
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
