use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use careers_crawler::source::{builtin_names, DedupeKey};
use careers_crawler::{
    read_records, render_text, CancelFlag, ChromeSession, CrawlPipeline, LaunchConfig,
    ListingSource, OutputFormat, OutputTarget, RunReport,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "careers-crawler", version, about = "Scrapes paginated career sites into CSV/JSON")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape a listing and its detail pages
    Scrape(ScrapeArgs),
    /// Re-render a saved CSV/JSON file as labelled text blocks
    Render(RenderArgs),
    /// List built-in sources
    Sources,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Built-in source name (see `sources`)
    #[arg(long)]
    source: Option<String>,

    /// Source definition file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl SourceArgs {
    fn load(&self) -> anyhow::Result<ListingSource> {
        match (&self.source, &self.config) {
            (Some(name), _) => Ok(ListingSource::builtin(name)?),
            (None, Some(path)) => ListingSource::load(path)
                .with_context(|| format!("loading {}", path.display())),
            (None, None) => bail!("either --source or --config is required"),
        }
    }
}

#[derive(Args)]
struct ScrapeArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Override the listing URL
    #[arg(long, env = "CRAWLER_URL")]
    url: Option<String>,

    /// Stop after this many pages
    #[arg(long, env = "CRAWLER_MAX_PAGES", value_parser = clap::value_parser!(u32).range(1..))]
    max_pages: Option<u32>,

    /// Run Chrome without a window
    #[arg(long, env = "CRAWLER_HEADLESS", default_value_t = true, action = clap::ArgAction::Set)]
    headless: bool,

    #[arg(long, value_enum, default_value_t = FormatArg::Both)]
    format: FormatArg,

    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Drop repeated records when saving
    #[arg(long, value_enum)]
    dedupe_by: Option<DedupeArg>,
}

#[derive(Args)]
struct RenderArgs {
    /// CSV or JSON file written by `scrape`
    #[arg(long)]
    input: PathBuf,

    #[arg(long)]
    output: PathBuf,

    /// Source whose column names the input uses; English names if omitted
    #[arg(long, conflicts_with = "config")]
    source: Option<String>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Json,
    Both,
}

impl FormatArg {
    fn formats(self) -> &'static [OutputFormat] {
        match self {
            Self::Csv => &[OutputFormat::Csv],
            Self::Json => &[OutputFormat::Json],
            Self::Both => &[OutputFormat::Csv, OutputFormat::Json],
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DedupeArg {
    DetailUrl,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "careers_crawler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command {
        Command::Scrape(args) => scrape(args),
        Command::Render(args) => render(args),
        Command::Sources => {
            for name in builtin_names() {
                let source = ListingSource::builtin(name)?;
                println!("{name:<10} {}  {}", source.company, source.url);
            }
            Ok(())
        }
    }
}

fn scrape(args: ScrapeArgs) -> anyhow::Result<()> {
    let mut source = args.source.load()?;
    if let Some(url) = &args.url {
        source.override_url(url)?;
    }
    if let Some(DedupeArg::DetailUrl) = args.dedupe_by {
        source.output.dedupe_by = Some(DedupeKey::DetailUrl);
    }

    let cancel = CancelFlag::new();
    let handler = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler.cancel()) {
        warn!(error = %e, "could not install Ctrl+C handler");
    }

    let mut session = ChromeSession::launch(&LaunchConfig {
        headless: args.headless,
        ..Default::default()
    })
    .context("launching Chrome")?;

    let targets: Vec<OutputTarget> = args
        .format
        .formats()
        .iter()
        .map(|format| OutputTarget::in_dir(&args.output_dir, &source.name, *format))
        .collect();

    let report = CrawlPipeline::new(&source)
        .with_cancel(cancel)
        .max_pages(args.max_pages.map(|n| n as usize))
        .crawl(&mut session)?
        .save(&targets)?;

    print_summary(&report);
    Ok(())
}

fn render(args: RenderArgs) -> anyhow::Result<()> {
    let columns = match (&args.source, &args.config) {
        (None, None) => Default::default(),
        (source, config) => SourceArgs {
            source: source.clone(),
            config: config.clone(),
        }
        .load()?
        .output
        .columns,
    };

    let records = read_records(&args.input, &columns)?;
    fs::write(&args.output, render_text(&records, &columns))
        .with_context(|| format!("writing {}", args.output.display()))?;

    info!(records = records.len(), output = %args.output.display(), "rendered");
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!("✅ {}: {} records", report.source, report.records);
    match report.total_pages {
        Some(total) => println!("   pages: {}/{}", report.pages_scraped, total),
        None => println!("   pages: {}", report.pages_scraped),
    }
    println!("   detail failures: {}", report.detail_failures);
    println!("   row warnings: {}", report.row_warnings);
    println!("   stopped: {}", report.stop);
    println!("   elapsed: {:.1}s", report.elapsed.as_secs_f64());
    for path in &report.outputs {
        println!("   saved: {}", path.display());
    }
}
