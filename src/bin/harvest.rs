use clap::{Parser, ValueEnum};
use review_harvest::config::{load_config, save_config};
use review_harvest::paths::OutputPaths;
use review_harvest::pipeline::{listing_target, run_targets_concurrently, RunOptions, TargetSummary};
use review_harvest::session::{HttpFetcher, HttpSession};
use review_harvest::webdriver::{DriverBrowser, WebDriverOptions, WebDriverSession};
use review_harvest::{HarvestError, Result};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BrowserArg {
    Chrome,
    Firefox,
}

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Crawl review listings per city and collect items and images")]
struct Cli {
    /// City slugs, e.g. `london new-york`
    #[arg(required = true)]
    cities: Vec<String>,

    /// Output directory (items JSON, images, logs, config)
    #[arg(long, default_value = "output")]
    out: PathBuf,

    /// Stop after this many detail pages per city
    #[arg(long)]
    max: Option<usize>,

    /// Inclusive lower bound, YYYY-MM-DD
    #[arg(long)]
    start_date: Option<String>,

    /// Inclusive upper bound, YYYY-MM-DD
    #[arg(long)]
    end_date: Option<String>,

    /// Keep existing items and skip their pages
    #[arg(long)]
    incremental: bool,

    #[arg(long)]
    no_download: bool,

    /// WebDriver endpoint such as http://127.0.0.1:9515. Plain HTTP when absent.
    #[arg(long)]
    webdriver: Option<String>,

    #[arg(long, value_enum, default_value_t = BrowserArg::Chrome)]
    browser: BrowserArg,

    /// Show the browser window (WebDriver only)
    #[arg(long)]
    headed: bool,

    /// Write the effective config to <out>/config/harvest.json before running
    #[arg(long)]
    write_config: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(summaries) => {
            let mut failed = false;
            for (city, result) in summaries {
                match result {
                    Ok(summary) => match serde_json::to_string(&summary) {
                        Ok(line) => println!("{line}"),
                        Err(e) => eprintln!("{city}: {e}"),
                    },
                    Err(e) => {
                        failed = true;
                        eprintln!("{city}: {e}");
                    }
                }
            }
            if failed {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            if e.is_fatal_input() {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

fn run(cli: Cli) -> Result<Vec<(String, Result<TargetSummary>)>> {
    let paths = OutputPaths::new(cli.out.clone());
    paths.ensure_dirs()?;
    let config = load_config(&paths)?;
    if cli.write_config {
        save_config(&paths, &config)?;
    }

    let options = RunOptions::new(
        cli.max,
        cli.start_date.as_deref(),
        cli.end_date.as_deref(),
        cli.incremental,
        cli.no_download,
    )?;
    let targets = cli
        .cities
        .iter()
        .map(|city| listing_target(&config, city, options.max_items))
        .collect::<Result<Vec<_>>>()?;
    if targets.is_empty() {
        return Err(HarvestError::InvalidTarget("no cities given".to_string()));
    }

    let fetcher = HttpFetcher::new(&config);
    let results = match cli.webdriver {
        Some(endpoint) => {
            let driver = WebDriverOptions {
                endpoint,
                browser: match cli.browser {
                    BrowserArg::Chrome => DriverBrowser::Chrome,
                    BrowserArg::Firefox => DriverBrowser::Firefox,
                },
                headless: !cli.headed,
            };
            run_targets_concurrently(
                &config,
                &paths,
                &targets,
                &options,
                |_| WebDriverSession::start(&driver, &config),
                &fetcher,
            )
        }
        None => run_targets_concurrently(
            &config,
            &paths,
            &targets,
            &options,
            |_| Ok(HttpSession::new(&config)),
            &fetcher,
        ),
    };
    Ok(results)
}
