use clap::Parser;
use review_harvest::merge::merge_files;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "merge_media")]
#[command(about = "Attach media records from a separate pass onto primary items")]
struct Cli {
    /// Primary items JSON (bare array or {"items": [...]})
    #[arg(long)]
    items: PathBuf,

    /// Media records JSON: rows of {url, media|images}
    #[arg(long)]
    media: PathBuf,

    /// Merged output JSON
    #[arg(long)]
    out: PathBuf,

    /// Also print up to five unmatched URLs
    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let outcome = match merge_files(&cli.items, &cli.media, &cli.out) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("error: {e}");
            return if e.is_fatal_input() {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            };
        }
    };

    match serde_json::to_string_pretty(&outcome.report) {
        Ok(report) => println!("{report}"),
        Err(e) => eprintln!("error: {e}"),
    }
    if cli.debug {
        for url in outcome.missing_urls.iter().take(5) {
            eprintln!("missing: {url}");
        }
    }
    ExitCode::SUCCESS
}
