use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tarjuman::textutil::is_arabic;
use tarjuman::{EnsembleConfig, EnsembleOutcome, TranslateJob, TranslationEnsemble};

#[derive(Parser)]
#[command(name = "tarjuman")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-backend Arabic translation ensemble with quality-based arbitration", long_about = None)]
struct Cli {
    /// File containing the source text; reads stdin when omitted
    input: Option<PathBuf>,

    /// Source language code
    #[arg(short, long, default_value = "ar")]
    source_lang: String,

    /// Target language code
    #[arg(short, long, default_value = "en")]
    target_lang: String,

    /// Optional context passed to the backends for the first chunk
    #[arg(long)]
    context: Option<String>,

    /// Use the first available backend in preference order instead of
    /// running the full ensemble
    #[arg(long)]
    no_ensemble: bool,

    /// Always run every backend and pick the best, even when a single
    /// call would do
    #[arg(long)]
    force_multi: bool,

    /// Disable the LLM judge tiebreak
    #[arg(long)]
    no_judge: bool,

    /// Maximum characters per chunk
    #[arg(long)]
    max_chunk_chars: Option<usize>,

    /// Emit the full outcome (candidates + quality report) as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Only show warnings by default; RUST_LOG=info for more detail
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    let text = read_input(cli.input.as_deref())?;
    if cli.source_lang == "ar" && !is_arabic(&text) {
        tracing::warn!("input does not look like Arabic text; translating anyway");
    }

    let mut config = EnsembleConfig::resolve()?;
    if cli.no_ensemble {
        config.enable_ensemble = false;
    }
    if cli.force_multi {
        config.force_multi_method = true;
    }
    if cli.no_judge {
        config.judge_enabled = false;
    }
    if let Some(max_chunk_chars) = cli.max_chunk_chars {
        config.max_chunk_chars = max_chunk_chars;
    }

    let ensemble = TranslationEnsemble::new(config)?;
    let job = TranslateJob::new(text, &cli.source_lang, &cli.target_lang)
        .with_context(cli.context.clone());

    let outcome = ensemble.translate(&job).await.context("translation failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    Ok(())
}

fn read_input(path: Option<&std::path::Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

fn print_outcome(outcome: &EnsembleOutcome) {
    println!("{}", outcome.text);

    eprintln!();
    eprintln!(
        "{} {} ({:.1}s)",
        style("winner:").bold(),
        style(&outcome.best.backend_id).green().bold(),
        outcome.best.latency.as_secs_f64()
    );

    if let Some(report) = &outcome.report {
        for (backend, score) in report.ranking() {
            eprintln!("  {:<8} {:.3}", backend, score);
        }
        if report.judge_used {
            eprintln!("{} {}", style("judge:").bold(), report.reasoning);
        }
    }
}
