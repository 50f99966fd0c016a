//! interview-infer: read a prompt from a file, print one completion.
//!
//! Invocation: `interview-infer <prompt_file>`. Stdout carries exactly the
//! generated completion (newline-terminated) so a host process can capture
//! it verbatim; every diagnostic goes to stderr. Exit code 0 means a
//! completion was printed; 1 means wrong arguments, a missing prompt file,
//! or a setup failure.

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use tracing::info;

use interview_infer::config::{Cli, ModelConfig, SamplingConfig};
use interview_infer::inference::engine::InferenceAdapter;

fn main() {
    // clap reports usage errors with status 2; the subprocess contract is
    // status 1 for every failure, so parsing goes through try_parse.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            std::process::exit(0);
        }
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    let filter = if cli.verbose {
        "interview_infer=debug"
    } else {
        "interview_infer=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    if let Err(e) = run(cli) {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    info!("interview-infer v{}", env!("CARGO_PKG_VERSION"));

    let prompt = std::fs::read_to_string(&cli.prompt_file).with_context(|| {
        format!(
            "Prompt file {} not found or unreadable",
            cli.prompt_file.display()
        )
    })?;
    let prompt = prompt.trim();

    let model = ModelConfig {
        adapter_dir: cli.adapter_dir.clone(),
        ..ModelConfig::default()
    };
    let mut sampling = SamplingConfig::default();
    if let Some(seed) = cli.seed {
        sampling.seed = seed;
    }

    let adapter = InferenceAdapter::new(&model, sampling).context("Model loading error")?;

    let response = adapter.generate_response(prompt, cli.max_tokens);
    println!("{response}");
    Ok(())
}
