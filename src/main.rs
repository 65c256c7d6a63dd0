//! musicroom CLI entry point

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use musicroom::config::{default_models, load_models, Cli, ModelSpec, Settings};
use musicroom::pipeline::{SeparationRequest, SeparationWorker};
use musicroom::separation::InferenceAdapter;
use musicroom::{Result, SeparatedStems};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli);

    // Validate inputs
    if let Err(e) = validate_inputs(&cli) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    // Build settings from CLI
    let settings = Settings::from_cli(&cli);

    match run(&cli, settings) {
        Ok(count) => {
            println!("Wrote {} stems to {}", count, cli.output.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, mut settings: Settings) -> Result<usize> {
    let models = match &settings.models_path {
        Some(path) => {
            let config = load_models(path)?;
            if let Some(base) = config.separation {
                settings.separation = base.with_cli_overrides(cli);
            }
            config.models
        }
        None => default_models(),
    };

    let adapter = inference_adapter(&models)?;
    let worker = SeparationWorker::spawn(settings.threads, adapter)?;

    let wav = std::fs::read(&settings.input)?;
    info!(
        "Read {} bytes from {}",
        wav.len(),
        settings.input.display()
    );

    let handle = worker.submit(
        1,
        SeparationRequest {
            wav,
            models,
            settings: settings.separation.clone(),
        },
    )?;

    let progress_bar = if settings.show_progress {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Some(pb)
    } else {
        None
    };

    let result = handle.wait_with_progress(|p| {
        if let Some(pb) = &progress_bar {
            pb.set_position(p.percent.round() as u64);
            pb.set_message(p.stage.label());
        }
    });

    if let Some(pb) = &progress_bar {
        match &result {
            Ok(_) => pb.finish_with_message("done"),
            Err(_) => pb.abandon_with_message("failed"),
        }
    }

    let stems = result?;
    write_stems(&stems, &settings.output)?;
    Ok(stems.len())
}

/// Build the learned-model adapter when any model needs one
#[cfg(feature = "onnx")]
fn inference_adapter(models: &[ModelSpec]) -> Result<Option<Arc<dyn InferenceAdapter>>> {
    use musicroom::separation::OnnxInferenceAdapter;

    if models.iter().all(|m| m.source.is_builtin()) {
        return Ok(None);
    }
    let adapter = OnnxInferenceAdapter::new(models)?;
    Ok(Some(Arc::new(adapter)))
}

#[cfg(not(feature = "onnx"))]
fn inference_adapter(_models: &[ModelSpec]) -> Result<Option<Arc<dyn InferenceAdapter>>> {
    Ok(None)
}

/// Write each stem verbatim as `<stem>.wav` (float) and `<stem>_16bit.wav`
fn write_stems(stems: &SeparatedStems, output: &Path) -> Result<()> {
    std::fs::create_dir_all(output)?;
    for (kind, stem) in &stems.stems {
        let name = kind.as_str().to_lowercase();
        std::fs::write(output.join(format!("{}.wav", name)), &stem.wav_f32)?;
        std::fs::write(output.join(format!("{}_16bit.wav", name)), &stem.wav_i16)?;
        info!(
            "{}: {:.2}s at {}Hz, peak {:.3}",
            kind, stem.duration_seconds, stem.sample_rate, stem.peak
        );
    }
    Ok(())
}

fn init_logging(cli: &Cli) {
    let filter = cli.log_level().to_string().to_lowercase();
    let filter = if cli.quiet { "error".to_string() } else { filter };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

fn validate_inputs(cli: &Cli) -> std::result::Result<(), String> {
    // Check input exists
    if !cli.input.is_file() {
        return Err(format!(
            "Input file does not exist: {}\n\n  Tip: musicroom reads 16-bit PCM or 32-bit float WAV.\n  Example:\n    musicroom -i ./mix.wav -o ./stems",
            cli.input.display()
        ));
    }

    if let Some(models) = &cli.models {
        if !models.is_file() {
            return Err(format!(
                "Model configuration does not exist: {}",
                models.display()
            ));
        }
    }

    // Check output parent directory exists (we'll create the output dir itself)
    if let Some(parent) = cli.output.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(format!(
                "Output parent directory does not exist: {}\n\n  Tip: The output directory will be created automatically,\n  but its parent directory must exist.\n  Example: mkdir -p {}",
                parent.display(),
                parent.display()
            ));
        }
    }

    Ok(())
}
