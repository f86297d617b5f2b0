use std::path::Path;
use std::sync::atomic::Ordering;
use std::thread;

use anyhow::{Context, Result, bail};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};
use tracing::{info, warn};

use carrierlab::batch::{self, Batch, BatchController, Rejection};
use carrierlab::carrier::CarrierRequest;
use carrierlab::cli::{self, Command};
use carrierlab::config::{self, LoadedConfig};
use carrierlab::constants::{CONTROL_POLL_INTERVAL, MANIFEST_FILE};
use carrierlab::pipeline::events::Completion;
use carrierlab::{checksum, logging, manifest};

fn main() -> Result<()> {
    let cli_opts = cli::parse();
    logging::init_logging(cli_opts.json_logs);

    let loaded =
        config::load_config(cli_opts.config.as_deref()).context("loading configuration")?;
    info!(
        "config_hash={} backend={:?} source_device={}",
        loaded.config_hash,
        loaded.config.backend,
        loaded.config.source_device.display()
    );

    match cli_opts.command {
        Command::New => new_batch(&loaded),
        Command::Session { batch } => session(&loaded, batch.as_deref()),
        Command::Image {
            batch,
            catalog_id,
            title,
            volume,
        } => image_one(
            &loaded,
            &batch,
            CarrierRequest {
                catalog_id,
                title,
                volume_number: volume,
            },
        ),
        Command::Finalize { batch } => finalize(&loaded, &batch),
        Command::Status { batch, verify } => status(&batch, verify),
    }
}

fn new_batch(loaded: &LoadedConfig) -> Result<()> {
    let cfg = &loaded.config;
    std::fs::create_dir_all(&cfg.root_dir)
        .with_context(|| format!("creating {}", cfg.root_dir.display()))?;
    let batch = Batch::create(&cfg.root_dir, &cfg.batch_prefix, env!("CARGO_PKG_VERSION"))?;
    println!("{}", batch.dir().display());
    Ok(())
}

fn controller_for(loaded: &LoadedConfig) -> Result<BatchController> {
    let controller = BatchController::from_config(loaded).context("building batch controller")?;
    let quit = controller.quit_flag();
    ctrlc::set_handler(move || {
        quit.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl+C handler")?;
    Ok(controller)
}

/// Poll for the in-flight carrier until it completes. Quit requests never
/// interrupt it.
fn await_completion(controller: &mut BatchController) -> Option<Completion> {
    let mut quit_noted = false;
    loop {
        if let Some(completion) = controller.poll() {
            return Some(completion);
        }
        if !controller.is_busy() {
            return None;
        }
        if controller.quit_requested() && !quit_noted {
            warn!("quit requested; finishing the current carrier first");
            quit_noted = true;
        }
        thread::sleep(CONTROL_POLL_INTERVAL);
    }
}

fn report_completion(completion: &Completion) -> bool {
    match completion {
        Completion::Finished(report) => {
            println!("{}", report.narrative());
            println!("  output: {}", report.output_dir.display());
            println!(
                "  read errors: {}  bad blocks: {}",
                report.outcome.read_error_count, report.outcome.bad_block_count
            );
            report.success
        }
        Completion::Fatal { job_id, error } => {
            eprintln!("job {job_id}: {error}");
            eprintln!("the batch is halted; fix the manifest before continuing");
            false
        }
    }
}

fn image_one(loaded: &LoadedConfig, batch_dir: &Path, request: CarrierRequest) -> Result<()> {
    let mut controller = controller_for(loaded)?;
    controller.open_batch(batch_dir)?;
    let carrier = controller.submit(&request)?;
    info!("accepted job_id={}", carrier.job_id);

    let success = match await_completion(&mut controller) {
        Some(completion) => report_completion(&completion),
        None => false,
    };
    if let Some(reason) = controller.halt_reason() {
        bail!("batch halted: {reason}");
    }
    controller.close();
    if !success {
        bail!("carrier {} was not imaged successfully", carrier.job_id);
    }
    Ok(())
}

fn finalize(loaded: &LoadedConfig, batch_dir: &Path) -> Result<()> {
    let mut controller = controller_for(loaded)?;
    controller.open_batch(batch_dir)?;
    let finalized = controller.finalize()?;
    if let Some(completion) = &finalized.drained {
        report_completion(completion);
    }
    println!("finalized {}", finalized.dir.display());
    Ok(())
}

fn status(batch_dir: &Path, verify: bool) -> Result<()> {
    let rows = manifest::read_manifest(&batch_dir.join(MANIFEST_FILE))
        .with_context(|| format!("reading manifest of {}", batch_dir.display()))?;
    let state = if batch::is_finalized(batch_dir) {
        "finalized"
    } else {
        "open"
    };
    println!("{} ({state})", batch_dir.display());

    let mut failed_verification = 0usize;
    for row in &rows {
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            row.job_id,
            row.catalog_id,
            row.volume_number,
            row.title,
            if row.success { "ok" } else { "FAILED" },
            row.read_error_count
        );
        if verify {
            match checksum::verify_directory(&batch_dir.join(&row.job_id)) {
                Ok(mismatches) if mismatches.is_empty() => println!("  checksums verified"),
                Ok(mismatches) => {
                    failed_verification += 1;
                    for name in mismatches {
                        println!("  checksum mismatch: {name}");
                    }
                }
                Err(err) => {
                    failed_verification += 1;
                    println!("  cannot verify: {err}");
                }
            }
        }
    }

    let succeeded = rows.iter().filter(|r| r.success).count();
    println!(
        "{} carriers: {} succeeded, {} failed",
        rows.len(),
        succeeded,
        rows.len() - succeeded
    );
    if failed_verification > 0 {
        bail!("{failed_verification} carrier directories failed verification");
    }
    Ok(())
}

fn prompt_carrier(
    theme: &ColorfulTheme,
    previous: Option<&CarrierRequest>,
    catalog_enabled: bool,
) -> Result<Option<CarrierRequest>> {
    if let Some(prev) = previous {
        let label = prev
            .title
            .as_deref()
            .or(prev.catalog_id.as_deref())
            .unwrap_or_default();
        let next_volume = prev.volume_number.saturating_add(1);
        let same_item = Confirm::with_theme(theme)
            .with_prompt(format!("Next carrier is {label}, volume {next_volume}?"))
            .default(false)
            .interact()?;
        if same_item {
            return Ok(Some(CarrierRequest {
                volume_number: next_volume,
                ..prev.clone()
            }));
        }
    }

    let field = if catalog_enabled {
        "Catalog identifier"
    } else {
        "Title"
    };
    let value: String = Input::with_theme(theme)
        .with_prompt(format!("{field} (empty to finalize the batch)"))
        .allow_empty(true)
        .interact_text()?;
    let value = value.trim().to_string();
    if value.is_empty() {
        return Ok(None);
    }
    let volume_number: u32 = Input::with_theme(theme)
        .with_prompt("Volume number")
        .default(1)
        .interact_text()?;

    let (catalog_id, title) = if catalog_enabled {
        (Some(value), None)
    } else {
        (None, Some(value))
    };
    Ok(Some(CarrierRequest {
        catalog_id,
        title,
        volume_number,
    }))
}

/// Returns `false` when the operator gives up waiting for a medium.
fn wait_for_medium(controller: &BatchController, theme: &ColorfulTheme) -> Result<bool> {
    loop {
        if controller.medium_loaded() {
            return Ok(true);
        }
        let retry = Confirm::with_theme(theme)
            .with_prompt(format!(
                "No medium in {}. Load one and retry?",
                controller.source_device().display()
            ))
            .default(true)
            .interact()?;
        if !retry {
            return Ok(false);
        }
    }
}

fn session(loaded: &LoadedConfig, batch_dir: Option<&Path>) -> Result<()> {
    let cfg = &loaded.config;
    let mut controller = controller_for(loaded)?;
    let batch = match batch_dir {
        Some(dir) => controller.open_batch(dir)?,
        None => {
            std::fs::create_dir_all(&cfg.root_dir)
                .with_context(|| format!("creating {}", cfg.root_dir.display()))?;
            controller.create_batch(&cfg.root_dir, &cfg.batch_prefix)?
        }
    };
    println!("batch {}", batch.dir().display());

    let theme = ColorfulTheme::default();
    let mut previous: Option<CarrierRequest> = None;
    let mut finalize_requested = false;

    while !controller.quit_requested() {
        let request = match prompt_carrier(&theme, previous.as_ref(), cfg.enable_catalog_lookup) {
            Ok(Some(request)) => request,
            Ok(None) => {
                finalize_requested = true;
                break;
            }
            Err(err) => {
                warn!("prompt ended: {err}");
                break;
            }
        };

        if !wait_for_medium(&controller, &theme)? {
            continue;
        }

        let carrier = match controller.submit(&request) {
            Ok(carrier) => carrier,
            Err(rejection) => {
                println!("not accepted: {rejection}");
                if matches!(rejection, Rejection::Halted(_) | Rejection::ShuttingDown) {
                    break;
                }
                continue;
            }
        };
        println!("imaging {} (job {})", carrier.title, carrier.job_id);
        previous = Some(request);

        if let Some(completion) = await_completion(&mut controller) {
            report_completion(&completion);
        }
        if controller.halt_reason().is_some() || controller.quit_requested() {
            break;
        }

        Confirm::with_theme(&theme)
            .with_prompt("Remove the medium, then continue")
            .default(true)
            .show_default(false)
            .interact()?;
    }

    if finalize_requested {
        let finalized = controller.finalize()?;
        println!("finalized {}", finalized.dir.display());
    } else {
        if let Some(completion) = controller.close() {
            report_completion(&completion);
        }
        println!("batch left open; resume with `session --batch <dir>`");
    }
    Ok(())
}
