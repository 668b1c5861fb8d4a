#![warn(clippy::pedantic)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tilepaint_core::changes::ChangeInfo;
use tilepaint_core::provider::DocumentProvider;
use tilepaint_core::queue::DocumentObserver;
use tilepaint_core::tile::Surface;
use tilepaint_core::DocumentID;

pub mod config;
pub mod script;

/// Logs what every batch did.
struct LogObserver;
impl DocumentObserver for LogObserver {
    fn on_changes(&self, document: DocumentID, changes: &[ChangeInfo]) {
        for change in changes {
            log::debug!("{document}: {change:?}");
        }
    }
}

struct Args {
    scripts: Vec<PathBuf>,
    settings: Option<PathBuf>,
}
impl Args {
    /// `[--settings <path>] <script>...`. Paths are `OsString`s, the system handles encoding.
    fn parse() -> anyhow::Result<Self> {
        let mut args = std::env::args_os().skip(1);
        let mut scripts = Vec::new();
        let mut settings = None;
        while let Some(arg) = args.next() {
            if arg == "--settings" {
                let path = args.next().context("--settings needs a path")?;
                settings = Some(path.into());
            } else {
                scripts.push(arg.into());
            }
        }
        if scripts.is_empty() {
            anyhow::bail!("usage: tilepaint [--settings <path>] <script.toml>...");
        }
        Ok(Self { scripts, settings })
    }
}

fn write_png(path: &Path, surface: &Surface) -> anyhow::Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("creating {path:?}"))?;
    let mut encoder = png::Encoder::new(
        std::io::BufWriter::new(file),
        surface.width(),
        surface.height(),
    );
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&surface.to_straight_bytes())?;
    writer.finish()?;
    Ok(())
}

/// Replay one script into a fresh document and write the result, returning where it went.
fn run_script(provider: &DocumentProvider, path: &Path) -> anyhow::Result<PathBuf> {
    let script = script::Script::read(path)?;
    let id = provider.insert_new(script.size)?;
    let queue = provider.get(id).context("document closed while running")?;
    queue.add_observer(Arc::new(LogObserver));

    let output = queue.document().read().graph.output();
    let mut labels = script::Labels::new(output);
    for command in script::compile(script.steps, &mut labels)? {
        match command {
            script::Command::Submit(mut actions) if actions.len() == 1 => {
                if let Some(action) = actions.pop() {
                    queue.submit(tilepaint_core::actions::ActionSource::Automated, action);
                }
            }
            script::Command::Submit(actions) => {
                queue.submit_group(tilepaint_core::actions::ActionSource::Automated, actions);
            }
            script::Command::Undo => queue.undo(),
            script::Command::Redo => queue.redo(),
        }
    }

    let reports = provider
        .inspect(id, |queue| queue.process())
        .context("document closed while running")??;
    let rejected: usize = reports.iter().map(|report| report.rejected.len()).sum();
    if rejected != 0 {
        log::warn!("{path:?}: {rejected} actions rejected");
    }
    log::info!(
        "{path:?}: {} batches, {} undo steps, {} bytes of pixels",
        reports.len(),
        queue.undo_len(),
        queue.document().read().memory_usage()
    );

    let surface = queue.renderer().render_document(script.resolution)?;
    let out = script
        .output
        .unwrap_or_else(|| path.with_extension("png"));
    write_png(&out, &surface)?;
    provider.close(id);
    Ok(out)
}

fn main() -> anyhow::Result<()> {
    let has_term = std::io::IsTerminal::is_terminal(&std::io::stdin());
    // Log to a terminal, if available. Else, log to "log.out" in the working directory.
    if has_term {
        env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        let _ = simple_logging::log_to_file("log.out", log::LevelFilter::Debug);
    }

    let args = Args::parse()?;
    let settings = config::Settings::load(args.settings.as_deref());
    // Never overwrites, so a malformed file is left for the user to fix.
    if args.settings.is_none() {
        if let Err(e) = settings.save_if_missing() {
            log::warn!("Failed to save settings:\n{e:?}");
        }
    }
    if settings.did_fail_to_load() {
        log::info!("running with default engine settings");
    }
    let provider = DocumentProvider::new(settings.engine.clone());

    let succeeded = {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
        // Documents are independent, so scripts run side by side.
        let had_success = std::sync::atomic::AtomicBool::new(false);
        args.scripts.into_par_iter().for_each(|path| {
            match run_script(&provider, &path) {
                Err(e) => log::error!("failed to run {path:?}: {e:#}"),
                Ok(out) => {
                    log::info!("wrote {out:?}");
                    had_success.store(true, std::sync::atomic::Ordering::Relaxed);
                }
            }
        });
        had_success.into_inner()
    };
    if !succeeded {
        anyhow::bail!("every script failed");
    }
    Ok(())
}
