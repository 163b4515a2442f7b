use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, info};
use serde_json::Value;
use std::path::Path;

use livefx::cli::{Args, Command};
use livefx::config::{self, PathConfig, PluginConfig};
use livefx::core::geometry::RealRect;
use livefx::core::params::{EffectParameters, KEY_PARAMS, ParameterStore, decode_params};
use livefx::host::memory::{MemoryHost, MemoryRecord};
use livefx::{HostStatus, ImageBuffer, Plugin};

fn init_logging(args: &Args, paths: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt.clone().unwrap_or_else(|| paths.data_file(config::LOG_FILE));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .filter_module("egui", log::LevelFilter::Info) // Suppress egui DEBUG spam
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .filter_module("egui", log::LevelFilter::Info)
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn check(selector: &str, status: HostStatus) -> Result<()> {
    if !status.is_ok() {
        bail!("{} failed with {}", selector, status);
    }
    Ok(())
}

fn record_from(effect_id: &str, params: Option<&str>) -> Result<MemoryRecord> {
    let params = match params {
        Some(text) => decode_params(text).context("Invalid --params")?,
        None => Value::Object(Default::default()),
    };
    let mut record = MemoryRecord::default();
    ParameterStore::save(&mut record, &EffectParameters::new(effect_id, params))?;
    Ok(record)
}

fn load_image(path: &Path) -> Result<ImageBuffer> {
    let img = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?.into_rgba8();
    let (w, h) = img.dimensions();
    Ok(ImageBuffer::rgba(w, h, img.into_raw())?)
}

fn save_image(path: &Path, buffer: &ImageBuffer) -> Result<()> {
    let (w, h) = buffer.resolution();
    let img = image::RgbaImage::from_raw(w, h, buffer.data().to_vec())
        .context("Result buffer does not match its dimensions")?;
    img.save(path).with_context(|| format!("Failed to write {}", path.display()))
}

fn list(plugin: &Plugin) {
    for effect in plugin.effects() {
        println!("{:<24} {:<28} {}", effect.id, effect.name, effect.title);
    }
}

fn apply(
    plugin: &mut Plugin,
    host: &MemoryHost,
    effect: &str,
    input: &Path,
    output: &Path,
    params: Option<&str>,
    dpi: f64,
) -> Result<()> {
    let image = load_image(input)?;
    let (w, h) = image.resolution();
    // Art bounds in points, so the host rasterizes back to the input size
    let scale = 72.0 / dpi;
    let art = host.add_image(RealRect::new(0.0, 0.0, w as f64 * scale, h as f64 * scale), &image);
    let record = record_from(effect, params)?;
    let name = format!("{}{}", plugin.config().effect_prefix, effect);

    let outcome = match plugin.on_go(&name, &record, art) {
        Ok(outcome) => outcome,
        Err(status) => bail!("GoLiveEffect failed with {}", status),
    };

    let result = host.raster_image(outcome.art).context("Result art is not a raster")?;
    info!(
        "{}: {}x{} -> {}x{} at {} dpi ({})",
        effect,
        w,
        h,
        result.width(),
        result.height(),
        outcome.dpi,
        outcome.status
    );
    save_image(output, &result)?;
    check("Effect", outcome.status)
}

#[cfg(feature = "gui")]
fn edit(plugin: &mut Plugin, effect: &str, params: Option<&str>, new_instance: bool) -> Result<()> {
    use livefx::host::EditContext;
    use livefx::ui::egui_render::run_edit_window;

    let mut record = record_from(effect, params)?;
    let name = format!("{}{}", plugin.config().effect_prefix, effect);
    let title = plugin
        .effects()
        .iter()
        .find(|e| e.id == effect)
        .map(|e| e.title.clone())
        .unwrap_or_else(|| effect.to_string());

    let outcome = plugin.dispatch("EditLiveEffectParameters", |p| {
        p.edit_parameters_with(&name, &mut record, EditContext(1), new_instance, |session, io| {
            run_edit_window(session, io, &title)
        })
    });
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(status) => bail!("EditLiveEffectParameters failed with {}", status),
    };

    info!("Edit closed: {:?}", outcome);
    println!("{}", record.get(KEY_PARAMS).unwrap_or("{}"));
    Ok(())
}

#[cfg(not(feature = "gui"))]
fn edit(_plugin: &mut Plugin, _effect: &str, _params: Option<&str>, _new_instance: bool) -> Result<()> {
    bail!("livefx was built without the `gui` feature")
}

fn main() -> Result<()> {
    let args = Args::parse();

    let paths = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = paths.ensure_dirs() {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }
    init_logging(&args, &paths)?;

    info!("LiveFX {} starting...", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);
    info!("Config path: {}", paths.config_file(config::CONFIG_FILE).display());

    let plugin_config = PluginConfig::load_from(&paths);
    let host = match &args.command {
        Command::Apply { dpi, .. } if *dpi <= 0.0 => bail!("--dpi must be positive"),
        Command::Apply { dpi, .. } => MemoryHost::new().with_effects_resolution(*dpi),
        _ => MemoryHost::new(),
    };

    let mut plugin = Plugin::new(plugin_config, host.services());
    check("StartupPlugin", plugin.on_startup())?;

    let result = match &args.command {
        Command::List => {
            list(&plugin);
            Ok(())
        }
        Command::Apply { effect, input, output, params, dpi } => {
            apply(&mut plugin, &host, effect, input, output, params.as_deref(), *dpi)
        }
        Command::Edit { effect, params, new_instance } => edit(&mut plugin, effect, params.as_deref(), *new_instance),
    };

    for alert in host.alerts() {
        eprintln!("alert: {}", alert);
    }
    let shutdown = plugin.on_shutdown();
    result?;
    check("ShutdownPlugin", shutdown)
}
