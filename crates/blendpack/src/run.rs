use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use engines::{discover_packs, EnginePack, ShaderKey, ShaderRegistry, UniformMap, MANIFEST_FILE};
use image::ImageFormat;
use renderer::{GpuPower, Renderer, RendererOptions};
use sequencer::{
    DirectoryUploader, FrameExporter, FrameUploader, HttpUploader, MediaSource, PreviewDriver,
    FALLBACK_DURATION,
};
use serde::Serialize;
use settings::{AppConfig, ExportConfig, TransitionSettings};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, EnginesArgs, ExportArgs, OutputArgs, RenderArgs, TransitionArgs};
use crate::clip::Clip;

/// Config file consulted when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "blendpack.toml";

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let registry = build_registry(&cli.engine_packs)?;

    match cli.command {
        Command::Render(args) => render(&config, &registry, args).await,
        Command::Export(args) => export(&config, &registry, args).await,
        Command::Engines(args) => list_engines(&registry, &args),
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    let config = AppConfig::load_or_default(path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    debug!(
        path = %path.display(),
        safety_margin = config.safety_margin,
        upload_concurrency = config.export.upload_concurrency,
        "resolved pipeline config"
    );
    Ok(config)
}

/// Built-in engines followed by every pack found under `packs`.
pub fn build_registry(packs: &[PathBuf]) -> Result<ShaderRegistry> {
    let mut registry = ShaderRegistry::with_builtin();
    for root in packs {
        let loaded = if root.join(MANIFEST_FILE).is_file() {
            vec![EnginePack::load(root)
                .with_context(|| format!("failed to load engine pack {}", root.display()))?]
        } else {
            discover_packs(root)
        };
        if loaded.is_empty() {
            warn!(path = %root.display(), "no engine packs found");
        }
        for pack in loaded {
            for warning in pack.warnings() {
                warn!(engine = pack.engine(), "{warning}");
            }
            pack.register_into(&mut registry);
            info!(engine = pack.engine(), path = %pack.root().display(), "registered engine pack");
        }
    }
    Ok(registry)
}

/// Loads the settings file, applies flag overrides and clamps the result.
pub fn resolve_settings(args: &TransitionArgs) -> Result<TransitionSettings> {
    let mut settings = match &args.settings {
        Some(path) => TransitionSettings::load(path)
            .with_context(|| format!("failed to load settings {}", path.display()))?,
        None => TransitionSettings::default(),
    };

    if let Some(flavor) = args.flavor {
        flavor.apply(&mut settings);
    }
    if let Some(engine) = &args.engine {
        settings.engine = engine.clone();
    }
    if let Some(variant) = &args.variant {
        settings.variant = variant.clone();
    }
    if let Some(duration) = args.duration {
        settings.duration = duration;
    }
    if let Some(fps) = args.fps {
        settings.fps = fps;
    }
    if let Some(intensity) = args.intensity {
        settings.intensity = intensity;
    }
    if let Some(easing) = &args.easing {
        settings.easing = easing.clone();
    }
    if let Some(start) = args.clip_a_start {
        settings.clip_a_start = start;
    }
    if let Some(start) = args.clip_b_start {
        settings.clip_b_start = start;
    }
    if args.full {
        settings.export_full_videos = true;
    }
    if args.source_fps {
        settings.use_source_fps = true;
    }
    for (name, value) in &args.uniforms {
        settings.set_uniform(name.clone(), value.clone());
    }

    Ok(settings.sanitized())
}

fn renderer_options(config: &AppConfig, output: &OutputArgs) -> RendererOptions {
    RendererOptions {
        power: if output.low_power {
            GpuPower::Low
        } else {
            GpuPower::High
        },
        force_software: output.software,
        texture_pool: config.renderer.texture_pool,
    }
}

fn clip_duration(clip: &Clip) -> f64 {
    clip.duration()
        .filter(|duration| duration.is_finite() && *duration > 0.0)
        .unwrap_or(FALLBACK_DURATION)
}

async fn render(config: &AppConfig, registry: &ShaderRegistry, args: RenderArgs) -> Result<()> {
    let settings = resolve_settings(&args.transition)?;
    let sources = &args.sources;
    let mut clip_a = Clip::open(&sources.clip_a, sources.sequence_fps, sources.still_duration)?;
    let mut clip_b = Clip::open(&sources.clip_b, sources.sequence_fps, sources.still_duration)?;

    let driver = PreviewDriver::new(
        &settings,
        registry,
        clip_duration(&clip_a),
        clip_duration(&clip_b),
        config.safety_margin,
    )
    .context("invalid transition timeline")?;

    let (width, height) = args.output_args.size;
    let mut renderer = Renderer::new(width, height, &renderer_options(config, &args.output_args));
    if !renderer.is_supported() {
        bail!("no GPU adapter available; cannot render a {width}x{height} frame");
    }
    driver.prepare(&mut renderer, registry);

    let sample = driver.sample(args.position);
    renderer.pin_time(Some(sample.current_time as f32));
    let frame = driver
        .render_live(
            &mut renderer,
            &mut clip_a,
            &mut clip_b,
            args.position,
            &CancellationToken::new(),
        )
        .await;
    if !frame.drawn {
        bail!("neither clip produced a frame at position {}", args.position);
    }

    let pixels = renderer.read_pixels().context("failed to read rendered frame")?;
    if let Some(parent) = args.output.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    pixels
        .save_with_format(&args.output, ImageFormat::Png)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    info!(
        path = %args.output.display(),
        shader = %driver.key(),
        progress = frame.eased_progress,
        phase = ?frame.sample.phase,
        "rendered frame"
    );
    Ok(())
}

async fn export(config: &AppConfig, registry: &ShaderRegistry, args: ExportArgs) -> Result<()> {
    let settings = resolve_settings(&args.transition)?;
    let mut export_config = config.export.clone();
    if let Some(format) = args.format {
        export_config.format = format;
    }
    if let Some(subfolder) = &args.subfolder {
        export_config.subfolder = subfolder.clone();
    }
    let subfolder = export_config.subfolder.clone();

    match (&args.out_dir, &args.host) {
        (Some(dir), _) => {
            let uploader = DirectoryUploader::new(dir, subfolder);
            info!(path = %uploader.output_dir().display(), "exporting to directory");
            export_with(uploader, export_config, config, registry, settings, &args).await
        }
        (None, Some(host)) => {
            let uploader = HttpUploader::new(host, subfolder)
                .with_context(|| format!("invalid upload host {host}"))?;
            info!(endpoint = %uploader.endpoint(), "exporting to host");
            export_with(uploader, export_config, config, registry, settings, &args).await
        }
        (None, None) => bail!("export needs --out-dir or --host"),
    }
}

async fn export_with<U: FrameUploader>(
    uploader: U,
    export_config: ExportConfig,
    config: &AppConfig,
    registry: &ShaderRegistry,
    settings: TransitionSettings,
    args: &ExportArgs,
) -> Result<()> {
    let sources = &args.sources;
    let clip_a = Clip::open(&sources.clip_a, sources.sequence_fps, sources.still_duration)?;
    let clip_b = Clip::open(&sources.clip_b, sources.sequence_fps, sources.still_duration)?;

    let options = renderer_options(config, &args.output_args);
    let exporter = FrameExporter::new(
        export_config,
        config.safety_margin,
        uploader,
        move |width, height| Renderer::new(width, height, &options),
    );

    let handle = exporter.handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; letting issued uploads finish");
            handle.abort();
        }
    });

    let (width, height) = args.output_args.size;
    let mut next_report = 0.1;
    let result = exporter
        .export_all_frames(
            &clip_a,
            &clip_b,
            &settings,
            registry,
            width,
            height,
            |progress| {
                if progress >= next_report {
                    info!(percent = (progress * 100.0).round(), "export progress");
                    while next_report <= progress {
                        next_report += 0.1;
                    }
                }
            },
        )
        .await;
    interrupt.abort();
    let frames = result.context("export failed")?;

    let status = exporter.status();
    println!("exported {} of {} frames", frames.len(), status.frame_count);

    if let Some(path) = &args.save_settings {
        let mut saved = settings;
        saved.pre_rendered_frames = Some(frames);
        let json = saved.to_json_string().context("failed to serialise settings")?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "saved settings with exported frames");
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct EngineListing<'a> {
    engine: &'a str,
    variants: Vec<VariantListing<'a>>,
}

#[derive(Debug, Serialize)]
struct VariantListing<'a> {
    name: &'a str,
    description: &'a str,
    uniforms: UniformMap,
}

fn engine_listings(registry: &ShaderRegistry) -> Vec<EngineListing<'_>> {
    registry
        .engines()
        .map(|engine| EngineListing {
            engine,
            variants: registry
                .variants(engine)
                .iter()
                .map(|variant| {
                    let key = ShaderKey::new(engine, variant.as_str());
                    VariantListing {
                        name: variant,
                        description: registry.variant_description(&key),
                        uniforms: registry.uniforms(&key),
                    }
                })
                .collect(),
        })
        .collect()
}

fn list_engines(registry: &ShaderRegistry, args: &EnginesArgs) -> Result<()> {
    let listings = engine_listings(registry);
    if args.json {
        let json = serde_json::to_string_pretty(&listings).context("failed to serialise engines")?;
        println!("{json}");
        return Ok(());
    }

    for listing in &listings {
        println!("{}", listing.engine);
        for variant in &listing.variants {
            println!("  {:<12} {}", variant.name, variant.description);
        }
    }
    let stats = registry.stats();
    println!(
        "{} engines, {} variants",
        stats.engine_count, stats.total_variants
    );
    Ok(())
}
