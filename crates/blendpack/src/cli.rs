use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use engines::UniformValue;
use settings::{Flavor, FrameFormat};

#[derive(Parser, Debug)]
#[command(
    name = "blendpack",
    author,
    version,
    about = "Render GLSL video transitions and export them frame by frame"
)]
pub struct Cli {
    /// Pipeline tuning file (TOML). Missing files fall back to defaults.
    #[arg(long, global = true, value_name = "FILE", env = "BLENDPACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Extra engine pack: a directory holding `engine.toml`, or a directory of such packs.
    #[arg(long = "engine-pack", global = true, value_name = "DIR")]
    pub engine_packs: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render one composited frame at a timeline position to a PNG.
    Render(RenderArgs),
    /// Render every frame of the transition and store it in a directory or on a host.
    Export(ExportArgs),
    /// List registered engines and their variants.
    Engines(EnginesArgs),
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Outgoing clip: an image file or a directory of numbered frames.
    #[arg(value_name = "CLIP_A")]
    pub clip_a: PathBuf,

    /// Incoming clip: an image file or a directory of numbered frames.
    #[arg(value_name = "CLIP_B")]
    pub clip_b: PathBuf,

    /// Playback rate of frame directories.
    #[arg(long, value_name = "FPS", default_value_t = 30.0)]
    pub sequence_fps: f64,

    /// Length in seconds given to still image clips.
    #[arg(long, value_name = "SECONDS", default_value_t = 5.0)]
    pub still_duration: f64,
}

/// Transition settings: a persisted settings file plus per-field overrides.
#[derive(Args, Debug, Default)]
pub struct TransitionArgs {
    /// Settings JSON file as stored by the host.
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    #[arg(long)]
    pub engine: Option<String>,

    #[arg(long)]
    pub variant: Option<String>,

    /// Transition length in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub duration: Option<f64>,

    #[arg(long)]
    pub fps: Option<u32>,

    /// Intensity and curve preset: clean, dreamy, gritty or punchy.
    /// `--intensity` still overrides the preset's intensity.
    #[arg(long)]
    pub flavor: Option<Flavor>,

    #[arg(long)]
    pub intensity: Option<f64>,

    /// Named easing, e.g. `easeInOutCubic`.
    #[arg(long)]
    pub easing: Option<String>,

    /// Clip A start in seconds; negative values count from the end.
    #[arg(long, value_name = "SECONDS", allow_hyphen_values = true)]
    pub clip_a_start: Option<f64>,

    /// Clip B start in seconds; negative values count from the end.
    #[arg(long, value_name = "SECONDS", allow_hyphen_values = true)]
    pub clip_b_start: Option<f64>,

    /// Cover all of clip A, the transition and all of clip B.
    #[arg(long)]
    pub full: bool,

    /// Prefer the clips' own frame rate over `--fps`.
    #[arg(long)]
    pub source_fps: bool,

    /// Shader uniform override (repeatable): `NAME=1.5`, `NAME=true`, `NAME=0.2,0.4`.
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_uniform)]
    pub uniforms: Vec<(String, UniformValue)>,
}

#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Output size.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size, default_value = "1280x720")]
    pub size: (u32, u32),

    /// Use the platform's software adapter.
    #[arg(long)]
    pub software: bool,

    /// Prefer an integrated GPU.
    #[arg(long)]
    pub low_power: bool,
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    #[command(flatten)]
    pub sources: SourceArgs,

    #[command(flatten)]
    pub transition: TransitionArgs,

    #[command(flatten)]
    pub output_args: OutputArgs,

    /// Global timeline position in [0, 1].
    #[arg(long, value_name = "PROGRESS", default_value_t = 0.5)]
    pub position: f64,

    /// Destination PNG.
    #[arg(short, long, value_name = "PATH")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(flatten)]
    pub sources: SourceArgs,

    #[command(flatten)]
    pub transition: TransitionArgs,

    #[command(flatten)]
    pub output_args: OutputArgs,

    /// Write frames under `DIR/<subfolder>/`.
    #[arg(
        long,
        value_name = "DIR",
        conflicts_with = "host",
        required_unless_present = "host"
    )]
    pub out_dir: Option<PathBuf>,

    /// Upload frames to `URL/upload/image`.
    #[arg(long, value_name = "URL")]
    pub host: Option<String>,

    /// Frame image format: webp, png or jpeg.
    #[arg(long, value_parser = parse_format)]
    pub format: Option<FrameFormat>,

    #[arg(long)]
    pub subfolder: Option<String>,

    /// Write the settings, including the exported frame list, to this JSON file.
    #[arg(long, value_name = "FILE")]
    pub save_settings: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct EnginesArgs {
    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width '{}'", w.trim()))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height '{}'", h.trim()))?;
    if width == 0 || height == 0 {
        return Err("size must be greater than zero".into());
    }
    Ok((width, height))
}

pub fn parse_format(value: &str) -> Result<FrameFormat, String> {
    value.parse()
}

pub fn parse_uniform(value: &str) -> Result<(String, UniformValue), String> {
    let (name, raw) = value
        .split_once('=')
        .ok_or_else(|| "expected NAME=VALUE".to_string())?;
    let name = name.trim();
    if name.is_empty() {
        return Err("uniform name must not be empty".into());
    }
    let raw = raw.trim();
    let parsed = match raw.to_ascii_lowercase().as_str() {
        "true" => UniformValue::Bool(true),
        "false" => UniformValue::Bool(false),
        _ if raw.contains(',') => {
            let values = raw
                .split(',')
                .map(|part| part.trim().parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| format!("invalid vector value '{raw}'"))?;
            if values.len() > 4 {
                return Err(format!("vector '{raw}' has more than 4 components"));
            }
            UniformValue::Vector(values)
        }
        _ => UniformValue::Float(
            raw.parse::<f64>()
                .map_err(|_| format!("invalid uniform value '{raw}'"))?,
        ),
    };
    Ok((name.to_string(), parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("1920x1080").unwrap(), (1920, 1080));
        assert_eq!(parse_size(" 64 X 32 ").unwrap(), (64, 32));
        assert!(parse_size("0x10").is_err());
        assert!(parse_size("1920").is_err());
    }

    #[test]
    fn parses_uniform_overrides() {
        assert_eq!(
            parse_uniform("grain=1.5").unwrap(),
            ("grain".to_string(), UniformValue::Float(1.5))
        );
        assert_eq!(
            parse_uniform("invert=TRUE").unwrap(),
            ("invert".to_string(), UniformValue::Bool(true))
        );
        assert_eq!(
            parse_uniform("center=0.25, 0.75").unwrap(),
            ("center".to_string(), UniformValue::Vector(vec![0.25, 0.75]))
        );
        assert!(parse_uniform("=1").is_err());
        assert!(parse_uniform("grain").is_err());
        assert!(parse_uniform("v=1,2,3,4,5").is_err());
    }

    #[test]
    fn export_needs_exactly_one_destination() {
        let base = ["blendpack", "export", "a.png", "b.png"];
        assert!(Cli::try_parse_from(base).is_err());
        assert!(Cli::try_parse_from(base.iter().chain(&["--out-dir", "out"])).is_ok());
        assert!(Cli::try_parse_from(
            base.iter()
                .chain(&["--out-dir", "out", "--host", "http://localhost:8188"])
        )
        .is_err());
    }

    #[test]
    fn negative_offsets_parse() {
        let cli = Cli::try_parse_from([
            "blendpack",
            "render",
            "a.png",
            "b.png",
            "-o",
            "out.png",
            "--clip-a-start",
            "-2.5",
        ])
        .unwrap();
        let Command::Render(args) = cli.command else {
            panic!("expected render");
        };
        assert_eq!(args.transition.clip_a_start, Some(-2.5));
        assert_eq!(args.output_args.size, (1280, 720));
    }

    #[test]
    fn flavor_parses_by_name() {
        let cli = Cli::try_parse_from([
            "blendpack",
            "render",
            "a.png",
            "b.png",
            "-o",
            "out.png",
            "--flavor",
            "Dreamy",
        ])
        .unwrap();
        let Command::Render(args) = cli.command else {
            panic!("expected render");
        };
        assert_eq!(args.transition.flavor, Some(Flavor::Dreamy));
        assert!(Cli::try_parse_from([
            "blendpack",
            "render",
            "a.png",
            "b.png",
            "-o",
            "out.png",
            "--flavor",
            "spicy",
        ])
        .is_err());
    }
}
