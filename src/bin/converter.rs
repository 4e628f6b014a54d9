//! `converter` — batch-encode images/animations from a directory (or an
//! explicit file list) into one of the four wire formats this crate
//! implements.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use microdisplay_codec::format::WriterConfig;
use microdisplay_codec::prepare::{BackgroundColorSpec, PreparedImage};

#[derive(Clone, Copy, Debug, ValueEnum)]
#[value(rename_all = "lowercase")]
enum Format {
    Anim3,
    Anim4,
    Qoif,
    Qoif2,
}

impl Format {
    fn registry_name(self) -> &'static str {
        match self {
            Format::Anim3 => "anim3",
            Format::Anim4 => "anim4",
            Format::Qoif => "qoif",
            Format::Qoif2 => "qoif2",
        }
    }

    fn output_extension(self) -> &'static str {
        match self {
            Format::Anim3 | Format::Anim4 => "sda",
            Format::Qoif => "qoi",
            Format::Qoif2 => "qox",
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
#[value(rename_all = "lowercase")]
enum Size {
    Small,
    Medium,
    Large,
}

impl Size {
    fn dims(self) -> (u32, u32, u32) {
        match self {
            Size::Small => (128, 128, 64),
            Size::Medium => (240, 320, 80),
            Size::Large => (320, 480, 80),
        }
    }
}

/// Convert still/animated images into a compact binary format for
/// low-resource displays.
#[derive(Parser, Debug)]
#[command(name = "converter")]
struct Args {
    /// Target wire format.
    format: Format,

    /// Directory to read source images from.
    #[arg(short = 'i', long = "input-dir", default_value = ".")]
    input_dir: PathBuf,

    /// Directory to write converted files to.
    #[arg(short = 'o', long = "output-dir", default_value = ".")]
    output_dir: PathBuf,

    /// Bits per pixel for the pixel payload.
    #[arg(short = 'b', long = "bpp", default_value_t = 16)]
    bpp: u32,

    /// Named output canvas size.
    #[arg(short = 's', long = "size", default_value = "medium")]
    size: Size,

    /// Explicit `W H T` canvas size, overriding `--size`.
    #[arg(short = 'S', long = "custom-size", num_args = 3, value_names = ["W", "H", "T"])]
    custom_size: Option<Vec<u32>>,

    /// Disable thumbnail generation.
    #[arg(short = 'T', long = "no-thumbnail")]
    no_thumbnail: bool,

    /// Background color: `RRGGBB`, `0xRRGGBB`, `#RRGGBB`, `common`, or `edge`.
    #[arg(short = 'B', long = "background-color", default_value = "000000")]
    background_color: String,

    /// Explicit list of input files (otherwise the input directory is scanned).
    #[arg(short = 'f', long = "filenames", num_args = 1..)]
    filenames: Option<Vec<PathBuf>>,

    /// Repeatable `KEY VALUE` pair passed through to the format writer.
    #[arg(short = 'F', long = "format-args", num_args = 2, value_names = ["KEY", "VALUE"])]
    format_args: Vec<String>,
}

fn parse_background_color(s: &str) -> Result<BackgroundColorSpec> {
    match s {
        "common" => return Ok(BackgroundColorSpec::Common),
        "edge" => return Ok(BackgroundColorSpec::Edge),
        _ => {}
    }
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .or_else(|| s.strip_prefix('#'))
        .unwrap_or(s);
    if hex.len() != 6 {
        bail!("bad background color {s:?}: expected 6 hex digits (RRGGBB)");
    }
    let v = u32::from_str_radix(hex, 16).with_context(|| format!("bad background color {s:?}: not valid hex"))?;
    let r = ((v >> 16) & 0xFF) as u8;
    let g = ((v >> 8) & 0xFF) as u8;
    let b = (v & 0xFF) as u8;
    Ok(BackgroundColorSpec::Literal([r, g, b]))
}

fn is_image_file(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.type_() == mime_guess::mime::IMAGE)
        .unwrap_or(false)
}

fn discover_inputs(args: &Args) -> Result<Vec<PathBuf>> {
    if let Some(names) = &args.filenames {
        let mut out = Vec::new();
        for name in names {
            let path = args.input_dir.join(name);
            if is_image_file(&path) {
                out.push(path);
            } else {
                log::warn!("skipping {}: not recognized as an image", path.display());
            }
        }
        return Ok(out);
    }

    let mut out = Vec::new();
    for entry in std::fs::read_dir(&args.input_dir)
        .with_context(|| format!("reading input directory {}", args.input_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if is_image_file(&path) {
            out.push(path);
        } else {
            log::warn!("skipping {}: not recognized as an image", path.display());
        }
    }
    out.sort();
    Ok(out)
}

fn output_path(args: &Args, input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default();
    let mut name = PathBuf::from(stem);
    name.set_extension(args.format.output_extension());
    args.output_dir.join(name)
}

fn convert_one(args: &Args, cfg: &WriterConfig, input: &Path) -> Result<()> {
    let (width, height, thumb) = if let Some(custom) = &args.custom_size {
        (custom[0], custom[1], custom[2])
    } else {
        args.size.dims()
    };
    let bg = parse_background_color(&args.background_color)?;
    let thumb_size = if args.no_thumbnail { None } else { Some(thumb) };

    let image = PreparedImage::open(input, width, height, thumb_size, bg)
        .with_context(|| format!("preparing {}", input.display()))?;

    let out_path = output_path(args, input);
    let file = File::create(&out_path).with_context(|| format!("creating {}", out_path.display()))?;
    let mut writer = BufWriter::new(file);

    let registry = microdisplay_codec::registry();
    let (write_fn, _read_fn) = registry
        .get(args.format.registry_name())
        .expect("format registered at startup");
    write_fn(&image, cfg, &mut writer).with_context(|| format!("encoding {}", input.display()))?;

    log::info!("{} -> {}", input.display(), out_path.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    if args.bpp != 16 && args.bpp != 24 {
        bail!("bad bpp {}, must be 16 or 24", args.bpp);
    }

    let excluded_ops = args
        .format_args
        .chunks(2)
        .filter(|pair| pair[0] == "notags")
        .flat_map(|pair| pair[1].split(',').map(|s| s.to_string()).collect::<Vec<_>>())
        .collect();

    let cfg = WriterConfig { bpp: args.bpp, do_thumbnail: !args.no_thumbnail, excluded_ops };

    let inputs = discover_inputs(&args)?;
    if inputs.is_empty() {
        eprintln!("no input images found in {}", args.input_dir.display());
        std::process::exit(1);
    }

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating output directory {}", args.output_dir.display()))?;

    for input in &inputs {
        if let Err(e) = convert_one(&args, &cfg, input) {
            log::error!("failed to convert {}: {e:#}", input.display());
        }
    }

    Ok(())
}
