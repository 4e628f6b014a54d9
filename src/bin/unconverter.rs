//! `unconverter` — probe a file against every registered reader and render
//! its decoded frame sets to a debug canvas PNG for human inspection.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

/// Decode an Anim/QOIF/QOIF2 file and render a debug visualization grid.
#[derive(Parser, Debug)]
#[command(name = "unconverter")]
struct Args {
    /// File to decode.
    filename: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let file = File::open(&args.filename).with_context(|| format!("opening {}", args.filename.display()))?;
    let mut source = BufReader::new(file);

    match microdisplay_codec::try_all_readers(&mut source) {
        Ok((name, decoded)) => {
            log::info!("{}: decoded as {name}", args.filename.display());
            let canvas = microdisplay_codec::debug_canvas::render(&args.filename.display().to_string(), &decoded);

            let mut out_path = args.filename.clone();
            let suffix = out_path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!("{e}.debug.png"))
                .unwrap_or_else(|| "debug.png".to_string());
            out_path.set_extension(suffix);

            canvas.save(&out_path).with_context(|| format!("writing {}", out_path.display()))?;
            println!("wrote {}", out_path.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: no registered reader accepted this file: {e}", args.filename.display());
            std::process::exit(1);
        }
    }
}
