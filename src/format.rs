//! The format registry (Design Note 1): an explicit table mapping a format
//! name to its writer and reader functions, replacing the subclass
//! reflection the original implementation used to discover codec classes.

use std::collections::HashMap;
use std::io::{Read, Seek, Write};

use crate::error::FormatError;
use crate::prepare::PreparedImage;

/// Marker trait so codec readers can be written against `&mut dyn
/// ReadSeek` instead of a generic parameter, which is what lets the
/// registry hold a flat function-pointer table.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// One decoded region update: `w x h` RGBA pixels (alpha synthesized as 255
/// unless the format carried real alpha) placed at `(x, y)` within the
/// full `width x height` device canvas, with a duration in milliseconds
/// (0 except on the region that ends a displayed frame).
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub duration_ms: u32,
    pub pixels: Vec<[u8; 4]>,
}

/// A group of frames as the reader yields them: either the special
/// thumbnail slot, or a displayed frame made of one or more region updates.
#[derive(Clone, Debug)]
pub enum FrameSet {
    Thumbnail(DecodedFrame),
    Frames(Vec<DecodedFrame>),
}

/// Everything a reader recovers from a file: header fields plus the
/// grouped frame sets in file order.
#[derive(Clone, Debug)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
    pub flags_desc: String,
    pub frame_sets: Vec<FrameSet>,
}

/// Per-format writer configuration (the CLI's `bpp`/thumbnail/format-args
/// knobs, already resolved).
#[derive(Clone, Debug)]
pub struct WriterConfig {
    pub bpp: u32,
    pub do_thumbnail: bool,
    pub excluded_ops: Vec<String>,
}

impl WriterConfig {
    pub fn excludes(&self, op: &str) -> bool {
        self.excluded_ops.iter().any(|o| o == op)
    }
}

pub type WriteFn = fn(&PreparedImage, &WriterConfig, &mut dyn Write) -> Result<(), FormatError>;
pub type ReadFn = fn(&mut dyn ReadSeek) -> Result<DecodedImage, FormatError>;

/// Registration order also drives `unconverter`'s probing order, so it's
/// kept as a fixed array rather than a `HashMap` (whose iteration order
/// isn't guaranteed).
const ENTRIES: &[(&str, WriteFn, ReadFn)] = &[
    ("anim3", crate::anim::write_v3, crate::anim::read_v3),
    ("anim4", crate::anim::write_v4, crate::anim::read_v4),
    ("qoif", crate::qoi::write, crate::qoi::read),
    ("qoif2", crate::qoi2::write, crate::qoi2::read),
];

/// `{ name -> (writer, reader) }`, populated once at startup. This is the
/// single source of truth `converter` and `unconverter` both consult.
pub fn registry() -> HashMap<&'static str, (WriteFn, ReadFn)> {
    ENTRIES.iter().map(|&(name, w, r)| (name, (w, r))).collect()
}

/// Try every registered reader against `source` in turn; the first one that
/// accepts the magic wins. Used by `unconverter`. Readers must rewind the
/// source themselves on a `BadFileType` probe failure since they may have
/// consumed bytes before discovering the mismatch.
pub fn try_all_readers(source: &mut dyn ReadSeek) -> Result<(&'static str, DecodedImage), FormatError> {
    let mut last_err = None;
    for &(name, _, read_fn) in ENTRIES {
        source.seek(std::io::SeekFrom::Start(0))?;
        match read_fn(source) {
            Ok(img) => {
                #[cfg(feature = "logging")]
                log::info!("probe: {name} reader accepted the file");
                return Ok((name, img));
            }
            Err(e) if e.is_bad_file_type() => {
                #[cfg(feature = "logging")]
                log::debug!("probe: {name} reader rejected the file: {e}");
                last_err = Some(e);
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or(FormatError::BadFileType("<any known format>")))
}
