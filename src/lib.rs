//! `microdisplay-codec` — bit-exact encoders/decoders for the image and
//! animation formats this crate's converter/unconverter binaries target:
//!
//! - **Anim** (`.sda`, v3/v4): a block-oriented container supporting
//!   partial-frame animation updates with RAW/RLE pixel runs.
//! - **QOIF** (`.qoi`): a faithful implementation of the published QOI
//!   still-image codec.
//! - **QOIF2** (`.qox`): QOIF extended with animation frames and an
//!   optional 16-bit RGB565 pixel mode.
//!
//! The pipeline that feeds all three: [`prepare`] resizes/letterboxes a
//! source image and picks a background color, [`diff`] finds the
//! rectangular regions that changed between two frames, and [`rle`] groups
//! a pixel stream into raw/run-length chunks. [`qoi_common`] holds the
//! running-cache state machine shared by the QOI-family codecs.
#![forbid(unsafe_code)]

pub mod anim;
pub mod debug_canvas;
pub mod diff;
pub mod error;
pub mod format;
mod ioutil;
pub mod pixel;
pub mod prepare;
pub mod qoi;
pub mod qoi2;
mod qoi_common;
pub mod rle;

pub use error::{FormatError, PrepareError};
pub use format::{registry, try_all_readers, DecodedFrame, DecodedImage, FrameSet, WriterConfig};
pub use prepare::{BackgroundColorSpec, Frame, PreparedImage};
