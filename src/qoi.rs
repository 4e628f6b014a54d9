//! The canonical QOIF codec: single-frame, 24-bit RGB, no animation. A
//! deliberately narrowed take on QOI proper — alpha is never carried (the
//! preparer always hands us opaque frames), so the writer never has a
//! reason to emit `QOI_OP_RGBA`, and the reader treats seeing that tag as
//! a hard error rather than attempting to decode it.

use std::io::Write;

use crate::error::FormatError;
use crate::format::{DecodedFrame, DecodedImage, FrameSet, ReadSeek, WriterConfig};
use crate::ioutil::{read_exact, read_u32_le, read_u8};
use crate::prepare::PreparedImage;
use crate::qoi_common::{QoiPixel, QoiRunningState, Rgba8};
use crate::rle::rle_chunks;

const MAGIC: &[u8; 4] = b"qoif";
const TRAILER: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 1];

const TAG_RGB: u8 = 0b1111_1110;
const TAG_RGBA: u8 = 0b1111_1111;

/// Runs of more than 63 equal pixels are split by the chunker itself; this
/// caps each RLE group so that, after the leading explicit-pixel op eats
/// one pixel, the remainder never exceeds the 6-bit RUN field's range of
/// 1..=62.
const MAX_CHUNK: usize = 63;

pub fn write(image: &PreparedImage, _cfg: &WriterConfig, out: &mut dyn Write) -> Result<(), FormatError> {
    out.write_all(MAGIC)?;
    out.write_all(&image.width.to_le_bytes())?;
    out.write_all(&image.height.to_le_bytes())?;
    out.write_all(&[3u8, 1u8])?;

    // Animation is not supported: encode the first frame and stop.
    if let Some((_, frame)) = image.frames().next() {
        encode_frame(&frame, out)?;
    }

    out.write_all(&TRAILER)?;
    Ok(())
}

fn encode_frame(frame: &crate::prepare::Frame, out: &mut dyn Write) -> Result<(), FormatError> {
    let mut state = QoiRunningState::<Rgba8>::with_initial_prev(Rgba8::opaque(0, 0, 0));
    let pixels: Vec<Rgba8> = frame.rect_pixels(None).into_iter().map(|[r, g, b]| Rgba8::opaque(r, g, b)).collect();

    for (run_len, group) in rle_chunks(&pixels, MAX_CHUNK, true) {
        if run_len > 1 {
            let px = group[0];
            emit_op(px, &state, out)?;
            let remaining = run_len - 1;
            out.write_all(&[0b1100_0000 | (remaining - 1) as u8])?;
            state.observe(px);
        } else {
            for px in group {
                emit_op(px, &state, out)?;
                state.observe(px);
            }
        }
    }
    Ok(())
}

fn emit_op(px: Rgba8, state: &QoiRunningState<Rgba8>, out: &mut dyn Write) -> Result<(), FormatError> {
    if let Some(idx) = state.cache_index(px) {
        out.write_all(&[idx])?;
        return Ok(());
    }

    if let Some(diff) = calc_diff(px, state.prev) {
        out.write_all(&[0b0100_0000 | ((diff.0 + 2) << 4) | ((diff.1 + 2) << 2) | (diff.2 + 2)])?;
        return Ok(());
    }

    if let Some((dg, dr, db)) = calc_luma(px, state.prev) {
        out.write_all(&[0b1000_0000 | (dg + 32) as u8, (((dr + 8) as u8) << 4) | (db + 8) as u8])?;
        return Ok(());
    }

    out.write_all(&[TAG_RGB, px.r, px.g, px.b])?;
    Ok(())
}

/// `None` if alpha changed or any channel delta falls outside -2..=1.
fn calc_diff(px: Rgba8, prev: Rgba8) -> Option<(i8, i8, i8)> {
    if px.a != prev.a {
        return None;
    }
    let dr = px.r as i16 - prev.r as i16;
    let dg = px.g as i16 - prev.g as i16;
    let db = px.b as i16 - prev.b as i16;
    if [dr, dg, db].iter().all(|&v| (-2..=1).contains(&v)) {
        Some((dr as i8, dg as i8, db as i8))
    } else {
        None
    }
}

/// `None` if alpha changed, the green delta falls outside -32..=31, or
/// either r/b-relative-to-green delta falls outside -8..=7.
fn calc_luma(px: Rgba8, prev: Rgba8) -> Option<(i8, i8, i8)> {
    if px.a != prev.a {
        return None;
    }
    let dr_raw = px.r as i16 - prev.r as i16;
    let dg = px.g as i16 - prev.g as i16;
    let db_raw = px.b as i16 - prev.b as i16;
    if !(-32..=31).contains(&dg) {
        return None;
    }
    let dr = dr_raw - dg;
    let db = db_raw - dg;
    if (-8..=7).contains(&dr) && (-8..=7).contains(&db) {
        Some((dg as i8, dr as i8, db as i8))
    } else {
        None
    }
}

pub fn read(source: &mut dyn ReadSeek) -> Result<DecodedImage, FormatError> {
    let mut magic = [0u8; 4];
    read_exact(source, &mut magic, "qoif magic")?;
    if &magic != MAGIC {
        return Err(FormatError::BadFileType("qoif"));
    }

    let width = read_u32_le(source, "qoif width")?;
    let height = read_u32_le(source, "qoif height")?;
    let channels = read_u8(source, "qoif channels")?;
    let _colorspace = read_u8(source, "qoif colorspace")?;
    let bpp = channels as u32 * 8;

    let total = (width as usize) * (height as usize);
    let mut pixels: Vec<Rgba8> = Vec::with_capacity(total);
    let mut state = QoiRunningState::<Rgba8>::with_initial_prev(Rgba8::opaque(0, 0, 0));

    while pixels.len() < total {
        let tag = read_u8(source, "qoif op tag")?;
        match tag {
            TAG_RGB => {
                let mut rgb = [0u8; 3];
                read_exact(source, &mut rgb, "qoif RGB op")?;
                let px = Rgba8 { r: rgb[0], g: rgb[1], b: rgb[2], a: state.prev.a };
                pixels.push(px);
                state.observe(px);
            }
            TAG_RGBA => {
                return Err(FormatError::validation(
                    "qoif pixel op",
                    "no RGBA tag (alpha unsupported)",
                    "0xFF tag byte",
                ));
            }
            _ => {
                let top = tag >> 6;
                let arg = tag & 0x3F;
                match top {
                    0 => {
                        let px = state.cache_at(arg);
                        pixels.push(px);
                        state.observe(px);
                    }
                    1 => {
                        let dr = (arg >> 4) as i8 - 2;
                        let dg = ((arg >> 2) & 3) as i8 - 2;
                        let db = (arg & 3) as i8 - 2;
                        let prev = state.prev;
                        let px = Rgba8 {
                            r: prev.r.wrapping_add(dr as u8),
                            g: prev.g.wrapping_add(dg as u8),
                            b: prev.b.wrapping_add(db as u8),
                            a: prev.a,
                        };
                        pixels.push(px);
                        state.observe(px);
                    }
                    2 => {
                        let dg = arg as i8 - 32;
                        let rb = read_u8(source, "qoif LUMA op second byte")?;
                        let dr = dg.wrapping_add((rb >> 4) as i8 - 8);
                        let db = dg.wrapping_add((rb & 0xF) as i8 - 8);
                        let prev = state.prev;
                        let px = Rgba8 {
                            r: prev.r.wrapping_add(dr as u8),
                            g: prev.g.wrapping_add(dg as u8),
                            b: prev.b.wrapping_add(db as u8),
                            a: prev.a,
                        };
                        pixels.push(px);
                        state.observe(px);
                    }
                    3 => {
                        let run = arg as usize + 1;
                        let px = state.prev;
                        for _ in 0..run.min(total - pixels.len()) {
                            pixels.push(px);
                        }
                        state.observe(px);
                    }
                    _ => unreachable!("top is a 2-bit field"),
                }
            }
        }
    }

    let mut trailer = [0u8; 8];
    read_exact(source, &mut trailer, "qoif trailer")?;
    if trailer != TRAILER {
        return Err(FormatError::validation("qoif trailer", "00 00 00 00 00 00 00 01", format!("{trailer:?}")));
    }

    let rgba_pixels: Vec<[u8; 4]> = pixels.into_iter().map(|p| [p.r, p.g, p.b, p.a]).collect();

    Ok(DecodedImage {
        width,
        height,
        bpp,
        flags_desc: "qoif (no animation)".to_string(),
        frame_sets: vec![FrameSet::Frames(vec![DecodedFrame {
            x: 0,
            y: 0,
            w: width,
            h: height,
            duration_ms: 0,
            pixels: rgba_pixels,
        }])],
    })
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn encode_pixels(pixels: &[Rgba8]) -> Vec<u8> {
        let mut state = QoiRunningState::<Rgba8>::with_initial_prev(Rgba8::opaque(0, 0, 0));
        let mut out = Vec::new();
        for (run_len, group) in rle_chunks(pixels, MAX_CHUNK, true) {
            if run_len > 1 {
                let px = group[0];
                emit_op(px, &state, &mut out).unwrap();
                out.write_all(&[0b1100_0000 | (run_len - 2) as u8]).unwrap();
                state.observe(px);
            } else {
                for px in group {
                    emit_op(px, &state, &mut out).unwrap();
                    state.observe(px);
                }
            }
        }
        out
    }

    fn arb_pixels(max_len: usize) -> impl Strategy<Value = Vec<Rgba8>> {
        // A small color palette keeps runs/diffs/lumas/index-hits all
        // plausible within a short random sequence.
        proptest::collection::vec((0u8..6, 0u8..6, 0u8..6), 1..max_len)
            .prop_map(|v| v.into_iter().map(|(r, g, b)| Rgba8::opaque(r * 40, g * 40, b * 40)).collect())
    }

    proptest! {
        /// Encoding then decoding an arbitrary opaque pixel stream reproduces
        /// the exact same pixels, for any width/height factoring of the
        /// stream length.
        #[test]
        fn encode_then_decode_round_trips_exactly(pixels in arb_pixels(200)) {
            let body = encode_pixels(&pixels);
            let mut stream = Vec::new();
            stream.extend_from_slice(MAGIC);
            stream.extend_from_slice(&(pixels.len() as u32).to_le_bytes());
            stream.extend_from_slice(&1u32.to_le_bytes());
            stream.extend_from_slice(&[3, 1]);
            stream.extend_from_slice(&body);
            stream.extend_from_slice(&TRAILER);

            let mut cursor = Cursor::new(stream);
            let decoded = read(&mut cursor).unwrap();
            let FrameSet::Frames(frames) = &decoded.frame_sets[0] else { panic!("expected Frames") };
            let got: Vec<Rgba8> = frames[0].pixels.iter().map(|&[r, g, b, a]| Rgba8 { r, g, b, a }).collect();
            prop_assert_eq!(got, pixels);
        }
    }
}
