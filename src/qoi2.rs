//! QOIF2 (`.qox`): QOIF plus animation. Each frame is stored as one or more
//! block-headed region updates (driven by the frame-diff engine), and
//! pixels can optionally be packed as 16-bit RGB565 instead of 24-bit RGB.
//!
//! Block layout per region update:
//!   header 1 (common): 1B flags, 2B duration_ms, 4B datalen
//!   header 2 (geometry): width/height/x/y, either 2B or 4B each depending
//!     on the `F_BIG` flag (set when any field exceeds 65535)
//!   datalen bytes of QOI-style pixel ops for that region

use std::io::Write;

use crate::error::FormatError;
use crate::format::{DecodedFrame, DecodedImage, FrameSet, ReadSeek, WriterConfig};
use crate::ioutil::{read_exact, read_u16_le, read_u32_le, read_u8};
use crate::pixel::color_565_raw;
use crate::prepare::{Frame, PreparedImage};
use crate::qoi_common::{QoiPixel, QoiRunningState, Rgba8};
use crate::rle::rle_chunks;

const MAGIC: &[u8; 4] = b"qoiF";
const VERSION: u8 = 2;
const TRAILER: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 1];

const F_THUMB: u8 = 1;
const F_START: u8 = 2;
const F_END: u8 = 4;
const F_BIG: u8 = 8;

const TAG_RGB: u8 = 0b1111_1110;
const TAG_RGBA: u8 = 0b1111_1111;

const MAX_CHUNK: usize = 63;

pub fn write(image: &PreparedImage, cfg: &WriterConfig, out: &mut dyn Write) -> Result<(), FormatError> {
    let channels = (cfg.bpp / 8) as u8;
    out.write_all(MAGIC)?;
    out.write_all(&image.width.to_le_bytes())?;
    out.write_all(&image.height.to_le_bytes())?;
    out.write_all(&[channels, 1u8, VERSION])?;

    // Unlike Anim, QOIF2 never carries a thumbnail block: the original
    // `QOIF2Writer` has no thumbnail path, and the reader threads one
    // running cache across every block in the stream with no reset point
    // to anchor a separate thumbnail encode against.
    let mut state16 = QoiRunningState::<u16>::new();
    let mut state24 = QoiRunningState::<Rgba8>::with_initial_prev(Rgba8::opaque(0, 0, 0));

    for (diff, frame) in image.frames() {
        let rects = diff.unwrap_or_default();
        let regions: Vec<(u32, u32, u32, u32)> = if rects.is_empty() {
            vec![(0, 0, frame.width, frame.height)]
        } else {
            rects.iter().map(|r| (r.x, r.y, r.w, r.h)).collect()
        };

        let last = regions.len() - 1;
        for (i, (x, y, w, h)) in regions.into_iter().enumerate() {
            let mut flags = 0u8;
            if i == 0 {
                flags |= F_START;
            }
            let duration = if i == last {
                flags |= F_END;
                frame.duration_ms as u16
            } else {
                0
            };

            let mut body = Vec::new();
            if cfg.bpp < 24 {
                encode_region_16(&frame, (x, y, w, h), cfg, &mut state16, &mut body)?;
            } else {
                encode_region_24(&frame, (x, y, w, h), cfg, &mut state24, &mut body)?;
            }

            write_block_headers(flags, duration, &body, x, y, w, h, out)?;
            out.write_all(&body)?;
        }
    }

    out.write_all(&TRAILER)?;
    Ok(())
}

fn write_block_headers(
    flags: u8,
    duration: u16,
    body: &[u8],
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    out: &mut dyn Write,
) -> Result<(), FormatError> {
    let big = [w, h, x, y].iter().any(|&v| v > 0xFFFF);
    let flags = if big { flags | F_BIG } else { flags };

    out.write_all(&[flags])?;
    out.write_all(&duration.to_le_bytes())?;
    out.write_all(&(body.len() as u32).to_le_bytes())?;

    if big {
        out.write_all(&w.to_le_bytes())?;
        out.write_all(&h.to_le_bytes())?;
        out.write_all(&x.to_le_bytes())?;
        out.write_all(&y.to_le_bytes())?;
    } else {
        out.write_all(&(w as u16).to_le_bytes())?;
        out.write_all(&(h as u16).to_le_bytes())?;
        out.write_all(&(x as u16).to_le_bytes())?;
        out.write_all(&(y as u16).to_le_bytes())?;
    }
    Ok(())
}

fn encode_region_24(
    frame: &Frame,
    (x, y, w, h): (u32, u32, u32, u32),
    cfg: &WriterConfig,
    state: &mut QoiRunningState<Rgba8>,
    out: &mut Vec<u8>,
) -> Result<(), FormatError> {
    let pixels: Vec<Rgba8> =
        frame.rect_pixels(Some((x, y, w, h))).into_iter().map(|[r, g, b]| Rgba8::opaque(r, g, b)).collect();

    for (run_len, group) in rle_chunks(&pixels, MAX_CHUNK, true) {
        if run_len > 1 && cfg.excludes("run") {
            for _ in 0..run_len {
                emit_op_24(group[0], state, cfg, out)?;
                state.observe(group[0]);
            }
        } else if run_len > 1 {
            let px = group[0];
            emit_op_24(px, state, cfg, out)?;
            let remaining = run_len - 1;
            out.push(0b1100_0000 | (remaining - 1) as u8);
            state.observe(px);
        } else {
            for px in group {
                emit_op_24(px, state, cfg, out)?;
                state.observe(px);
            }
        }
    }
    Ok(())
}

fn encode_region_16(
    frame: &Frame,
    (x, y, w, h): (u32, u32, u32, u32),
    cfg: &WriterConfig,
    state: &mut QoiRunningState<u16>,
    out: &mut Vec<u8>,
) -> Result<(), FormatError> {
    let pixels: Vec<u16> = frame
        .rect_pixels(Some((x, y, w, h)))
        .into_iter()
        .map(|[r, g, b]| {
            let (r5, g6, b5) = color_565_raw(r, g, b);
            crate::pixel::pack_565(r5, g6, b5)
        })
        .collect();

    for (run_len, group) in rle_chunks(&pixels, MAX_CHUNK, true) {
        if run_len > 1 && cfg.excludes("run") {
            for _ in 0..run_len {
                emit_op_16(group[0], state, cfg, out)?;
                state.observe(group[0]);
            }
        } else if run_len > 1 {
            let px = group[0];
            emit_op_16(px, state, cfg, out)?;
            let remaining = run_len - 1;
            out.push(0b1100_0000 | (remaining - 1) as u8);
            state.observe(px);
        } else {
            for px in group {
                emit_op_16(px, state, cfg, out)?;
                state.observe(px);
            }
        }
    }
    Ok(())
}

fn emit_op_24(px: Rgba8, state: &QoiRunningState<Rgba8>, cfg: &WriterConfig, out: &mut Vec<u8>) -> Result<(), FormatError> {
    if !cfg.excludes("index") {
        if let Some(idx) = state.cache_index(px) {
            out.push(idx);
            return Ok(());
        }
    }
    if !cfg.excludes("diff") {
        if let Some(diff) = calc_diff_24(px, state.prev) {
            out.push(0b0100_0000 | ((diff.0 + 2) << 4) | ((diff.1 + 2) << 2) | (diff.2 + 2));
            return Ok(());
        }
    }
    if !cfg.excludes("luma") {
        if let Some((dg, dr, db)) = calc_luma_24(px, state.prev) {
            out.push(0b1000_0000 | (dg + 32) as u8);
            out.push((((dr + 8) as u8) << 4) | (db + 8) as u8);
            return Ok(());
        }
    }
    out.extend_from_slice(&[TAG_RGB, px.r, px.g, px.b]);
    Ok(())
}

fn emit_op_16(px: u16, state: &QoiRunningState<u16>, cfg: &WriterConfig, out: &mut Vec<u8>) -> Result<(), FormatError> {
    if !cfg.excludes("index") {
        if let Some(idx) = state.cache_index(px) {
            out.push(idx);
            return Ok(());
        }
    }
    if !cfg.excludes("diff") {
        if let Some(diff) = calc_diff_16(px, state.prev) {
            out.push(0b0100_0000 | ((diff.0 + 2) << 4) | ((diff.1 + 2) << 2) | (diff.2 + 2));
            return Ok(());
        }
    }
    if !cfg.excludes("luma") {
        if let Some((dg, dr, db)) = calc_luma_16(px, state.prev) {
            out.push(0b1000_0000 | (dg + 32) as u8);
            out.push((((dr + 8) as u8) << 4) | (db + 8) as u8);
            return Ok(());
        }
    }
    out.push(TAG_RGB);
    out.extend_from_slice(&px.to_le_bytes());
    Ok(())
}

fn calc_diff_24(px: Rgba8, prev: Rgba8) -> Option<(i8, i8, i8)> {
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

fn calc_luma_24(px: Rgba8, prev: Rgba8) -> Option<(i8, i8, i8)> {
    if px.a != prev.a {
        return None;
    }
    let dg = px.g as i16 - prev.g as i16;
    if !(-32..=31).contains(&dg) {
        return None;
    }
    let dr = (px.r as i16 - prev.r as i16) - dg;
    let db = (px.b as i16 - prev.b as i16) - dg;
    if (-8..=7).contains(&dr) && (-8..=7).contains(&db) {
        Some((dg as i8, dr as i8, db as i8))
    } else {
        None
    }
}

/// Diff/luma for the 16bpp path operate on the unpacked 5/6/5 component
/// values, not the packed `u16` — matching 24bpp channel-wise deltas rather
/// than bit-shifting a delta straight into the packed integer (which would
/// let a carry from one field bleed into its neighbor).
fn unpack16(px: u16) -> (u8, u8, u8) {
    crate::pixel::unpack_565(px)
}

fn calc_diff_16(px: u16, prev: u16) -> Option<(i8, i8, i8)> {
    let (r, g, b) = unpack16(px);
    let (pr, pg, pb) = unpack16(prev);
    let dr = r as i16 - pr as i16;
    let dg = g as i16 - pg as i16;
    let db = b as i16 - pb as i16;
    if [dr, dg, db].iter().all(|&v| (-2..=1).contains(&v)) {
        Some((dr as i8, dg as i8, db as i8))
    } else {
        None
    }
}

fn calc_luma_16(px: u16, prev: u16) -> Option<(i8, i8, i8)> {
    let (r, g, b) = unpack16(px);
    let (pr, pg, pb) = unpack16(prev);
    let dg = g as i16 - pg as i16;
    if !(-32..=31).contains(&dg) {
        return None;
    }
    let dr = (r as i16 - pr as i16) - dg;
    let db = (b as i16 - pb as i16) - dg;
    if (-8..=7).contains(&dr) && (-8..=7).contains(&db) {
        Some((dg as i8, dr as i8, db as i8))
    } else {
        None
    }
}

pub fn read(source: &mut dyn ReadSeek) -> Result<DecodedImage, FormatError> {
    let mut magic = [0u8; 4];
    read_exact(source, &mut magic, "qoif2 magic")?;
    if &magic != MAGIC {
        return Err(FormatError::BadFileType("qoif2"));
    }

    let width = read_u32_le(source, "qoif2 width")?;
    let height = read_u32_le(source, "qoif2 height")?;
    let channels = read_u8(source, "qoif2 channels")?;
    let _colorspace = read_u8(source, "qoif2 colorspace")?;
    let version = read_u8(source, "qoif2 version")?;
    if version != VERSION {
        return Err(FormatError::BadFileType("qoif2"));
    }
    let bpp = channels as u32 * 8;

    let mut state16 = QoiRunningState::<u16>::new();
    let mut state24 = QoiRunningState::<Rgba8>::with_initial_prev(Rgba8::opaque(0, 0, 0));

    let mut raw_blocks: Vec<(u8, u32, u32, u32, u32, DecodedFrame)> = Vec::new();

    loop {
        let mut peek = [0u8; 8];
        read_exact(source, &mut peek, "qoif2 block or trailer")?;
        if peek == TRAILER {
            break;
        }

        let flags = peek[0];
        let duration_ms = u16::from_le_bytes([peek[1], peek[2]]) as u32;
        let datalen = u32::from_le_bytes([peek[3], peek[4], peek[5], peek[6]]);
        // peek[7] is the first byte of header 2; rewind one byte logically
        // by re-reading header 2 fresh below, starting from peek[7].
        let (w, h, x, y) = if flags & F_BIG != 0 {
            let mut rest = [0u8; 4 * 4 - 1];
            read_exact(source, &mut rest, "qoif2 big block header 2")?;
            let mut buf = [0u8; 16];
            buf[0] = peek[7];
            buf[1..].copy_from_slice(&rest);
            (
                u32::from_le_bytes(buf[0..4].try_into().unwrap()),
                u32::from_le_bytes(buf[4..8].try_into().unwrap()),
                u32::from_le_bytes(buf[8..12].try_into().unwrap()),
                u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            )
        } else {
            let mut rest = [0u8; 2 * 4 - 1];
            read_exact(source, &mut rest, "qoif2 small block header 2")?;
            let mut buf = [0u8; 8];
            buf[0] = peek[7];
            buf[1..].copy_from_slice(&rest);
            (
                u16::from_le_bytes(buf[0..2].try_into().unwrap()) as u32,
                u16::from_le_bytes(buf[2..4].try_into().unwrap()) as u32,
                u16::from_le_bytes(buf[4..6].try_into().unwrap()) as u32,
                u16::from_le_bytes(buf[6..8].try_into().unwrap()) as u32,
            )
        };

        let mut data = vec![0u8; datalen as usize];
        read_exact(source, &mut data, "qoif2 block data")?;

        let pixels = if bpp < 24 {
            decode_region_16(&mut &data[..], w, h, &mut state16)?
        } else {
            decode_region_24(&mut &data[..], w, h, &mut state24)?
        };

        raw_blocks.push((flags, w, h, x, y, DecodedFrame { x, y, w, h, duration_ms, pixels }));
    }

    let mut frame_sets = Vec::new();
    let mut thumb = None;
    let mut current: Vec<DecodedFrame> = Vec::new();
    for (flags, _w, _h, _x, _y, decoded) in raw_blocks {
        if flags & F_THUMB != 0 {
            thumb = Some(decoded);
            continue;
        }
        if flags & F_START != 0 {
            current = Vec::new();
        }
        current.push(decoded);
        if flags & F_END != 0 {
            frame_sets.push(FrameSet::Frames(std::mem::take(&mut current)));
        }
    }

    let mut all_sets = Vec::new();
    if let Some(t) = thumb {
        all_sets.push(FrameSet::Thumbnail(t));
    }
    all_sets.extend(frame_sets);

    Ok(DecodedImage {
        width,
        height,
        bpp,
        flags_desc: format!("qoif2 v{version}"),
        frame_sets: all_sets,
    })
}

fn decode_region_24(source: &mut &[u8], w: u32, h: u32, state: &mut QoiRunningState<Rgba8>) -> Result<Vec<[u8; 4]>, FormatError> {
    let total = (w as usize) * (h as usize);
    let mut pixels = Vec::with_capacity(total);
    while pixels.len() < total {
        let tag = read_u8(source, "qoif2 op tag")?;
        match tag {
            TAG_RGB => {
                let mut rgb = [0u8; 3];
                read_exact(source, &mut rgb, "qoif2 RGB op")?;
                let px = Rgba8 { r: rgb[0], g: rgb[1], b: rgb[2], a: state.prev.a };
                pixels.push([px.r, px.g, px.b, px.a]);
                state.observe(px);
            }
            TAG_RGBA => {
                return Err(FormatError::validation(
                    "qoif2 pixel op",
                    "no RGBA tag in 24bpp mode (alpha unsupported)",
                    "0xFF tag byte",
                ));
            }
            _ => {
                let top = tag >> 6;
                let arg = tag & 0x3F;
                match top {
                    0 => {
                        let px = state.cache_at(arg);
                        pixels.push([px.r, px.g, px.b, px.a]);
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
                        pixels.push([px.r, px.g, px.b, px.a]);
                        state.observe(px);
                    }
                    2 => {
                        let dg = arg as i8 - 32;
                        let rb = read_u8(source, "qoif2 LUMA op second byte")?;
                        let dr = dg.wrapping_add((rb >> 4) as i8 - 8);
                        let db = dg.wrapping_add((rb & 0xF) as i8 - 8);
                        let prev = state.prev;
                        let px = Rgba8 {
                            r: prev.r.wrapping_add(dr as u8),
                            g: prev.g.wrapping_add(dg as u8),
                            b: prev.b.wrapping_add(db as u8),
                            a: prev.a,
                        };
                        pixels.push([px.r, px.g, px.b, px.a]);
                        state.observe(px);
                    }
                    3 => {
                        let run = arg as usize + 1;
                        let px = state.prev;
                        for _ in 0..run.min(total - pixels.len()) {
                            pixels.push([px.r, px.g, px.b, px.a]);
                        }
                        state.observe(px);
                    }
                    _ => unreachable!("top is a 2-bit field"),
                }
            }
        }
    }
    Ok(pixels)
}

fn decode_region_16(source: &mut &[u8], w: u32, h: u32, state: &mut QoiRunningState<u16>) -> Result<Vec<[u8; 4]>, FormatError> {
    let total = (w as usize) * (h as usize);
    let mut pixels = Vec::with_capacity(total);
    while pixels.len() < total {
        let tag = read_u8(source, "qoif2 op tag")?;
        match tag {
            TAG_RGB => {
                let raw = read_u16_le(source, "qoif2 16bpp RGB op")?;
                pixels.push(pack_out(raw));
                state.observe(raw);
            }
            TAG_RGBA => {
                return Err(FormatError::validation(
                    "qoif2 pixel op",
                    "no RGBA tag in 16bpp mode",
                    "0xFF tag byte",
                ));
            }
            _ => {
                let top = tag >> 6;
                let arg = tag & 0x3F;
                match top {
                    0 => {
                        let px = state.cache_at(arg);
                        pixels.push(pack_out(px));
                        state.observe(px);
                    }
                    1 => {
                        let dr = (arg >> 4) as i8 - 2;
                        let dg = ((arg >> 2) & 3) as i8 - 2;
                        let db = (arg & 3) as i8 - 2;
                        let (pr, pg, pb) = unpack16(state.prev);
                        let r = pr.wrapping_add(dr as u8) & 0x1F;
                        let g = pg.wrapping_add(dg as u8) & 0x3F;
                        let b = pb.wrapping_add(db as u8) & 0x1F;
                        let px = crate::pixel::pack_565(r, g, b);
                        pixels.push(pack_out(px));
                        state.observe(px);
                    }
                    2 => {
                        let dg = arg as i8 - 32;
                        let rb = read_u8(source, "qoif2 16bpp LUMA op second byte")?;
                        let dr = dg.wrapping_add((rb >> 4) as i8 - 8);
                        let db = dg.wrapping_add((rb & 0xF) as i8 - 8);
                        let (pr, pg, pb) = unpack16(state.prev);
                        let r = pr.wrapping_add(dr as u8) & 0x1F;
                        let g = pg.wrapping_add(dg as u8) & 0x3F;
                        let b = pb.wrapping_add(db as u8) & 0x1F;
                        let px = crate::pixel::pack_565(r, g, b);
                        pixels.push(pack_out(px));
                        state.observe(px);
                    }
                    3 => {
                        let run = arg as usize + 1;
                        let px = state.prev;
                        for _ in 0..run.min(total - pixels.len()) {
                            pixels.push(pack_out(px));
                        }
                        state.observe(px);
                    }
                    _ => unreachable!("top is a 2-bit field"),
                }
            }
        }
    }
    Ok(pixels)
}

fn pack_out(px16: u16) -> [u8; 4] {
    let (r8, g8, b8) = crate::pixel::color_565_to_888(px16);
    [r8, g8, b8, 255]
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_rgb_grid(max_side: u32) -> impl Strategy<Value = (u32, u32, Vec<[u8; 3]>)> {
        (1u32..max_side, 1u32..max_side).prop_flat_map(|(w, h)| {
            proptest::collection::vec((0u8..255, 0u8..255, 0u8..255), (w * h) as usize)
                .prop_map(move |v| (w, h, v.into_iter().map(|(r, g, b)| [r, g, b]).collect()))
        })
    }

    proptest! {
        /// A region encoded and decoded at 24bpp reproduces the source
        /// pixels exactly.
        #[test]
        fn region_24bpp_round_trips_exactly((w, h, pixels) in arb_rgb_grid(12)) {
            let cfg = WriterConfig { bpp: 24, do_thumbnail: false, excluded_ops: vec![] };
            let frame = Frame::from_pixels_for_test(w, h, pixels.clone(), 0);
            let mut state = QoiRunningState::<Rgba8>::with_initial_prev(Rgba8::opaque(0, 0, 0));
            let mut body = Vec::new();
            encode_region_24(&frame, (0, 0, w, h), &cfg, &mut state, &mut body).unwrap();

            let mut decode_state = QoiRunningState::<Rgba8>::with_initial_prev(Rgba8::opaque(0, 0, 0));
            let decoded = decode_region_24(&mut &body[..], w, h, &mut decode_state).unwrap();
            for (got, &[r, g, b]) in decoded.iter().zip(pixels.iter()) {
                prop_assert_eq!(*got, [r, g, b, 255]);
            }
        }

        /// A region encoded and decoded at 16bpp reproduces the source
        /// pixels up to the expected RGB565 quantization.
        #[test]
        fn region_16bpp_round_trips_to_565_precision((w, h, pixels) in arb_rgb_grid(12)) {
            let cfg = WriterConfig { bpp: 16, do_thumbnail: false, excluded_ops: vec![] };
            let frame = Frame::from_pixels_for_test(w, h, pixels.clone(), 0);
            let mut state = QoiRunningState::<u16>::new();
            let mut body = Vec::new();
            encode_region_16(&frame, (0, 0, w, h), &cfg, &mut state, &mut body).unwrap();

            let mut decode_state = QoiRunningState::<u16>::new();
            let decoded = decode_region_16(&mut &body[..], w, h, &mut decode_state).unwrap();
            for (got, &[r, g, b]) in decoded.iter().zip(pixels.iter()) {
                let expected = crate::pixel::color_565_to_888(crate::pixel::color_565(r, g, b));
                prop_assert_eq!(*got, [expected.0, expected.1, expected.2, 255]);
            }
        }

        /// The `-F notags=...` debug knob excludes individual ops from the
        /// encoder but the stream must still decode back to the source
        /// pixels exactly, one excluded op at a time and all at once.
        #[test]
        fn excluding_any_op_still_round_trips((w, h, pixels) in arb_rgb_grid(10), excl_idx in 0usize..4) {
            let all_ops = ["run", "index", "diff", "luma"];
            let excluded_ops = match excl_idx {
                0 => vec![],
                1 => vec![all_ops[0].to_string()],
                2 => vec![all_ops[1].to_string()],
                3 => all_ops.iter().map(|s| s.to_string()).collect(),
                _ => unreachable!(),
            };
            let cfg = WriterConfig { bpp: 24, do_thumbnail: false, excluded_ops };
            let frame = Frame::from_pixels_for_test(w, h, pixels.clone(), 0);
            let mut state = QoiRunningState::<Rgba8>::with_initial_prev(Rgba8::opaque(0, 0, 0));
            let mut body = Vec::new();
            encode_region_24(&frame, (0, 0, w, h), &cfg, &mut state, &mut body).unwrap();

            let mut decode_state = QoiRunningState::<Rgba8>::with_initial_prev(Rgba8::opaque(0, 0, 0));
            let decoded = decode_region_24(&mut &body[..], w, h, &mut decode_state).unwrap();
            for (got, &[r, g, b]) in decoded.iter().zip(pixels.iter()) {
                prop_assert_eq!(*got, [r, g, b, 255]);
            }
        }
    }
}
