//! The `.sda` animation container, versions 3 and 4: a file-level magic
//! and header, followed by a flat list of frame headers each carrying a
//! run-length/raw chunked pixel stream. `IF_IS_ANIM`'s `FF_BEGIN`/`FF_END`
//! flags group consecutive frame records into one displayed "rendered"
//! frame (a single display update may be written as several region-update
//! records when the frame-diff engine finds multiple dirty rectangles).
//!
//! V3 and V4 differ only in field widths (frame header and chunk header),
//! factored out behind the `AnimVersion` trait so the encode/decode body
//! is shared.

use std::io::{Read, Write};

use crate::error::FormatError;
use crate::format::{DecodedFrame, DecodedImage, FrameSet, ReadSeek, WriterConfig};
use crate::ioutil::{read_exact, read_u16_le, read_u8, try_read_exact};
use crate::pixel::{color_565, color_565_to_888};
use crate::prepare::{Frame, PreparedImage};
use crate::rle::rle_chunks;

const MAGIC: &[u8; 4] = b"AImg";
const MAGIC_HEADER_SIZE: u16 = 8; // FM_MAGIC: 4B magic + 2B version + 2B offset
const HEADER_SIZE: u16 = 8; // FM_HEADER: 2B w + 2B h + 1B bpp + 1B reserved + 2B flags

const IF_IS_ANIM: u16 = 1;
const IF_HAS_THUMB: u16 = 2;

const FF_BEGIN: u8 = 1;
const FF_END: u8 = 128;

const C_RAW: u8 = 1;
const C_RLE: u8 = 2;
const C_END: u8 = 255;

struct RawFrameHeader {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    duration_ms: u32,
    flags: u8,
    datalen: u32,
}

trait AnimVersion {
    const VERSION: u16;
    const MAX_CHUNK_SIZE: usize;

    fn write_frame_header(out: &mut dyn Write, h: &RawFrameHeader) -> Result<(), FormatError>;
    /// `Ok(None)` at a clean end-of-stream (no bytes of a new header read yet).
    fn read_frame_header(source: &mut dyn Read) -> Result<Option<RawFrameHeader>, FormatError>;
    fn write_chunk_header(out: &mut dyn Write, command: u8, datalen: usize) -> Result<(), FormatError>;
    fn read_chunk_header(source: &mut dyn Read) -> Result<(u8, usize), FormatError>;

    /// The `w`/`h` pair to put in the frame header for a region of the given
    /// real dimensions. V4's fields are wide enough to always carry the real
    /// values; v3's are a single byte each, so a region spanning the whole
    /// canvas (or otherwise wider/taller than 255) is written as `0, 0`,
    /// which `read_frame_header`'s caller expands back to the canvas size.
    fn header_dims(w: u32, h: u32, spans_full_canvas: bool) -> (u32, u32) {
        let _ = spans_full_canvas;
        (w, h)
    }
}

struct AnimV3;

impl AnimVersion for AnimV3 {
    const VERSION: u16 = 3;
    const MAX_CHUNK_SIZE: usize = 255;

    fn write_frame_header(out: &mut dyn Write, h: &RawFrameHeader) -> Result<(), FormatError> {
        out.write_all(&(h.x as u16).to_le_bytes())?;
        out.write_all(&(h.y as u16).to_le_bytes())?;
        out.write_all(&[h.w as u8, h.h as u8, (h.duration_ms / 10) as u8, h.flags])?;
        out.write_all(&h.datalen.to_le_bytes())?;
        Ok(())
    }

    fn read_frame_header(source: &mut dyn Read) -> Result<Option<RawFrameHeader>, FormatError> {
        let mut buf = [0u8; 12];
        if !try_read_exact(source, &mut buf, "anim v3 frame header")? {
            return Ok(None);
        }
        Ok(Some(RawFrameHeader {
            x: u16::from_le_bytes([buf[0], buf[1]]) as u32,
            y: u16::from_le_bytes([buf[2], buf[3]]) as u32,
            w: buf[4] as u32,
            h: buf[5] as u32,
            duration_ms: buf[6] as u32 * 10,
            flags: buf[7],
            datalen: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }))
    }

    fn write_chunk_header(out: &mut dyn Write, command: u8, datalen: usize) -> Result<(), FormatError> {
        out.write_all(&[command, datalen as u8])?;
        Ok(())
    }

    fn header_dims(w: u32, h: u32, spans_full_canvas: bool) -> (u32, u32) {
        if spans_full_canvas || w > 255 || h > 255 {
            (0, 0)
        } else {
            (w, h)
        }
    }

    fn read_chunk_header(source: &mut dyn Read) -> Result<(u8, usize), FormatError> {
        let mut buf = [0u8; 2];
        read_exact(source, &mut buf, "anim v3 chunk header")?;
        Ok((buf[0], buf[1] as usize))
    }
}

struct AnimV4;

impl AnimVersion for AnimV4 {
    const VERSION: u16 = 4;
    // Real device targets have much less RAM than 65535 pixels per chunk
    // would require buffering.
    const MAX_CHUNK_SIZE: usize = 5000;

    fn write_frame_header(out: &mut dyn Write, h: &RawFrameHeader) -> Result<(), FormatError> {
        out.write_all(&(h.x as u16).to_le_bytes())?;
        out.write_all(&(h.y as u16).to_le_bytes())?;
        out.write_all(&(h.w as u16).to_le_bytes())?;
        out.write_all(&(h.h as u16).to_le_bytes())?;
        out.write_all(&(h.duration_ms as u16).to_le_bytes())?;
        out.write_all(&[h.flags])?;
        out.write_all(&h.datalen.to_le_bytes())?;
        Ok(())
    }

    fn read_frame_header(source: &mut dyn Read) -> Result<Option<RawFrameHeader>, FormatError> {
        let mut buf = [0u8; 15];
        if !try_read_exact(source, &mut buf, "anim v4 frame header")? {
            return Ok(None);
        }
        Ok(Some(RawFrameHeader {
            x: u16::from_le_bytes([buf[0], buf[1]]) as u32,
            y: u16::from_le_bytes([buf[2], buf[3]]) as u32,
            w: u16::from_le_bytes([buf[4], buf[5]]) as u32,
            h: u16::from_le_bytes([buf[6], buf[7]]) as u32,
            duration_ms: u16::from_le_bytes([buf[8], buf[9]]) as u32,
            flags: buf[10],
            datalen: u32::from_le_bytes([buf[11], buf[12], buf[13], buf[14]]),
        }))
    }

    fn write_chunk_header(out: &mut dyn Write, command: u8, datalen: usize) -> Result<(), FormatError> {
        out.write_all(&[command])?;
        out.write_all(&(datalen as u16).to_le_bytes())?;
        Ok(())
    }

    fn read_chunk_header(source: &mut dyn Read) -> Result<(u8, usize), FormatError> {
        let command = read_u8(source, "anim v4 chunk command")?;
        let datalen = read_u16_le(source, "anim v4 chunk datalen")? as usize;
        Ok((command, datalen))
    }
}

fn write_generic<V: AnimVersion>(image: &PreparedImage, cfg: &WriterConfig, out: &mut dyn Write) -> Result<(), FormatError> {
    out.write_all(MAGIC)?;
    out.write_all(&V::VERSION.to_le_bytes())?;
    out.write_all(&(MAGIC_HEADER_SIZE + HEADER_SIZE).to_le_bytes())?;

    let mut flags = 0u16;
    if image.is_animated {
        flags |= IF_IS_ANIM;
    }
    if cfg.do_thumbnail {
        flags |= IF_HAS_THUMB;
    }

    out.write_all(&(image.width as u16).to_le_bytes())?;
    out.write_all(&(image.height as u16).to_le_bytes())?;
    out.write_all(&[cfg.bpp as u8, 0u8])?;
    out.write_all(&flags.to_le_bytes())?;

    if cfg.do_thumbnail {
        if let Some(thumb) = &image.thumbnail {
            write_frame_as_single_region::<V>(thumb, cfg.bpp, 0, out)?;
        }
    }

    for (diff, frame) in image.frames() {
        let rects = diff.unwrap_or_default();
        let regions: Vec<(u32, u32, u32, u32)> = if rects.is_empty() {
            vec![(0, 0, frame.width, frame.height)]
        } else {
            rects.iter().map(|r| (r.x, r.y, r.w, r.h)).collect()
        };

        let last = regions.len() - 1;
        for (i, rect) in regions.into_iter().enumerate() {
            let mut region_flags = 0u8;
            if i == 0 {
                region_flags |= FF_BEGIN;
            }
            let duration_ms = if i == last {
                region_flags |= FF_END;
                frame.duration_ms
            } else {
                0
            };
            write_region::<V>(&frame, rect, cfg.bpp, duration_ms, region_flags, out)?;
        }
    }

    Ok(())
}

fn write_frame_as_single_region<V: AnimVersion>(frame: &Frame, bpp: u32, flags: u8, out: &mut dyn Write) -> Result<(), FormatError> {
    write_region::<V>(frame, (0, 0, frame.width, frame.height), bpp, 0, flags, out)
}

fn write_region<V: AnimVersion>(
    frame: &Frame,
    (x, y, w, h): (u32, u32, u32, u32),
    bpp: u32,
    duration_ms: u32,
    flags: u8,
    out: &mut dyn Write,
) -> Result<(), FormatError> {
    let mut body = Vec::new();
    encode_region_pixels::<V>(frame, (x, y, w, h), bpp, &mut body)?;

    let spans_full_canvas = x == 0 && y == 0 && w == frame.width && h == frame.height;
    let (header_w, header_h) = V::header_dims(w, h, spans_full_canvas);

    let header = RawFrameHeader { x, y, w: header_w, h: header_h, duration_ms, flags, datalen: body.len() as u32 };
    V::write_frame_header(out, &header)?;
    out.write_all(&body)?;
    Ok(())
}

fn encode_region_pixels<V: AnimVersion>(frame: &Frame, rect: (u32, u32, u32, u32), bpp: u32, out: &mut Vec<u8>) -> Result<(), FormatError> {
    let raw_pixels = frame.rect_pixels(Some(rect));

    if bpp == 16 {
        let pixels: Vec<u16> = raw_pixels.iter().map(|&[r, g, b]| color_565(r, g, b)).collect();
        for (run_len, group) in rle_chunks(&pixels, V::MAX_CHUNK_SIZE, false) {
            if run_len > 0 {
                V::write_chunk_header(out, C_RLE, run_len as usize)?;
                out.extend_from_slice(&group[0].to_le_bytes());
            } else {
                V::write_chunk_header(out, C_RAW, group.len())?;
                for px in &group {
                    out.extend_from_slice(&px.to_le_bytes());
                }
            }
        }
    } else {
        for (run_len, group) in rle_chunks(&raw_pixels, V::MAX_CHUNK_SIZE, false) {
            if run_len > 0 {
                V::write_chunk_header(out, C_RLE, run_len as usize)?;
                out.extend_from_slice(&group[0]);
            } else {
                V::write_chunk_header(out, C_RAW, group.len())?;
                for px in &group {
                    out.extend_from_slice(px);
                }
            }
        }
    }

    V::write_chunk_header(out, C_END, 0)?;
    Ok(())
}

fn read_generic<V: AnimVersion>(source: &mut dyn ReadSeek) -> Result<DecodedImage, FormatError> {
    let mut magic = [0u8; 4];
    read_exact(source, &mut magic, "anim magic")?;
    if &magic != MAGIC {
        return Err(FormatError::BadFileType("anim"));
    }
    let version = read_u16_le(source, "anim version")?;
    if version != V::VERSION {
        return Err(FormatError::BadFileType("anim"));
    }
    let offset = read_u16_le(source, "anim header offset")?;
    if offset != MAGIC_HEADER_SIZE + HEADER_SIZE {
        return Err(FormatError::validation(
            "anim header offset",
            MAGIC_HEADER_SIZE + HEADER_SIZE,
            offset,
        ));
    }

    let width = read_u16_le(source, "anim width")? as u32;
    let height = read_u16_le(source, "anim height")? as u32;
    if width == 0 || height == 0 {
        return Err(FormatError::validation("anim dimensions", "nonzero width and height", "zero"));
    }
    let bpp = read_u8(source, "anim bpp")? as u32;
    if bpp != 16 && bpp != 24 {
        return Err(FormatError::validation("anim bpp", "16 or 24", bpp));
    }
    let reserved = read_u8(source, "anim reserved")?;
    if reserved != 0 {
        return Err(FormatError::validation("anim reserved byte", 0, reserved));
    }
    let flags = read_u16_le(source, "anim flags")?;
    let is_anim = flags & IF_IS_ANIM != 0;
    let has_thumb = flags & IF_HAS_THUMB != 0;

    let mut raw_frames: Vec<(RawFrameHeader, DecodedFrame)> = Vec::new();
    while let Some(fh) = V::read_frame_header(source)? {
        if fh.x >= width {
            return Err(FormatError::validation("anim frame x", format!("< {width}"), fh.x));
        }
        if fh.y >= height {
            return Err(FormatError::validation("anim frame y", format!("< {height}"), fh.y));
        }

        let (w, h) = if V::VERSION < 4 {
            if (fh.w == 0) != (fh.h == 0) {
                return Err(FormatError::validation("anim frame w/h", "both zero or both set", "exactly one zero"));
            }
            (if fh.w == 0 { width } else { fh.w }, if fh.h == 0 { height } else { fh.h })
        } else {
            if fh.w == 0 || fh.h == 0 {
                return Err(FormatError::validation("anim frame w/h", "both nonzero", "zero"));
            }
            (fh.w, fh.h)
        };
        if w > width {
            return Err(FormatError::validation("anim frame w", format!("<= {width}"), w));
        }
        if h > height {
            return Err(FormatError::validation("anim frame h", format!("<= {height}"), h));
        }

        let (pixels, consumed) = read_region_pixels::<V>(source, bpp, (w * h) as usize)?;
        if consumed != fh.datalen as usize {
            return Err(FormatError::validation("anim frame datalen", fh.datalen, consumed));
        }

        let (duration_ms, x, y) = (fh.duration_ms, fh.x, fh.y);
        raw_frames.push((RawFrameHeader { w, h, ..fh }, DecodedFrame { x, y, w, h, duration_ms, pixels }));
    }

    let mut frame_sets = Vec::new();
    let mut thumb = None;
    if has_thumb && !raw_frames.is_empty() {
        let (_, frame) = raw_frames.remove(0);
        thumb = Some(frame);
    }

    let mut current: Vec<DecodedFrame> = Vec::new();
    for (fh, frame) in raw_frames {
        if is_anim {
            if fh.flags & FF_BEGIN != 0 {
                current = Vec::new();
            }
            current.push(frame);
            if fh.flags & FF_END != 0 {
                frame_sets.push(FrameSet::Frames(std::mem::take(&mut current)));
            }
        } else {
            frame_sets.push(FrameSet::Frames(vec![frame]));
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
        flags_desc: format!("anim v{version}, is_anim={is_anim}, has_thumb={has_thumb}"),
        frame_sets: all_sets,
    })
}

/// Returns `(pixels, bytes_consumed)` so callers can validate `datalen`.
fn read_region_pixels<V: AnimVersion>(source: &mut dyn ReadSeek, bpp: u32, total: usize) -> Result<(Vec<[u8; 4]>, usize), FormatError> {
    let mut pixels = Vec::with_capacity(total);
    let mut consumed = 0usize;

    loop {
        let (command, datalen) = V::read_chunk_header(source)?;
        consumed += if V::VERSION < 4 { 2 } else { 3 };
        match command {
            C_RAW => {
                for _ in 0..datalen {
                    let (rgba, n) = read_one_pixel(source, bpp)?;
                    consumed += n;
                    pixels.push(rgba);
                }
            }
            C_RLE => {
                let (rgba, n) = read_one_pixel(source, bpp)?;
                consumed += n;
                for _ in 0..datalen {
                    pixels.push(rgba);
                }
            }
            C_END => {
                if datalen != 0 {
                    return Err(FormatError::validation("anim chunk END datalen", 0, datalen));
                }
                break;
            }
            other => {
                return Err(FormatError::validation("anim chunk command", "1 (RAW), 2 (RLE), or 255 (END)", other));
            }
        }
    }

    if pixels.len() != total {
        return Err(FormatError::validation("anim frame pixel count", total, pixels.len()));
    }

    Ok((pixels, consumed))
}

fn read_one_pixel(source: &mut dyn Read, bpp: u32) -> Result<([u8; 4], usize), FormatError> {
    if bpp == 16 {
        let raw = read_u16_le(source, "anim 16bpp pixel")?;
        let (r, g, b) = color_565_to_888(raw);
        Ok(([r, g, b, 255], 2))
    } else {
        let mut rgb = [0u8; 3];
        read_exact(source, &mut rgb, "anim 24bpp pixel")?;
        Ok(([rgb[0], rgb[1], rgb[2], 255], 3))
    }
}

pub fn write_v3(image: &PreparedImage, cfg: &WriterConfig, out: &mut dyn Write) -> Result<(), FormatError> {
    write_generic::<AnimV3>(image, cfg, out)
}

pub fn read_v3(source: &mut dyn ReadSeek) -> Result<DecodedImage, FormatError> {
    read_generic::<AnimV3>(source)
}

pub fn write_v4(image: &PreparedImage, cfg: &WriterConfig, out: &mut dyn Write) -> Result<(), FormatError> {
    write_generic::<AnimV4>(image, cfg, out)
}

pub fn read_v4(source: &mut dyn ReadSeek) -> Result<DecodedImage, FormatError> {
    read_generic::<AnimV4>(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn v3_frame_header_round_trips() {
        let mut buf = Vec::new();
        let h = RawFrameHeader { x: 10, y: 20, w: 100, h: 50, duration_ms: 230, flags: FF_BEGIN | FF_END, datalen: 77 };
        AnimV3::write_frame_header(&mut buf, &h).unwrap();
        assert_eq!(buf.len(), 12);

        let mut cursor = Cursor::new(buf);
        let read_back = AnimV3::read_frame_header(&mut cursor).unwrap().unwrap();
        assert_eq!(read_back.x, 10);
        assert_eq!(read_back.y, 20);
        assert_eq!(read_back.w, 100);
        assert_eq!(read_back.h, 50);
        assert_eq!(read_back.duration_ms, 230); // rounds to nearest 10ms
        assert_eq!(read_back.datalen, 77);
    }

    #[test]
    fn v4_frame_header_round_trips_exact_duration() {
        let mut buf = Vec::new();
        let h = RawFrameHeader { x: 1, y: 2, w: 3, h: 4, duration_ms: 233, flags: 0, datalen: 9 };
        AnimV4::write_frame_header(&mut buf, &h).unwrap();
        assert_eq!(buf.len(), 15);

        let mut cursor = Cursor::new(buf);
        let read_back = AnimV4::read_frame_header(&mut cursor).unwrap().unwrap();
        assert_eq!(read_back.duration_ms, 233);
    }

    #[test]
    fn frame_header_read_returns_none_at_clean_eof() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(AnimV3::read_frame_header(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn v3_chunk_header_caps_at_255() {
        let mut buf = Vec::new();
        AnimV3::write_chunk_header(&mut buf, C_RLE, 255).unwrap();
        assert_eq!(buf, vec![C_RLE, 255]);
    }

    #[test]
    fn v4_chunk_header_supports_larger_datalen() {
        let mut buf = Vec::new();
        AnimV4::write_chunk_header(&mut buf, C_RAW, 5000).unwrap();
        let mut cursor = Cursor::new(buf);
        let (cmd, len) = AnimV4::read_chunk_header(&mut cursor).unwrap();
        assert_eq!(cmd, C_RAW);
        assert_eq!(len, 5000);
    }

    #[test]
    fn round_trips_a_solid_region_24bpp() {
        let frame = Frame::from_pixels_for_test(2, 2, vec![[1, 2, 3]; 4], 0);
        let mut body = Vec::new();
        encode_region_pixels::<AnimV3>(&frame, (0, 0, 2, 2), 24, &mut body).unwrap();

        let mut cursor = Cursor::new(body);
        let (pixels, _) = read_region_pixels::<AnimV3>(&mut cursor, 24, 4).unwrap();
        assert!(pixels.iter().all(|&p| p == [1, 2, 3, 255]));
    }
}
