//! Byte-exact boundary scenarios and end-to-end round-trips driven through
//! the public API: a real temp image file goes in, the wire format that
//! comes out is checked against hand-worked byte sequences.

use std::io::Cursor;

use image::{Rgb, RgbImage};
use microdisplay_codec::format::{FrameSet, WriterConfig};
use microdisplay_codec::prepare::{BackgroundColorSpec, PreparedImage};

fn write_png(img: &RgbImage) -> tempfile::NamedTempFile {
    let file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
    img.save(file.path()).unwrap();
    file
}

fn solid_image(w: u32, h: u32, rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(w, h, Rgb(rgb))
}

fn writer_cfg(bpp: u32) -> WriterConfig {
    WriterConfig { bpp, do_thumbnail: false, excluded_ops: vec![] }
}

#[test]
fn qoi_single_red_pixel_is_26_bytes() {
    let file = write_png(&solid_image(1, 1, [255, 0, 0]));
    let image = PreparedImage::open(file.path(), 1, 1, None, BackgroundColorSpec::Literal([0, 0, 0])).unwrap();

    let mut out = Vec::new();
    microdisplay_codec::qoi::write(&image, &writer_cfg(24), &mut out).unwrap();

    assert_eq!(out.len(), 26);
    assert_eq!(&out[0..4], b"qoif");
    assert_eq!(&out[4..14], &[1, 0, 0, 0, 1, 0, 0, 0, 3, 1]);
    assert_eq!(&out[14..18], &[0xFE, 255, 0, 0]);
    assert_eq!(&out[18..26], &[0, 0, 0, 0, 0, 0, 0, 1]);
}

#[test]
fn qoi_solid_10x10_red_splits_the_run_at_63() {
    let file = write_png(&solid_image(10, 10, [255, 0, 0]));
    let image = PreparedImage::open(file.path(), 10, 10, None, BackgroundColorSpec::Literal([0, 0, 0])).unwrap();

    let mut out = Vec::new();
    microdisplay_codec::qoi::write(&image, &writer_cfg(24), &mut out).unwrap();

    // The chunker caps an RLE group at 63 pixels (matching the original
    // encoder's `get_pixels_rle(63, only_chunk_rle=True)`), so a 100-pixel
    // run becomes two RUN ops (63, then 37) rather than one: RGB(4) +
    // RUN(62 more)(1) + INDEX(1) + RUN(36 more)(1) + trailer(8) = 29.
    assert_eq!(out.len(), 14 + 7 + 8);
    assert_eq!(&out[14..18], &[0xFE, 255, 0, 0]);
    assert_eq!(out[18], 0b1100_0000 | 61);
    assert_eq!(out[19], 50); // cache index of (255, 0, 0, 255)
    assert_eq!(out[20], 0b1100_0000 | 35);
    assert_eq!(&out[21..29], &[0, 0, 0, 0, 0, 0, 0, 1]);
}

#[test]
fn anim_v3_header_for_240x320_16bpp_with_thumbnail() {
    let file = write_png(&solid_image(240, 320, [1, 2, 3]));
    let image = PreparedImage::open(file.path(), 240, 320, Some(80), BackgroundColorSpec::Literal([0, 0, 0])).unwrap();
    let cfg = WriterConfig { bpp: 16, do_thumbnail: true, excluded_ops: vec![] };

    let mut out = Vec::new();
    microdisplay_codec::anim::write_v3(&image, &cfg, &mut out).unwrap();

    assert_eq!(&out[0..4], b"AImg");
    assert_eq!(&out[4..6], &3u16.to_le_bytes());
    // header_offset = size(magic+version+offset) + size(header fields) = 16,
    // matching the original Python struct.calcsize("<IHH") + calcsize("<HHBBH").
    assert_eq!(&out[6..8], &16u16.to_le_bytes());
    assert_eq!(&out[8..10], &240u16.to_le_bytes());
    assert_eq!(&out[10..12], &320u16.to_le_bytes());
    assert_eq!(out[12], 16); // bpp
    assert_eq!(out[13], 0); // reserved
    assert_eq!(&out[14..16], &2u16.to_le_bytes()); // IF_HAS_THUMB, not animated
}

#[test]
fn qoif2_magic_parse_accepts_and_rejects() {
    let good = [0x71, 0x6f, 0x69, 0x46, 0, 0, 0, 1, 0, 0, 0, 1, 3, 1, 2];
    let mut cursor = Cursor::new(&good[..]);
    // Fails later (no trailer/data), but must get past the magic check.
    let err = microdisplay_codec::qoi2::read(&mut cursor).unwrap_err();
    assert!(!err.is_bad_file_type());

    let bad = [0x71, 0x6f, 0x69, 0x66];
    let mut cursor = Cursor::new(&bad[..]);
    let err = microdisplay_codec::qoi2::read(&mut cursor).unwrap_err();
    assert!(err.is_bad_file_type());
}

#[test]
fn background_edge_color_from_bordered_image() {
    let mut img = RgbImage::from_pixel(3, 3, Rgb([0x11, 0x22, 0x33]));
    img.put_pixel(1, 1, Rgb([0xff, 0xff, 0xff]));
    let file = write_png(&img);

    let image = PreparedImage::open(file.path(), 3, 3, None, BackgroundColorSpec::Edge).unwrap();
    assert_eq!(image.bg_color, [0x11, 0x22, 0x33]);
}

#[test]
fn qoif2_16bpp_round_trip_is_lossy_565() {
    let mut img = RgbImage::new(4, 4);
    for y in 0..4 {
        for x in 0..4 {
            img.put_pixel(x, y, Rgb([x as u8 * 40, y as u8 * 30, 200]));
        }
    }
    let file = write_png(&img);
    let image = PreparedImage::open(file.path(), 4, 4, None, BackgroundColorSpec::Literal([0, 0, 0])).unwrap();

    let mut out = Vec::new();
    microdisplay_codec::qoi2::write(&image, &writer_cfg(16), &mut out).unwrap();

    let mut cursor = Cursor::new(out);
    let decoded = microdisplay_codec::qoi2::read(&mut cursor).unwrap();
    let FrameSet::Frames(frames) = &decoded.frame_sets[0] else { panic!("expected a frame set") };
    let frame = &frames[0];

    for y in 0..4u32 {
        for x in 0..4u32 {
            let (r, g, b) = microdisplay_codec::pixel::color_565_to_888(microdisplay_codec::pixel::color_565(
                x as u8 * 40,
                y as u8 * 30,
                200,
            ));
            let idx = (y * 4 + x) as usize;
            assert_eq!(frame.pixels[idx], [r, g, b, 255]);
        }
    }
}

#[test]
fn qoif2_default_thumbnail_does_not_corrupt_first_frame() {
    let mut img = RgbImage::new(4, 4);
    for y in 0..4 {
        for x in 0..4 {
            img.put_pixel(x, y, Rgb([(x * 37) as u8, (y * 53) as u8, ((x + y) * 11) as u8]));
        }
    }
    let file = write_png(&img);
    // `Some(2)` asks for a thumbnail the way `converter`'s default does.
    let image = PreparedImage::open(file.path(), 4, 4, Some(2), BackgroundColorSpec::Literal([0, 0, 0])).unwrap();
    let cfg = WriterConfig { bpp: 24, do_thumbnail: true, excluded_ops: vec![] };

    let mut out = Vec::new();
    microdisplay_codec::qoi2::write(&image, &cfg, &mut out).unwrap();

    let mut cursor = Cursor::new(out);
    let decoded = microdisplay_codec::qoi2::read(&mut cursor).unwrap();
    // QOIF2 never carries a thumbnail block, so every frame set is a real frame.
    assert!(decoded.frame_sets.iter().all(|fs| matches!(fs, FrameSet::Frames(_))));
    let FrameSet::Frames(frames) = &decoded.frame_sets[0] else { panic!("expected a frame set") };
    let frame = &frames[0];

    for y in 0..4u32 {
        for x in 0..4u32 {
            let expected = [(x * 37) as u8, (y * 53) as u8, ((x + y) * 11) as u8, 255];
            assert_eq!(frame.pixels[(y * 4 + x) as usize], expected);
        }
    }
}

#[test]
fn anim_v3_full_canvas_frame_taller_than_255_round_trips() {
    let mut img = RgbImage::new(240, 320);
    for y in 0..320u32 {
        for x in 0..240u32 {
            img.put_pixel(x, y, Rgb([(x % 256) as u8, (y % 256) as u8, 7]));
        }
    }
    let file = write_png(&img);
    let image = PreparedImage::open(file.path(), 240, 320, None, BackgroundColorSpec::Literal([0, 0, 0])).unwrap();
    let cfg = WriterConfig { bpp: 24, do_thumbnail: false, excluded_ops: vec![] };

    let mut out = Vec::new();
    microdisplay_codec::anim::write_v3(&image, &cfg, &mut out).unwrap();

    let mut cursor = Cursor::new(out);
    let decoded = microdisplay_codec::anim::read_v3(&mut cursor).unwrap();
    let FrameSet::Frames(frames) = &decoded.frame_sets[0] else { panic!("expected a frame set") };
    assert_eq!(frames[0].w, 240);
    assert_eq!(frames[0].h, 320);
    assert_eq!(frames[0].pixels.len(), 240 * 320);
    for y in 0..320u32 {
        for x in 0..240u32 {
            let expected = [(x % 256) as u8, (y % 256) as u8, 7, 255];
            assert_eq!(frames[0].pixels[(y * 240 + x) as usize], expected);
        }
    }
}

#[test]
fn qoif_24bpp_round_trip_is_exact() {
    let mut img = RgbImage::new(6, 5);
    for y in 0..5 {
        for x in 0..6 {
            img.put_pixel(x, y, Rgb([(x * 37) as u8, (y * 53) as u8, ((x + y) * 11) as u8]));
        }
    }
    let file = write_png(&img);
    let image = PreparedImage::open(file.path(), 6, 5, None, BackgroundColorSpec::Literal([0, 0, 0])).unwrap();

    let mut out = Vec::new();
    microdisplay_codec::qoi::write(&image, &writer_cfg(24), &mut out).unwrap();

    let mut cursor = Cursor::new(out);
    let decoded = microdisplay_codec::qoi::read(&mut cursor).unwrap();
    let FrameSet::Frames(frames) = &decoded.frame_sets[0] else { panic!("expected a frame set") };
    let frame = &frames[0];

    for y in 0..5u32 {
        for x in 0..6u32 {
            let expected = [(x * 37) as u8, (y * 53) as u8, ((x + y) * 11) as u8, 255];
            assert_eq!(frame.pixels[(y * 6 + x) as usize], expected);
        }
    }
}
