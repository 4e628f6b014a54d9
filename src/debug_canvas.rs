//! Builds a grid visualization of a decoded image's frame sets: one cell
//! per thumbnail/frame-set, each showing the frame composited by replaying
//! its region updates in order (later regions drawn over earlier ones,
//! matching how a real display would apply successive dirty-rectangle
//! writes). Per-cell metadata goes to the log rather than being drawn into
//! the image, since nothing in this crate's stack does text rendering.

use image::{Rgba, RgbaImage};

use crate::format::{DecodedFrame, DecodedImage, FrameSet};

const BORDER: u32 = 1;
const PAD: u32 = 5;

/// Composite one frame set's region updates onto a `width x height` canvas,
/// later regions drawn over earlier ones.
fn composite_cell(width: u32, height: u32, frames: &[DecodedFrame]) -> RgbaImage {
    let mut cell = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    for frame in frames {
        for fy in 0..frame.h {
            for fx in 0..frame.w {
                let idx = (fy * frame.w + fx) as usize;
                let [r, g, b, a] = frame.pixels[idx];
                let (cx, cy) = (frame.x + fx, frame.y + fy);
                if cx < width && cy < height {
                    cell.put_pixel(cx, cy, Rgba([r, g, b, a]));
                }
            }
        }
    }
    cell
}

/// Render every frame set of `image` into a square-ish grid, each cell
/// bordered and padded the way the original debug viewer laid cells out.
pub fn render(label: &str, image: &DecodedImage) -> RgbaImage {
    let n = image.frame_sets.len().max(1);
    let dims = (n as f64).sqrt().ceil() as u32;

    let block_w = image.width + (BORDER + PAD) * 2;
    let block_h = image.height + (BORDER + PAD) * 2;

    let canvas_w = block_w * dims;
    let canvas_h = block_h * dims;
    let mut canvas = RgbaImage::from_pixel(canvas_w, canvas_h, Rgba([255, 255, 255, 255]));

    #[cfg(feature = "logging")]
    log::debug!("{label}: {}x{} @ {}bpp, {}", image.width, image.height, image.bpp, image.flags_desc);

    for (i, set) in image.frame_sets.iter().enumerate() {
        let col = (i as u32) % dims;
        let row = (i as u32) / dims;
        let ox = col * block_w + PAD + BORDER;
        let oy = row * block_h + PAD + BORDER;

        let (kind, frames): (&str, &[DecodedFrame]) = match set {
            FrameSet::Thumbnail(f) => ("thumbnail", std::slice::from_ref(f)),
            FrameSet::Frames(fs) => ("frame", fs.as_slice()),
        };
        let last_duration = frames.last().map(|f| f.duration_ms).unwrap_or(0);
        #[cfg(feature = "logging")]
        log::debug!("{label}: cell {i} ({kind}): {} region update(s), {last_duration}ms", frames.len());
        #[cfg(not(feature = "logging"))]
        let _ = (kind, last_duration);

        draw_border(&mut canvas, ox.saturating_sub(BORDER), oy.saturating_sub(BORDER), image.width + BORDER * 2, image.height + BORDER * 2);

        let cell = composite_cell(image.width, image.height, frames);
        image::imageops::overlay(&mut canvas, &cell, ox as i64, oy as i64);
    }

    canvas
}

fn draw_border(canvas: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32) {
    let black = Rgba([0, 0, 0, 255]);
    for px in x..x + w {
        if px < canvas.width() {
            if y < canvas.height() {
                canvas.put_pixel(px, y, black);
            }
            if y + h - 1 < canvas.height() {
                canvas.put_pixel(px, y + h - 1, black);
            }
        }
    }
    for py in y..y + h {
        if py < canvas.height() {
            if x < canvas.width() {
                canvas.put_pixel(x, py, black);
            }
            if x + w - 1 < canvas.width() {
                canvas.put_pixel(x + w - 1, py, black);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(w: u32, h: u32, rgba: [u8; 4]) -> DecodedFrame {
        DecodedFrame { x: 0, y: 0, w, h, duration_ms: 0, pixels: vec![rgba; (w * h) as usize] }
    }

    #[test]
    fn composites_later_regions_over_earlier_ones() {
        let base = DecodedFrame { x: 0, y: 0, w: 4, h: 4, duration_ms: 0, pixels: vec![[10, 10, 10, 255]; 16] };
        let mut patch = solid_frame(2, 2, [200, 0, 0, 255]);
        patch.x = 1;
        patch.y = 1;
        let cell = composite_cell(4, 4, &[base, patch]);
        assert_eq!(*cell.get_pixel(1, 1), Rgba([200, 0, 0, 255]));
        assert_eq!(*cell.get_pixel(0, 0), Rgba([10, 10, 10, 255]));
    }

    #[test]
    fn grid_canvas_size_accounts_for_border_and_padding() {
        let image = DecodedImage {
            width: 8,
            height: 8,
            bpp: 24,
            flags_desc: "test".to_string(),
            frame_sets: vec![FrameSet::Frames(vec![solid_frame(8, 8, [1, 1, 1, 255])])],
        };
        let canvas = render("test", &image);
        let block = 8 + (BORDER + PAD) * 2;
        assert_eq!(canvas.width(), block);
        assert_eq!(canvas.height(), block);
    }
}
