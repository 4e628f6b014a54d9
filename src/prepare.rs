//! Image preparer: opens a source image, picks a background color, and
//! produces a sequence of RGB frames fitted to a target size with
//! letterboxing, plus an optional square thumbnail frame.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, GenericImageView, ImageBuffer, Rgb, RgbImage};

use crate::diff::{diff_frames, Rect};
use crate::error::PrepareError;

/// One rendered frame: packed RGB pixels, row-major, top-left origin.
/// Immutable once built by the preparer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub duration_ms: u32,
    pixels: Vec<[u8; 3]>,
}

impl Frame {
    fn from_rgb_image(img: &RgbImage, duration_ms: u32) -> Self {
        let (width, height) = img.dimensions();
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let p = img.get_pixel(x, y);
                pixels.push([p[0], p[1], p[2]]);
            }
        }
        Frame { width, height, duration_ms, pixels }
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> [u8; 3] {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Pixels of a sub-rectangle (or the whole frame, if `None`) in
    /// row-major order.
    pub fn rect_pixels(&self, rect: Option<(u32, u32, u32, u32)>) -> Vec<[u8; 3]> {
        let (x, y, w, h) = rect.unwrap_or((0, 0, self.width, self.height));
        let mut out = Vec::with_capacity((w * h) as usize);
        for yv in y..y + h {
            for xv in x..x + w {
                out.push(self.get(xv, yv));
            }
        }
        out
    }

    #[cfg(test)]
    pub(crate) fn from_pixels_for_test(width: u32, height: u32, pixels: Vec<[u8; 3]>, duration_ms: u32) -> Self {
        Frame { width, height, duration_ms, pixels }
    }

    pub fn grayscale(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .map(|[r, g, b]| {
                let l = 0.299 * *r as f32 + 0.587 * *g as f32 + 0.114 * *b as f32;
                l.round().clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

/// How the background color for letterboxing/padding should be determined.
#[derive(Clone, Copy, Debug)]
pub enum BackgroundColorSpec {
    /// A literal 24-bit RGB triple.
    Literal([u8; 3]),
    /// The most common pixel color across the whole first frame.
    Common,
    /// The most common color on the 1-pixel-wide border of the first frame.
    Edge,
}

fn most_common<I: Iterator<Item = [u8; 3]>>(pixels: I) -> [u8; 3] {
    let mut order: Vec<[u8; 3]> = Vec::new();
    let mut counts: HashMap<[u8; 3], u64> = HashMap::new();
    for px in pixels {
        let already_present = counts.contains_key(&px);
        if !already_present {
            order.push(px);
        }
        *counts.entry(px).or_insert(0) += 1;
    }
    // A stable ascending sort by count, last element wins: ties go to the
    // color that was *last* to reach the winning count in insertion order,
    // not the first, matching `sorted(pxset.items(), key=...)[-1]`.
    let mut best = order[0];
    let mut best_count = counts[&best];
    for &px in &order[1..] {
        let c = counts[&px];
        if c >= best_count {
            best = px;
            best_count = c;
        }
    }
    best
}

fn edge_pixels(img: &RgbImage) -> impl Iterator<Item = [u8; 3]> + '_ {
    let (w, h) = img.dimensions();
    let top = (0..w).map(move |x| (x, 0));
    let bottom = (0..w).map(move |x| (x, h - 1));
    let left = (1..h.saturating_sub(1)).map(move |y| (0, y));
    let right = (1..h.saturating_sub(1)).map(move |y| (w - 1, y));
    top.chain(bottom).chain(left).chain(right).map(move |(x, y)| {
        let p = img.get_pixel(x, y);
        [p[0], p[1], p[2]]
    })
}

fn compute_background(spec: BackgroundColorSpec, first_frame_rgb: &RgbImage) -> [u8; 3] {
    match spec {
        BackgroundColorSpec::Literal(rgb) => rgb,
        BackgroundColorSpec::Common => {
            let (w, h) = first_frame_rgb.dimensions();
            most_common((0..h).flat_map(move |y| {
                (0..w).map(move |x| {
                    let p = first_frame_rgb.get_pixel(x, y);
                    [p[0], p[1], p[2]]
                })
            }))
        }
        BackgroundColorSpec::Edge => most_common(edge_pixels(first_frame_rgb)),
    }
}

/// Given an input ratio and an output ratio, compute the letterboxed size
/// that fits inside `(w, h)` while preserving the source aspect ratio.
fn letterbox_size(src_w: u32, src_h: u32, w: u32, h: u32) -> (u32, u32) {
    let in_r = src_w as f64 / src_h as f64;
    let out_r = w as f64 / h as f64;
    let (nw, nh) = if out_r >= 1.0 {
        if in_r <= out_r {
            ((h as f64 * in_r).round(), h as f64)
        } else {
            (w as f64, (w as f64 / in_r).round())
        }
    } else if in_r >= out_r {
        (w as f64, (w as f64 / in_r).round())
    } else {
        ((h as f64 * in_r).round(), h as f64)
    };
    (nw.max(1.0) as u32, nh.max(1.0) as u32)
}

fn letterbox(src: &RgbImage, w: u32, h: u32, bg: [u8; 3]) -> RgbImage {
    let (src_w, src_h) = src.dimensions();
    let (nw, nh) = letterbox_size(src_w, src_h, w, h);
    let resized = image::imageops::resize(src, nw, nh, image::imageops::FilterType::Triangle);

    if (nw, nh) == (w, h) {
        return resized;
    }

    let mut canvas: RgbImage = ImageBuffer::from_pixel(w, h, Rgb(bg));
    let x_off = (w - nw) / 2;
    let y_off = (h - nh) / 2;
    image::imageops::overlay(&mut canvas, &resized, x_off as i64, y_off as i64);
    canvas
}

/// Decoded and prepared image ready to drive an encoder: canonical frames
/// fitted to `(width, height)`, optional thumbnail, background color.
pub struct PreparedImage {
    pub width: u32,
    pub height: u32,
    pub thumb_size: u32,
    pub bg_color: [u8; 3],
    pub is_animated: bool,
    pub thumbnail: Option<Frame>,
    raw_frames: Vec<RgbImage>,
    durations_ms: Vec<u32>,
}

impl PreparedImage {
    /// Open `path`, detect animation, and prepare frames fitted to
    /// `(width, height)` with an optional `thumb_size` square thumbnail.
    pub fn open(
        path: &Path,
        width: u32,
        height: u32,
        thumb_size: Option<u32>,
        bg_spec: BackgroundColorSpec,
    ) -> Result<Self, PrepareError> {
        let (raw_frames, durations_ms, is_animated) = Self::decode_frames(path)?;

        #[cfg(feature = "logging")]
        log::info!(
            "{}: {} frame(s), animated={is_animated}, target {width}x{height}",
            path.display(),
            raw_frames.len()
        );

        let bg_color = compute_background(bg_spec, &raw_frames[0]);

        let thumbnail = thumb_size.map(|t| {
            let fitted = letterbox(&raw_frames[0], t, t, bg_color);
            Frame::from_rgb_image(&fitted, 0)
        });

        Ok(PreparedImage {
            width,
            height,
            thumb_size: thumb_size.unwrap_or(0),
            bg_color,
            is_animated,
            thumbnail,
            raw_frames,
            durations_ms,
        })
    }

    fn decode_frames(path: &Path) -> Result<(Vec<RgbImage>, Vec<u32>, bool), PrepareError> {
        let is_gif = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("gif"))
            .unwrap_or(false);

        if is_gif {
            let file = File::open(path).map_err(|e| PrepareError::Open {
                path: path.display().to_string(),
                source: image::ImageError::IoError(e),
            })?;
            let decoder = GifDecoder::new(file).map_err(|e| PrepareError::Open {
                path: path.display().to_string(),
                source: e,
            })?;
            let gif_frames = decoder.into_frames().collect_frames().map_err(|e| PrepareError::Open {
                path: path.display().to_string(),
                source: e,
            })?;

            let is_animated = gif_frames.len() > 1;
            let mut frames = Vec::with_capacity(gif_frames.len());
            let mut durations = Vec::with_capacity(gif_frames.len());
            for f in gif_frames {
                let (numer, denom) = f.delay().numer_denom_ms();
                let ms = if denom == 0 { 0 } else { numer / denom };
                durations.push(ms);
                frames.push(image::DynamicImage::ImageRgba8(f.into_buffer()).to_rgb8());
            }
            Ok((frames, durations, is_animated))
        } else {
            let img = image::open(path).map_err(|e| PrepareError::Open {
                path: path.display().to_string(),
                source: e,
            })?;
            Ok((vec![img.to_rgb8()], vec![0], false))
        }
    }

    /// Number of canonical frames (not counting the thumbnail).
    pub fn frame_count(&self) -> usize {
        self.raw_frames.len()
    }

    /// Iterate fitted frames paired with the dirty regions relative to the
    /// previous fitted frame (`None` for the first frame).
    pub fn frames(&self) -> FrameIter<'_> {
        FrameIter { image: self, index: 0, last: None }
    }
}

pub struct FrameIter<'a> {
    image: &'a PreparedImage,
    index: usize,
    last: Option<Frame>,
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = (Option<Vec<Rect>>, Frame);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.image.raw_frames.len() {
            return None;
        }
        let fitted = letterbox(
            &self.image.raw_frames[self.index],
            self.image.width,
            self.image.height,
            self.image.bg_color,
        );
        let frame = Frame::from_rgb_image(&fitted, self.image.durations_ms[self.index]);
        self.index += 1;

        let diff = self.last.as_ref().map(|prev| diff_frames(prev, &frame));
        self.last = Some(frame.clone());
        Some((diff, frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_landscape_target_narrower_source() {
        // out_r >= 1, in_r > out_r -> width-bound
        let (w, h) = letterbox_size(1000, 500, 240, 320);
        assert_eq!((w, h), (240, 120));
    }

    #[test]
    fn letterbox_landscape_target_wider_source() {
        let (w, h) = letterbox_size(100, 100, 320, 200);
        assert_eq!((w, h), (200, 200));
    }

    #[test]
    fn letterbox_portrait_target() {
        let (w, h) = letterbox_size(200, 100, 80, 240);
        // out_r < 1, in_r(2.0) >= out_r(0.333) -> width-bound
        assert_eq!((w, h), (80, 40));
    }

    #[test]
    fn most_common_breaks_ties_by_last_occurrence() {
        let pixels = vec![[1, 1, 1], [2, 2, 2], [1, 1, 1], [2, 2, 2]];
        assert_eq!(most_common(pixels.into_iter()), [2, 2, 2]);
    }
}
