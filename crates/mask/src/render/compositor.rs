use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Rgba, RgbaImage};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::render::color::distinct_colors;
use crate::types::MaskColor;

/// Rendering settings for previews and thumbnails.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CompositorConfig {
    /// Alpha applied to every mask layer, `0.0..=1.0`.
    pub opacity: f32,
    /// Maximum output width. `None` keeps full resolution.
    pub thumbnail_width: Option<u32>,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            opacity: 0.5,
            thumbnail_width: Some(256),
        }
    }
}

/// Paints masks over a base image and produces thumbnails.
#[derive(Debug, Clone, Default)]
pub struct Compositor {
    config: CompositorConfig,
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Single mask preview, downscaled to the configured thumbnail width.
    pub fn preview(&self, base: &DynamicImage, mask: &GrayImage, color: MaskColor) -> RgbaImage {
        let rendered = single_overlay(base, mask, color, self.config.opacity);
        self.shrink(rendered)
    }

    /// Combined preview of every mask in collection order.
    ///
    /// Returns `None` when no mask could be loaded.
    pub fn combined_preview<I>(&self, base: &DynamicImage, masks: I) -> Option<RgbaImage>
    where
        I: IntoIterator<Item = Result<GrayImage>>,
    {
        combined_overlay(base, masks, self.config.opacity).map(|img| self.shrink(img))
    }

    fn shrink(&self, image: RgbaImage) -> RgbaImage {
        match self.config.thumbnail_width {
            Some(max_width) => thumbnail(image, max_width),
            None => image,
        }
    }
}

/// Alpha-composite one colored mask layer over `base`.
///
/// The base is resampled (bilinear) to the mask's dimensions when they differ;
/// the mask itself is never resampled.
pub fn single_overlay(
    base: &DynamicImage,
    mask: &GrayImage,
    color: MaskColor,
    opacity: f32,
) -> RgbaImage {
    let mut canvas = base_canvas(base, mask.width(), mask.height());
    paint_layer(&mut canvas, mask, color, opacity);
    canvas
}

/// Alpha-composite every mask in order, later masks on top.
///
/// Colors come from [`distinct_colors`] using the number of entries, so the
/// color of each position is stable even when an entry fails to load. Failed
/// entries are skipped. The canvas takes the dimensions of the first mask
/// that loads; `None` means nothing loaded.
pub fn combined_overlay<I>(base: &DynamicImage, masks: I, opacity: f32) -> Option<RgbaImage>
where
    I: IntoIterator<Item = Result<GrayImage>>,
{
    let masks: Vec<Result<GrayImage>> = masks.into_iter().collect();
    let colors = distinct_colors(masks.len());

    let mut canvas: Option<RgbaImage> = None;
    for (position, (mask, color)) in masks.iter().zip(colors).enumerate() {
        let mask = match mask {
            Ok(mask) => mask,
            Err(e) => {
                debug!("Skipping mask #{} in combined overlay: {}", position, e);
                continue;
            }
        };
        let target = canvas.get_or_insert_with(|| base_canvas(base, mask.width(), mask.height()));
        paint_layer(target, mask, color, opacity);
    }
    canvas
}

/// The mask alone, painted as `color` at `alpha` on a transparent canvas.
pub fn transparent_overlay(mask: &GrayImage, color: MaskColor, alpha: u8) -> RgbaImage {
    RgbaImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y)[0] != 0 {
            Rgba([color[0], color[1], color[2], alpha])
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

/// Downscale to at most `max_width`, keeping the aspect ratio.
pub fn thumbnail(image: RgbaImage, max_width: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    if max_width == 0 || width <= max_width {
        return image;
    }
    let scaled_height = ((height as f64 * max_width as f64 / width as f64).round() as u32).max(1);
    imageops::resize(&image, max_width, scaled_height, FilterType::Triangle)
}

fn base_canvas(base: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    let rgba = base.to_rgba8();
    if rgba.dimensions() == (width, height) {
        rgba
    } else {
        imageops::resize(&rgba, width, height, FilterType::Triangle)
    }
}

/// Composite `color` at `opacity` wherever the mask is set. A mask whose
/// dimensions differ from the canvas is sampled nearest-neighbour so it stays
/// binary.
fn paint_layer(canvas: &mut RgbaImage, mask: &GrayImage, color: MaskColor, opacity: f32) {
    let alpha = opacity.clamp(0.0, 1.0);
    let (cw, ch) = canvas.dimensions();
    let (mw, mh) = mask.dimensions();
    if mw == 0 || mh == 0 {
        return;
    }

    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let (mx, my) = if (mw, mh) == (cw, ch) {
            (x, y)
        } else {
            (
                ((x as u64 * mw as u64) / cw as u64) as u32,
                ((y as u64 * mh as u64) / ch as u64) as u32,
            )
        };
        if mask.get_pixel(mx.min(mw - 1), my.min(mh - 1))[0] != 0 {
            composite_over(pixel, color, alpha);
        }
    }
}

/// Porter-Duff "over" of a solid color with coverage `alpha` onto `dst`.
fn composite_over(dst: &mut Rgba<u8>, color: MaskColor, alpha: f32) {
    let dst_alpha = dst[3] as f32 / 255.0;
    let out_alpha = alpha + dst_alpha * (1.0 - alpha);
    if out_alpha <= f32::EPSILON {
        *dst = Rgba([0, 0, 0, 0]);
        return;
    }
    for c in 0..3 {
        let blended =
            (color[c] as f32 * alpha + dst[c] as f32 * dst_alpha * (1.0 - alpha)) / out_alpha;
        dst[c] = blended.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
}
