use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_line_segment_mut, draw_text_mut};
use std::fs;

use crate::symbols::SymbolTable;
use crate::RenderOptions;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const GRID_GRAY: Rgb<u8> = Rgb([128, 128, 128]);

/// Half-glyph correction applied on both axes when centering a symbol.
const GLYPH_NUDGE: i32 = 8;

/// One quantized tile of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLabel {
    /// Sequential counter, 1-based, row-major, reset per frame.
    pub index: u32,
    /// Top-left corner of the block in pixels.
    pub x: u32,
    pub y: u32,
    /// Mean brightness over the in-bounds samples, rounded to the nearest level.
    pub brightness: u8,
    /// Resolved display character.
    pub symbol: char,
}

/// Converts decoded frames into annotated symbol-mosaic frames.
///
/// Holds the symbol table and the loaded font; reusable across all frames of a
/// run without further allocation of either.
pub struct FrameAnnotator {
    symbols: SymbolTable,
    font: FontVec,
    options: RenderOptions,
}

impl FrameAnnotator {
    /// Load the font named by `options` and build the annotator.
    ///
    /// # Errors
    ///
    /// Fails when the font file is missing or is not a parseable font — both
    /// are fatal at startup, before any video handle is opened.
    pub fn new(options: RenderOptions) -> Result<Self> {
        let font_data = fs::read(&options.font_path)
            .with_context(|| format!("reading font {}", options.font_path.display()))?;
        Self::with_font_bytes(font_data, options)
    }

    /// Build the annotator from already-loaded font bytes.
    pub fn with_font_bytes(font_data: Vec<u8>, options: RenderOptions) -> Result<Self> {
        let font = FontVec::try_from_vec(font_data).context("parsing font data")?;
        Ok(Self {
            symbols: SymbolTable::new(),
            font,
            options,
        })
    }

    /// Produce the annotated counterpart of `frame`, same dimensions.
    ///
    /// Symbols and counters are drawn per block onto a white canvas, then the
    /// block grid is overlaid.
    pub fn annotate(&self, frame: &RgbImage) -> RgbImage {
        let block = self.options.block_size;
        let gray = to_gray(frame);
        let mut canvas = RgbImage::from_pixel(frame.width(), frame.height(), WHITE);

        let symbol_scale = PxScale::from(self.options.font_size);
        let counter_scale = PxScale::from(self.options.counter_size);
        let half = (block / 2) as i32;

        for label in plan_blocks(&gray, block, &self.symbols) {
            // The symbol centers on the nominal block, truncated or not.
            draw_text_mut(
                &mut canvas,
                BLACK,
                label.x as i32 + half - GLYPH_NUDGE,
                label.y as i32 + half - GLYPH_NUDGE,
                symbol_scale,
                &self.font,
                label.symbol.encode_utf8(&mut [0u8; 4]),
            );
            draw_text_mut(
                &mut canvas,
                BLACK,
                label.x as i32,
                label.y as i32,
                counter_scale,
                &self.font,
                &label.index.to_string(),
            );
        }

        draw_grid(&mut canvas, block);
        canvas
    }
}

/// Per-pixel luma weighting, identical for every frame of a run.
pub fn luminance(rgb: Rgb<u8>) -> u8 {
    let r = rgb[0] as f64;
    let g = rgb[1] as f64;
    let b = rgb[2] as f64;
    (0.2126 * r + 0.7152 * g + 0.0722 * b) as u8
}

/// Collapse an RGB frame to its brightness plane.
pub fn to_gray(frame: &RgbImage) -> GrayImage {
    let mut gray = GrayImage::new(frame.width(), frame.height());
    for (src, dst) in frame.pixels().zip(gray.pixels_mut()) {
        *dst = Luma([luminance(*src)]);
    }
    gray
}

/// Partition the brightness plane into `block`-sized tiles and resolve each to
/// a symbol. Row-major scan; edge tiles shrink to the frame bounds and average
/// only their in-bounds samples.
pub fn plan_blocks(gray: &GrayImage, block: u32, table: &SymbolTable) -> Vec<BlockLabel> {
    let (width, height) = gray.dimensions();
    let mut labels = Vec::new();
    let mut counter: u32 = 1;

    for y in (0..height).step_by(block as usize) {
        for x in (0..width).step_by(block as usize) {
            let brightness = mean_brightness(gray, x, y, block);
            labels.push(BlockLabel {
                index: counter,
                x,
                y,
                brightness,
                symbol: table.symbol_for(brightness),
            });
            counter += 1;
        }
    }
    labels
}

/// Arithmetic mean over the in-bounds samples of one block, rounded to the
/// nearest brightness level.
fn mean_brightness(gray: &GrayImage, x: u32, y: u32, block: u32) -> u8 {
    let x_end = (x + block).min(gray.width());
    let y_end = (y + block).min(gray.height());

    let mut sum: u64 = 0;
    for py in y..y_end {
        for px in x..x_end {
            sum += u64::from(gray.get_pixel(px, py)[0]);
        }
    }
    let count = u64::from(x_end - x) * u64::from(y_end - y);
    let mean = sum as f64 / count as f64;
    mean.round() as u8
}

/// Block boundaries along one axis, inclusive of the far edge.
pub fn grid_boundaries(extent: u32, block: u32) -> Vec<u32> {
    (0..=extent).step_by(block as usize).collect()
}

/// Overlay 1-pixel gray lines at every block boundary, full width and height.
/// The far-edge boundary is clamped to the last pixel so it stays visible.
pub fn draw_grid(canvas: &mut RgbImage, block: u32) {
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    for x in grid_boundaries(width, block) {
        let x = x.min(width - 1) as f32;
        draw_line_segment_mut(canvas, (x, 0.0), (x, (height - 1) as f32), GRID_GRAY);
    }
    for y in grid_boundaries(height, block) {
        let y = y.min(height - 1) as f32;
        draw_line_segment_mut(canvas, (0.0, y), ((width - 1) as f32, y), GRID_GRAY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_gray(width: u32, height: u32, level: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([level]))
    }

    #[test]
    fn block_count_is_ceil_by_ceil() {
        let table = SymbolTable::new();
        for &(w, h, expected) in &[
            (80u32, 80u32, 4usize),
            (50, 50, 4),
            (41, 79, 4),
            (40, 40, 1),
            (120, 40, 3),
            (1, 1, 1),
        ] {
            let labels = plan_blocks(&uniform_gray(w, h, 10), 40, &table);
            assert_eq!(labels.len(), expected, "{}x{}", w, h);
        }
    }

    #[test]
    fn counters_are_sequential_row_major() {
        let table = SymbolTable::new();
        let labels = plan_blocks(&uniform_gray(80, 80, 128), 40, &table);
        let indices: Vec<u32> = labels.iter().map(|l| l.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
        let positions: Vec<(u32, u32)> = labels.iter().map(|l| (l.x, l.y)).collect();
        assert_eq!(positions, vec![(0, 0), (40, 0), (0, 40), (40, 40)]);
    }

    #[test]
    fn uniform_midgray_frame_resolves_to_x() {
        let table = SymbolTable::new();
        let labels = plan_blocks(&uniform_gray(80, 80, 128), 40, &table);
        assert!(labels.iter().all(|l| l.brightness == 128));
        assert!(labels.iter().all(|l| l.symbol == 'X'));
    }

    #[test]
    fn edge_blocks_average_in_bounds_samples_only() {
        let table = SymbolTable::new();
        // Left 40 columns at 100, right 10 columns at 200.
        let mut gray = uniform_gray(50, 50, 100);
        for y in 0..50 {
            for x in 40..50 {
                gray.put_pixel(x, y, Luma([200]));
            }
        }
        let labels = plan_blocks(&gray, 40, &table);
        assert_eq!(labels.len(), 4);
        assert_eq!(labels[0].brightness, 100); // 40x40, all 100
        assert_eq!(labels[1].brightness, 200); // 10x40, all 200
        assert_eq!(labels[2].brightness, 100); // 40x10
        assert_eq!(labels[3].brightness, 200); // 10x10
    }

    #[test]
    fn truncated_mean_rounds_to_nearest_level() {
        let table = SymbolTable::new();
        // 2x1 block: samples 100 and 101 -> mean 100.5 -> rounds to 101.
        let mut gray = uniform_gray(2, 1, 100);
        gray.put_pixel(1, 0, Luma([101]));
        let labels = plan_blocks(&gray, 40, &table);
        assert_eq!(labels[0].brightness, 101);
    }

    #[test]
    fn grid_boundaries_count_is_floor_plus_one() {
        assert_eq!(grid_boundaries(80, 40), vec![0, 40, 80]);
        assert_eq!(grid_boundaries(100, 40), vec![0, 40, 80]);
        assert_eq!(grid_boundaries(40, 40), vec![0, 40]);
        for &(extent, block) in &[(80u32, 40u32), (100, 40), (39, 40), (120, 40)] {
            assert_eq!(
                grid_boundaries(extent, block).len() as u32,
                extent / block + 1
            );
        }
    }

    #[test]
    fn grid_lines_land_on_boundaries_and_clamp_to_the_far_edge() {
        let mut canvas = RgbImage::from_pixel(80, 80, WHITE);
        draw_grid(&mut canvas, 40);

        // Row 5 crosses all vertical lines: x = 0, 40, and 80 clamped to 79.
        let gray_cols: Vec<u32> = (0..80)
            .filter(|&x| *canvas.get_pixel(x, 5) == GRID_GRAY)
            .collect();
        assert_eq!(gray_cols, vec![0, 40, 79]);

        // Column 5 crosses all horizontal lines.
        let gray_rows: Vec<u32> = (0..80)
            .filter(|&y| *canvas.get_pixel(5, y) == GRID_GRAY)
            .collect();
        assert_eq!(gray_rows, vec![0, 40, 79]);

        // Interior stays untouched.
        assert_eq!(*canvas.get_pixel(20, 20), WHITE);
    }

    #[test]
    fn luminance_weights_follow_the_channel_coefficients() {
        assert_eq!(luminance(Rgb([0, 0, 0])), 0);
        assert_eq!(luminance(Rgb([255, 0, 0])), 54);
        assert_eq!(luminance(Rgb([0, 255, 0])), 182);
        assert_eq!(luminance(Rgb([0, 0, 255])), 18);
    }

    #[test]
    fn to_gray_preserves_dimensions() {
        let frame = RgbImage::from_pixel(50, 30, Rgb([10, 200, 60]));
        let gray = to_gray(&frame);
        assert_eq!(gray.dimensions(), (50, 30));
    }
}
