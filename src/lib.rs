//! # blockscii - Symbol-Mosaic Video Generator Library
//!
//! `blockscii` converts a video into a stylized symbol-mosaic rendition: each
//! frame is tiled into fixed-size blocks, every block's average brightness is
//! resolved to the nearest-match character from a fixed symbol table, and the
//! characters are drawn, together with per-block counters and a grid overlay,
//! onto a white canvas that is encoded back out as a new video.
//!
//! ## Features
//!
//! - Deterministic brightness-to-symbol quantization (25 fixed anchors,
//!   first-match tie-break)
//! - Block partitioning with truncated edge blocks
//! - Glyph, counter and grid composition on a per-frame canvas
//! - Streaming video decode/encode through ffmpeg subprocesses
//! - Progress reporting and user-initiated early stop for CLI integration
//!
//! ## Example
//!
//! ```no_run
//! use blockscii::{transcode_video, AppConfig};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! let summary = transcode_video(Path::new("input.mp4"), &config)?;
//! println!("{} frames written", summary.frames);
//! # Ok(())
//! # }
//! ```
//!
//! ## Progress Reporting
//!
//! The driver can report `(frames_done, total)` after every frame and consult
//! a stop callback once per frame for clean early termination:
//!
//! ```no_run
//! use blockscii::{transcode_video_with_progress, AppConfig};
//! use std::path::Path;
//!
//! let config = AppConfig::default();
//! transcode_video_with_progress(
//!     Path::new("input.mp4"),
//!     &config,
//!     Some(|done: u64, total: Option<u64>| match total {
//!         Some(total) => println!("{}/{}", done, total),
//!         None => println!("{} frames", done),
//!     }),
//!     Some(|| false),
//! ).unwrap();
//! ```

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub mod annotate;
pub mod symbols;
pub mod video;

pub use annotate::{BlockLabel, FrameAnnotator};
pub use symbols::{SymbolTable, SYMBOL_PAIRS};
pub use video::{FrameSink, FrameSource, VideoInfo};

fn default_block_size() -> u32 {
    40
}
fn default_font_path() -> PathBuf {
    PathBuf::from("ARIALBD.ttf")
}
fn default_font_size() -> f32 {
    20.0
}
fn default_counter_size() -> f32 {
    12.0
}
fn default_output_path() -> PathBuf {
    PathBuf::from("out.avi")
}
fn default_fps() -> u32 {
    30
}

/// Application configuration.
///
/// Every field is optional in the JSON file; the defaults reproduce the fixed
/// reference behavior (40-pixel blocks, size-20 bold glyphs, `out.avi` at
/// 30 fps).
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Edge length of a quantization block, in pixels.
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    /// Bold TrueType font used for the symbol glyphs. A missing file is fatal
    /// at startup.
    #[serde(default = "default_font_path")]
    pub font_path: PathBuf,
    /// Pixel size of the symbol glyphs.
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    /// Pixel size of the per-block counters.
    #[serde(default = "default_counter_size")]
    pub counter_size: f32,
    /// Output video location.
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    /// Output frame rate.
    #[serde(default = "default_fps")]
    pub fps: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            font_path: default_font_path(),
            font_size: default_font_size(),
            counter_size: default_counter_size(),
            output_path: default_output_path(),
            fps: default_fps(),
        }
    }
}

impl AppConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&text).context("parsing config json")?;
        config
            .validate()
            .with_context(|| format!("validating config {}", path.display()))?;
        Ok(config)
    }

    /// Reject degenerate values that would break partitioning or encoding.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(anyhow!("block_size must be at least 1"));
        }
        if self.fps == 0 {
            return Err(anyhow!("fps must be at least 1"));
        }
        if self.font_size <= 0.0 || self.counter_size <= 0.0 {
            return Err(anyhow!("font sizes must be positive"));
        }
        Ok(())
    }
}

/// Options consumed by the [`FrameAnnotator`].
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Edge length of a quantization block, in pixels.
    pub block_size: u32,
    /// Pixel size of the symbol glyphs.
    pub font_size: f32,
    /// Pixel size of the per-block counters.
    pub counter_size: f32,
    /// Font file loaded at annotator construction.
    pub font_path: PathBuf,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            font_size: default_font_size(),
            counter_size: default_counter_size(),
            font_path: default_font_path(),
        }
    }
}

impl RenderOptions {
    /// Options with a specific block size.
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Options with a specific symbol glyph size.
    pub fn with_font_size(mut self, font_size: f32) -> Self {
        self.font_size = font_size;
        self
    }

    /// Options with a specific font file.
    pub fn with_font_path(mut self, font_path: PathBuf) -> Self {
        self.font_path = font_path;
        self
    }

    /// The rendering subset of an [`AppConfig`].
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            block_size: config.block_size,
            font_size: config.font_size,
            counter_size: config.counter_size,
            font_path: config.font_path.clone(),
        }
    }
}

/// Outcome of a completed transcode run.
#[derive(Debug, Clone, Copy)]
pub struct TranscodeSummary {
    /// Frames written to the output file.
    pub frames: u64,
    /// True when the run ended on a user stop request rather than end of
    /// stream. Both are clean exits and both leave a finalized output file.
    pub stopped_early: bool,
}

/// Transcode `input` into the configured output video.
///
/// See [`transcode_video_with_progress`] for the full contract.
pub fn transcode_video(input: &Path, config: &AppConfig) -> Result<TranscodeSummary> {
    transcode_video_with_progress(input, config, None::<fn(u64, Option<u64>)>, None::<fn() -> bool>)
}

/// Transcode `input` into the configured output video, reporting progress and
/// consulting a stop callback once per frame.
///
/// The pipeline is synchronous and single-threaded: each frame is fully read,
/// annotated and written before the next read. The output file is only created
/// once the first frame has been decoded, so a source with zero readable
/// frames fails without leaving a file behind; a source that ends mid-stream
/// finalizes normally with the frames read so far.
///
/// # Errors
///
/// Fails when the font resource is missing, the source cannot be probed or
/// produces no first frame, or the encoder cannot be spawned or reports an
/// error at finalization.
pub fn transcode_video_with_progress<P, S>(input: &Path, config: &AppConfig, progress_callback: Option<P>, should_stop: Option<S>) -> Result<TranscodeSummary>
where
    P: Fn(u64, Option<u64>),
    S: Fn() -> bool,
{
    config.validate()?;

    let annotator = FrameAnnotator::new(RenderOptions::from_config(config))?;
    let info = video::probe_video(input)?;
    let mut source = FrameSource::open(input, &info)?;

    let Some(first) = source.read_frame() else {
        return Err(anyhow!("unable to read video {}", input.display()));
    };

    let mut sink = FrameSink::create(
        &config.output_path,
        first.width(),
        first.height(),
        config.fps,
    )?;

    let mut frames: u64 = 0;
    let mut stopped_early = false;
    let mut frame = first;

    loop {
        let annotated = annotator.annotate(&frame);
        sink.write_frame(&annotated)?;
        frames += 1;

        if let Some(ref callback) = progress_callback {
            callback(frames, info.total_frames);
        }

        if should_stop.as_ref().is_some_and(|stop| stop()) {
            stopped_early = true;
            break;
        }

        match source.read_frame() {
            Some(next) => frame = next,
            None => break,
        }
    }

    sink.finish()?;
    log::info!(
        "wrote {} frames to {}",
        frames,
        config.output_path.display()
    );

    Ok(TranscodeSummary {
        frames,
        stopped_early,
    })
}
