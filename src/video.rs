//! Video decode/encode via `ffmpeg`/`ffprobe` subprocesses.
//!
//! Frames cross process boundaries as raw RGB24 over pipes: the source reads
//! `width * height * 3` bytes per frame from ffmpeg's stdout, the sink writes
//! the same layout to ffmpeg's stdin. Both ends are exclusively owned by the
//! driver loop and closed when it ends.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

/// Stream metadata reported by ffprobe.
#[derive(Debug, Clone, Copy)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Source frame rate (e.g. 23.976, 30.0, 60.0).
    pub fps: f64,
    /// Total frame count when the container reports one (or it can be
    /// estimated from the duration); `None` means indeterminate progress.
    pub total_frames: Option<u64>,
}

/// Query `ffprobe` for the primary video stream's metadata.
///
/// # Errors
///
/// Fails when ffprobe is not installed, or when the file has no decodable
/// video stream — fatal startup conditions.
pub fn probe_video(path: &Path) -> Result<VideoInfo> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow!("non-UTF8 video path: {}", path.display()))?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate,nb_frames,duration",
            "-of",
            "default=noprint_wrappers=1",
            "-i",
            path_str,
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .context("running ffprobe (is it installed and in PATH?)")?;

    let text = String::from_utf8_lossy(&output.stdout);
    let info = parse_probe_output(&text)
        .ok_or_else(|| anyhow!("no decodable video stream in {}", path.display()))?;

    log::info!(
        "probed {}: {}x{} @ {:.3}fps, {} frames",
        path.display(),
        info.width,
        info.height,
        info.fps,
        info.total_frames
            .map_or_else(|| "?".to_string(), |n| n.to_string()),
    );
    Ok(info)
}

/// Parse ffprobe's `key=value` output into a [`VideoInfo`].
///
/// Returns `None` when width or height is missing or zero. `nb_frames` is
/// often `N/A` (stream copies, some containers); the duration-based estimate
/// fills in when possible.
fn parse_probe_output(text: &str) -> Option<VideoInfo> {
    let mut width: Option<u32> = None;
    let mut height: Option<u32> = None;
    let mut fps: f64 = 30.0;
    let mut nb_frames: Option<u64> = None;
    let mut duration: Option<f64> = None;

    for line in text.lines() {
        if let Some(val) = line.strip_prefix("width=") {
            width = val.trim().parse().ok();
        } else if let Some(val) = line.strip_prefix("height=") {
            height = val.trim().parse().ok();
        } else if let Some(val) = line.strip_prefix("r_frame_rate=") {
            if let Some(rate) = parse_frame_rate(val.trim()) {
                fps = rate;
            }
        } else if let Some(val) = line.strip_prefix("nb_frames=") {
            nb_frames = val.trim().parse().ok();
        } else if let Some(val) = line.strip_prefix("duration=") {
            duration = val.trim().parse().ok();
        }
    }

    let width = width.filter(|&w| w > 0)?;
    let height = height.filter(|&h| h > 0)?;
    let total_frames = nb_frames.or_else(|| {
        duration
            .filter(|d| *d > 0.0)
            .map(|d| (d * fps).round() as u64)
    });

    Some(VideoInfo {
        width,
        height,
        fps,
        total_frames,
    })
}

/// Parse ffprobe's fractional rate notation ("30/1", "30000/1001").
fn parse_frame_rate(val: &str) -> Option<f64> {
    let mut parts = val.splitn(2, '/');
    let num: f64 = parts.next()?.parse().ok()?;
    let den: f64 = parts.next().unwrap_or("1").parse().ok()?;
    if den > 0.0 && num > 0.0 {
        Some(num / den)
    } else {
        None
    }
}

/// Sequential frame reader: an ffmpeg child streaming raw RGB24 on stdout.
pub struct FrameSource {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
}

impl FrameSource {
    /// Spawn the decoder for `path` at the stream's native size and rate.
    ///
    /// # Errors
    ///
    /// Fails when ffmpeg cannot be spawned.
    pub fn open(path: &Path, info: &VideoInfo) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("non-UTF8 video path: {}", path.display()))?;

        let mut child = Command::new("ffmpeg")
            .args([
                "-i",
                path_str,
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-an",
                "-hide_banner",
                "-loglevel",
                "error",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("spawning ffmpeg decoder (is it installed and in PATH?)")?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("ffmpeg decoder has no stdout pipe"))?;

        Ok(Self {
            child,
            stdout,
            width: info.width,
            height: info.height,
        })
    }

    /// Read the next frame, or `None` at end of stream.
    ///
    /// A partial trailing frame or a mid-stream pipe error is treated as end
    /// of stream, not an error; the condition is logged and the loop ends
    /// normally.
    pub fn read_frame(&mut self) -> Option<RgbImage> {
        let frame_len = self.width as usize * self.height as usize * 3;
        let mut buf = vec![0u8; frame_len];
        match read_exact_or_eof(&mut self.stdout, &mut buf) {
            Ok(true) => RgbImage::from_raw(self.width, self.height, buf),
            Ok(false) => None,
            Err(e) => {
                log::warn!("decoder pipe read failed, treating as end of stream: {e}");
                None
            }
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Read exactly `buf.len()` bytes. `Ok(true)` on success, `Ok(false)` on EOF
/// before completion, `Err` on a fatal I/O error.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut total = 0usize;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => return Ok(false),
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Sequential frame writer: an ffmpeg child encoding raw RGB24 from stdin
/// into an MPEG-4 (XVID fourcc) AVI at a fixed frame rate.
pub struct FrameSink {
    child: Child,
}

impl FrameSink {
    /// Spawn the encoder writing to `path` at `width`x`height`, `fps`.
    ///
    /// # Errors
    ///
    /// Fails when ffmpeg cannot be spawned.
    pub fn create(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("non-UTF8 output path: {}", path.display()))?;

        let child = Command::new("ffmpeg")
            .args([
                "-y",
                "-f",
                "rawvideo",
                "-vcodec",
                "rawvideo",
                "-s",
                &format!("{width}x{height}"),
                "-pix_fmt",
                "rgb24",
                "-r",
                &fps.to_string(),
                "-i",
                "-",
                "-c:v",
                "mpeg4",
                "-vtag",
                "XVID",
                "-qscale:v",
                "3",
                "-pix_fmt",
                "yuv420p",
                "-hide_banner",
                "-loglevel",
                "error",
                path_str,
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("spawning ffmpeg encoder (is it installed and in PATH?)")?;

        log::debug!("encoder spawned: {width}x{height} @ {fps}fps -> {path_str}");
        Ok(Self { child })
    }

    /// Append one frame to the stream.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the pipe write fails.
    pub fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if let Some(stdin) = self.child.stdin.as_mut() {
            stdin
                .write_all(frame.as_raw())
                .context("writing frame to encoder pipe")?;
        }
        Ok(())
    }

    /// Close the stream and finalize the output file.
    ///
    /// # Errors
    ///
    /// Surfaces ffmpeg's stderr when the encoder exits with failure.
    pub fn finish(mut self) -> Result<()> {
        drop(self.child.stdin.take());

        let output = self.child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("ffmpeg encoder error: {stderr}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parse_probe_output_reads_all_fields() {
        let text = "width=640\nheight=360\nr_frame_rate=30000/1001\nnb_frames=120\nduration=4.004000\n";
        let info = parse_probe_output(text).unwrap();
        assert_eq!(info.width, 640);
        assert_eq!(info.height, 360);
        assert!((info.fps - 29.97).abs() < 0.01);
        assert_eq!(info.total_frames, Some(120));
    }

    #[test]
    fn parse_probe_output_estimates_frames_from_duration() {
        let text = "width=80\nheight=80\nr_frame_rate=30/1\nnb_frames=N/A\nduration=2.000000\n";
        let info = parse_probe_output(text).unwrap();
        assert_eq!(info.total_frames, Some(60));
    }

    #[test]
    fn parse_probe_output_without_dimensions_is_none() {
        assert!(parse_probe_output("").is_none());
        assert!(parse_probe_output("width=0\nheight=480\n").is_none());
        assert!(parse_probe_output("r_frame_rate=30/1\nduration=1.0\n").is_none());
    }

    #[test]
    fn parse_probe_output_tolerates_unknown_frame_count() {
        let text = "width=80\nheight=80\nr_frame_rate=30/1\nnb_frames=N/A\nduration=N/A\n";
        let info = parse_probe_output(text).unwrap();
        assert_eq!(info.total_frames, None);
    }

    #[test]
    fn parse_frame_rate_handles_fractions() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("24"), Some(24.0));
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("garbage"), None);
    }

    #[test]
    fn read_exact_or_eof_reports_short_reads() {
        let mut cursor = Cursor::new(vec![1u8, 2, 3, 4, 5]);
        let mut buf = [0u8; 3];
        assert!(read_exact_or_eof(&mut cursor, &mut buf).unwrap());
        assert_eq!(buf, [1, 2, 3]);
        // Only two bytes remain; a full frame is no longer available.
        assert!(!read_exact_or_eof(&mut cursor, &mut buf).unwrap());
    }
}
