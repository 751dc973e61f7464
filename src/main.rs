use anyhow::Result;
use blockscii::{transcode_video_with_progress, AppConfig};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn load_config() -> Result<AppConfig> {
    // Look for blockscii.json in app support, current dir fallback, then built-in default
    let mut tried: Vec<PathBuf> = Vec::new();
    if let Some(mut d) = dirs::data_dir() {
        d.push("blockscii");
        d.push("blockscii.json");
        tried.push(d);
    }
    tried.push(PathBuf::from("blockscii.json"));

    for p in &tried {
        if p.exists() {
            return AppConfig::from_file(p);
        }
    }

    // Built-in defaults
    Ok(AppConfig::default())
}

#[derive(Parser, Debug)]
#[command(version, about = "Video to symbol-mosaic transcoder.")]
struct Args {
    /// Path to the input video
    #[arg(long)]
    path: PathBuf,
}

/// Raw-mode guard polling the terminal for a stop request.
///
/// Inactive when stdin is not a terminal; raw mode is restored on drop, on
/// every exit path.
struct StopKeys {
    active: bool,
}

impl StopKeys {
    fn engage() -> Self {
        let active = std::io::stdin().is_terminal() && terminal::enable_raw_mode().is_ok();
        Self { active }
    }

    /// Drain pending key events; `q` (or Ctrl-C, which raw mode swallows)
    /// requests a stop.
    fn pressed(&self) -> bool {
        if !self.active {
            return false;
        }
        let mut stop = false;
        while event::poll(Duration::ZERO).unwrap_or(false) {
            if let Ok(Event::Key(key)) = event::read() {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') => stop = true,
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        stop = true;
                    }
                    _ => {}
                }
            }
        }
        stop
    }
}

impl Drop for StopKeys {
    fn drop(&mut self) {
        if self.active {
            let _ = terminal::disable_raw_mode();
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let cfg = load_config()?;

    // Progress bar is initialized on the first callback, once the frame total
    // is known; a spinner stands in when the source does not report one.
    let progress_bar: Arc<Mutex<Option<ProgressBar>>> = Arc::new(Mutex::new(None));
    let pb_clone = Arc::clone(&progress_bar);

    let stop_keys = StopKeys::engage();
    if stop_keys.active {
        println!("Press 'q' to stop early.\r");
    }

    let summary = transcode_video_with_progress(
        &args.path,
        &cfg,
        Some(move |done: u64, total: Option<u64>| {
            let mut pb_guard = pb_clone.lock().unwrap();
            if pb_guard.is_none() {
                let pb = match total {
                    Some(total) => {
                        let pb = ProgressBar::new(total);
                        pb.set_style(
                            ProgressStyle::default_bar()
                                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)")
                                .unwrap()
                                .progress_chars("#>-"),
                        );
                        pb
                    }
                    None => ProgressBar::new_spinner(),
                };
                pb.set_message("Processing frames");
                *pb_guard = Some(pb);
            }
            if let Some(ref pb) = *pb_guard {
                pb.set_position(done);
            }
        }),
        Some(move || stop_keys.pressed()),
    )?;

    // Finish the progress bar
    let pb_opt = progress_bar.lock().unwrap().take();
    if let Some(pb) = pb_opt {
        pb.finish_with_message("Done");
    }

    if summary.stopped_early {
        println!("\nStopped by user after {} frames.", summary.frames);
    }
    println!(
        "\nMosaic transcode complete: {} frames in {}",
        summary.frames,
        cfg.output_path.display()
    );

    Ok(())
}
