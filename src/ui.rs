use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use opencam::DownloadProgress;

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Renders model download progress, one bar (or line series) per file.
    pub fn downloads(&self) -> DownloadView {
        DownloadView {
            pretty: self.use_pretty(),
            current: None,
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

struct FileBar {
    file: String,
    bar: Option<ProgressBar>,
    last_decile: u64,
}

pub struct DownloadView {
    pretty: bool,
    current: Option<FileBar>,
}

impl DownloadView {
    pub fn update(&mut self, progress: DownloadProgress) {
        if self.current.as_ref().map(|c| c.file.as_str()) != Some(progress.file.as_str()) {
            self.finish();
            self.current = Some(self.begin(&progress));
        }
        let Some(current) = self.current.as_mut() else {
            return;
        };
        match (&current.bar, progress.total_bytes) {
            (Some(bar), _) => bar.set_position(progress.bytes_so_far),
            (None, Some(total)) if total > 0 => {
                let decile = progress.bytes_so_far * 10 / total;
                if decile > current.last_decile {
                    current.last_decile = decile;
                    eprintln!("    {} {}%", current.file, decile * 10);
                }
            }
            (None, _) => {}
        }
    }

    fn begin(&self, progress: &DownloadProgress) -> FileBar {
        if !self.pretty {
            eprintln!("==> Download {}", progress.file);
            return FileBar {
                file: progress.file.clone(),
                bar: None,
                last_decile: 0,
            };
        }
        let bar = match progress.total_bytes {
            Some(total) => {
                let bar = ProgressBar::new(total);
                let style = ProgressStyle::with_template(
                    "{msg} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar());
                bar.set_style(style.progress_chars("=> "));
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                let style = ProgressStyle::with_template("{spinner} {msg} {bytes}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner());
                bar.set_style(style);
                bar
            }
        };
        bar.set_draw_target(ProgressDrawTarget::stderr());
        bar.set_message(progress.file.clone());
        FileBar {
            file: progress.file.clone(),
            bar: Some(bar),
            last_decile: 0,
        }
    }

    pub fn finish(&mut self) {
        let Some(current) = self.current.take() else {
            return;
        };
        match current.bar {
            Some(bar) => bar.finish_with_message(format!("✔ {}", current.file)),
            None => eprintln!("✔ {}", current.file),
        }
    }
}

impl Drop for DownloadView {
    fn drop(&mut self) {
        self.finish();
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
