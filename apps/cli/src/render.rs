//! Terminal rendering of job events.

use std::collections::HashMap;
use std::time::Duration;

use smartcompress_orchestrator::JobEvent;
use smartcompress_transfer::SpeedCalculator;
use tokio::sync::mpsc;

/// Turns [`JobEvent`]s into progress lines.
///
/// Progress is printed once per whole percent per file so large files do not
/// flood the terminal.
#[derive(Default)]
pub struct Renderer {
    speed: SpeedCalculator,
    last_bytes: HashMap<String, u64>,
    last_percent: HashMap<String, u64>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Line to print for `event`, if any.
    pub fn line(&mut self, event: &JobEvent) -> Option<String> {
        match event {
            JobEvent::Progress {
                file,
                bytes_done,
                bytes_total,
            } => {
                let prev = self.last_bytes.insert(file.clone(), *bytes_done).unwrap_or(0);
                self.speed.add_sample(bytes_done.saturating_sub(prev));

                let percent = percent(*bytes_done, *bytes_total);
                if self.last_percent.get(file) == Some(&percent) {
                    return None;
                }
                self.last_percent.insert(file.clone(), percent);

                let mut line = format!(
                    "{file}: {} / {} ({percent}%)",
                    format_bytes(*bytes_done),
                    format_bytes(*bytes_total)
                );
                let rate = self.speed.bytes_per_second();
                if rate > 0.0 {
                    line.push_str(&format!(" {}/s", format_bytes(rate as u64)));
                }
                if bytes_done < bytes_total
                    && let Some(eta) = self.speed.eta(bytes_total - bytes_done)
                {
                    line.push_str(&format!(" ETA {}", format_duration(eta)));
                }
                Some(line)
            }
            JobEvent::Status { text } => Some(text.clone()),
            JobEvent::Completed { outputs } => {
                let mut line = String::from("Done:");
                for path in outputs {
                    line.push_str(&format!("\n  {}", path.display()));
                }
                Some(line)
            }
            JobEvent::Failed { error, cancelled } => Some(if *cancelled {
                "Cancelled".to_string()
            } else {
                format!("Failed: {error}")
            }),
        }
    }
}

/// Prints events to stderr until a terminal event arrives or the channel
/// closes.
pub async fn render_events(mut rx: mpsc::UnboundedReceiver<JobEvent>) {
    let mut renderer = Renderer::new();
    while let Some(event) = rx.recv().await {
        if let Some(line) = renderer.line(&event) {
            eprintln!("{line}");
        }
        if event.is_terminal() {
            break;
        }
    }
}

fn percent(done: u64, total: u64) -> u64 {
    if total == 0 {
        100
    } else {
        (done.min(total) as u128 * 100 / total as u128) as u64
    }
}

/// Human-readable byte count using binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn progress(file: &str, done: u64, total: u64) -> JobEvent {
        JobEvent::Progress {
            file: file.into(),
            bytes_done: done,
            bytes_total: total,
        }
    }

    #[test]
    fn bytes_formatting() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(50 * 1024 * 1024), "50.0 MiB");
        assert_eq!(format_bytes(4 * 1024 * 1024 * 1024), "4.0 GiB");
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05s");
        assert_eq!(format_duration(Duration::from_secs(7260)), "2h01m");
    }

    #[test]
    fn progress_lines_once_per_percent() {
        let mut r = Renderer::new();
        let first = r.line(&progress("a.bin", 0, 1000)).unwrap();
        assert!(first.starts_with("a.bin: 0 B / 1000 B (0%)"));
        assert!(r.line(&progress("a.bin", 5, 1000)).is_none());
        assert!(r.line(&progress("a.bin", 10, 1000)).unwrap().contains("(1%)"));
        // Other files are tracked separately.
        assert!(r.line(&progress("b.bin", 5, 1000)).is_some());
    }

    #[test]
    fn empty_file_is_complete() {
        let mut r = Renderer::new();
        assert!(r.line(&progress("empty", 0, 0)).unwrap().contains("(100%)"));
    }

    #[test]
    fn terminal_lines() {
        let mut r = Renderer::new();
        let done = r
            .line(&JobEvent::Completed {
                outputs: vec![PathBuf::from("/out/a.zip")],
            })
            .unwrap();
        assert_eq!(done, "Done:\n  /out/a.zip");

        let cancelled = JobEvent::Failed {
            error: "cancelled".into(),
            cancelled: true,
        };
        assert_eq!(r.line(&cancelled).unwrap(), "Cancelled");

        let failed = JobEvent::Failed {
            error: "unsupported algorithm: x".into(),
            cancelled: false,
        };
        assert_eq!(r.line(&failed).unwrap(), "Failed: unsupported algorithm: x");
    }

    #[tokio::test]
    async fn render_stops_at_terminal_event() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(JobEvent::Status { text: "go".into() }).unwrap();
        tx.send(JobEvent::Completed { outputs: Vec::new() }).unwrap();
        // The sender stays open; only the terminal event ends rendering.
        tokio::time::timeout(Duration::from_secs(1), render_events(rx))
            .await
            .unwrap();
        drop(tx);
    }
}
