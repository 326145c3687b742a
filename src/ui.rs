//! Terminal progress for the daemon's startup stages.
//!
//! On a TTY each stage gets an indicatif spinner; otherwise stages print as
//! plain `==>` lines so service logs stay readable.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::str::FromStr;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl FromStr for UiMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(UiMode::Auto),
            "plain" => Ok(UiMode::Plain),
            "pretty" => Ok(UiMode::Pretty),
            other => Err(format!("unknown ui mode '{}', expected auto, plain or pretty", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    /// Build for `mode`, probing stderr for a terminal.
    pub fn detect(mode: UiMode) -> Self {
        Self::new(mode, std::io::stderr().is_terminal())
    }

    pub fn is_pretty(&self) -> bool {
        match self.mode {
            UiMode::Pretty => true,
            UiMode::Auto => self.is_tty,
            UiMode::Plain => false,
        }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.is_pretty() {
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

    /// Print aligned `key: value` lines once startup is done.
    pub fn summary(&self, rows: &[(&str, String)]) {
        for line in summary_lines(rows) {
            eprintln!("{line}");
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failure: Option<String>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            failure: None,
        }
    }

    /// Mark the stage failed; the reason is shown when the guard drops.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
    }

    /// Degraded but continuing, e.g. camera fell back to synthetic frames.
    pub fn note(&self, message: &str) {
        match &self.spinner {
            Some(spinner) => spinner.println(format!("  {message}")),
            None => eprintln!("    {message}"),
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = format_duration(self.start.elapsed());
        let message = match &self.failure {
            Some(reason) => format!("✘ {} ({}): {}", self.name, elapsed, reason),
            None => format!("✔ {} ({})", self.name, elapsed),
        };
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn summary_lines(rows: &[(&str, String)]) -> Vec<String> {
    let width = rows.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    rows.iter()
        .map(|(key, value)| format!("  {:<width$}  {}", format!("{key}:"), value, width = width + 1))
        .collect()
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_known_names() {
        assert_eq!("plain".parse::<UiMode>().unwrap(), UiMode::Plain);
        assert_eq!("PRETTY".parse::<UiMode>().unwrap(), UiMode::Pretty);
        assert_eq!("".parse::<UiMode>().unwrap(), UiMode::Auto);
        assert!("fancy".parse::<UiMode>().is_err());
    }

    #[derive(clap::Parser, Debug)]
    struct Flags {
        #[arg(long, default_value = "auto")]
        ui: UiMode,
    }

    #[test]
    fn flag_rejects_unknown_modes() {
        use clap::Parser;

        assert_eq!(Flags::try_parse_from(["bin"]).unwrap().ui, UiMode::Auto);
        assert_eq!(
            Flags::try_parse_from(["bin", "--ui", "plain"]).unwrap().ui,
            UiMode::Plain
        );
        let err = Flags::try_parse_from(["bin", "--ui", "fancy"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn auto_follows_terminal() {
        assert!(Ui::new(UiMode::Auto, true).is_pretty());
        assert!(!Ui::new(UiMode::Auto, false).is_pretty());
        assert!(!Ui::new(UiMode::Plain, true).is_pretty());
        assert!(Ui::new(UiMode::Pretty, false).is_pretty());
    }

    #[test]
    fn summary_aligns_keys() {
        let lines = summary_lines(&[("api", "127.0.0.1:5000".into()), ("backend", "stub".into())]);
        assert_eq!(lines[0], "  api:      127.0.0.1:5000");
        assert_eq!(lines[1], "  backend:  stub");
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
