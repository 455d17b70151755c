use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::report::RunReport;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Prints progress lines and the final message to stdout.
pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "{}", report.message)
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => println!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => println!("{}", event.message),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
