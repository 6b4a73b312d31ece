//! Log output sink for the `log` action (spec.md §4.5), mirroring the
//! teacher's `io::PrintWriter` abstraction: the executor never touches
//! stdout directly, it writes through a small trait so embedders and tests
//! can capture output instead of inheriting the process's stdio.

use std::fmt;

use crate::document::LogLevel;

pub trait LogSink {
    fn log(&mut self, level: LogLevel, message: &str);
}

/// Writes every line to stdout, prefixed with its level.
#[derive(Debug, Default)]
pub struct StdLog;

impl LogSink for StdLog {
    fn log(&mut self, level: LogLevel, message: &str) {
        println!("[{level}] {message}");
    }
}

/// Collects lines in memory instead of printing them; the sink tests and
/// embedding hosts reach for when they need to assert on emitted output.
#[derive(Debug, Default)]
pub struct CollectLog {
    pub lines: Vec<(LogLevel, String)>,
}

impl LogSink for CollectLog {
    fn log(&mut self, level: LogLevel, message: &str) {
        self.lines.push((level, message.to_owned()));
    }
}

impl fmt::Display for CollectLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (level, message) in &self.lines {
            writeln!(f, "[{level}] {message}")?;
        }
        Ok(())
    }
}
