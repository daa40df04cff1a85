//! Output formatting and writing utilities
//!
//! Results go to stdout in the selected format; status messages are only
//! shown in human mode so machine output stays parseable.

use crate::cli::OutputFormat;
use crate::error::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use nestlink_core::{redact_token, GraphQlResponse, Session};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::{self, IsTerminal, Write};
use std::time::Duration;
use tracing::trace;

/// Output writer that handles different output formats and colors
pub struct OutputWriter {
    format: OutputFormat,
    use_color: bool,
    show_progress: bool,
    quiet: bool,
    writer: Box<dyn Write>,
}

impl OutputWriter {
    /// Create a new output writer on stdout
    pub fn new(format: OutputFormat, use_color: bool, quiet: bool) -> Self {
        Self {
            format,
            use_color,
            show_progress: !quiet && io::stderr().is_terminal(),
            quiet,
            writer: Box::new(io::stdout()),
        }
    }

    /// Create an output writer with a custom writer
    pub fn with_writer(format: OutputFormat, use_color: bool, quiet: bool, writer: Box<dyn Write>) -> Self {
        Self {
            format,
            use_color,
            show_progress: false,
            quiet,
            writer,
        }
    }

    /// Write a line of output
    pub fn writeln(&mut self, content: &str) -> Result<()> {
        writeln!(self.writer, "{}", content)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Write an info message
    pub fn info(&mut self, message: &str) -> Result<()> {
        if self.quiet || self.format != OutputFormat::Human {
            return Ok(());
        }
        if self.use_color {
            self.writeln(&format!("{} {}", "ℹ".blue(), message))
        } else {
            self.writeln(&format!("INFO: {}", message))
        }
    }

    /// Write a success message
    pub fn success(&mut self, message: &str) -> Result<()> {
        if self.quiet || self.format != OutputFormat::Human {
            return Ok(());
        }
        if self.use_color {
            self.writeln(&message.green().to_string())
        } else {
            self.writeln(message)
        }
    }

    /// Write a warning message
    pub fn warning(&mut self, message: &str) -> Result<()> {
        if self.format != OutputFormat::Human {
            return Ok(());
        }
        if self.use_color {
            self.writeln(&message.yellow().to_string())
        } else {
            self.writeln(&format!("WARNING: {}", message))
        }
    }

    /// Write data in the configured format
    pub fn data<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let formatted = match self.format {
            OutputFormat::Json => serde_json::to_string(value)?,
            OutputFormat::JsonPretty | OutputFormat::Human => serde_json::to_string_pretty(value)?,
        };
        self.writeln(&formatted)
    }

    /// Write a GraphQL response envelope.
    ///
    /// Human mode prints the data and lists partial errors as warnings;
    /// machine modes print the envelope as is.
    pub fn response(&mut self, response: &GraphQlResponse) -> Result<()> {
        trace!(errors = response.errors.len(), "Writing response");
        if self.format != OutputFormat::Human {
            return self.data(response);
        }

        self.data(response.data.as_ref().unwrap_or(&Value::Null))?;
        for error in &response.errors {
            let code = error.code().unwrap_or("UNKNOWN");
            self.warning(&format!("{}: {}", code, error.message))?;
        }
        Ok(())
    }

    /// Write a session with its tokens redacted
    pub fn session(&mut self, session: Option<&Session>) -> Result<()> {
        let Some(session) = session else {
            return match self.format {
                OutputFormat::Human => self.writeln("No session stored"),
                _ => self.data(&Value::Null),
            };
        };

        let expires = chrono::DateTime::from_timestamp(session.expires_at_epoch_seconds, 0)
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());
        let view = json!({
            "accessToken": redact_token(&session.access_token),
            "refreshToken": redact_token(&session.refresh_token),
            "expiresAt": expires,
        });

        if self.format != OutputFormat::Human {
            return self.data(&view);
        }
        self.writeln(&format!("Access token:  {}", view["accessToken"].as_str().unwrap_or_default()))?;
        self.writeln(&format!("Refresh token: {}", view["refreshToken"].as_str().unwrap_or_default()))?;
        self.writeln(&format!("Expires at:    {}", expires))
    }

    /// Create a spinner for indeterminate progress
    pub fn spinner(&self, message: &str) -> Option<ProgressBar> {
        if !self.show_progress || self.format != OutputFormat::Human {
            return None;
        }

        let pb = ProgressBar::new_spinner();
        pb.set_style(default_spinner_style());
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    }
}

fn default_spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"])
}
