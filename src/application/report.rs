//! Operator-facing output of a successful controller operation.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Plain(String),
    Success(String),
    Warning(String),
}

/// Ordered lines printed by the operator binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    lines: Vec<Line>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new().with_success(message)
    }

    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(Line::Plain(line.into()));
        self
    }

    pub fn with_success(mut self, message: impl Into<String>) -> Self {
        self.lines.push(Line::Success(message.into()));
        self
    }

    pub fn with_warning(mut self, message: impl Into<String>) -> Self {
        self.lines.push(Line::Warning(message.into()));
        self
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn has_warnings(&self) -> bool {
        self.lines.iter().any(|line| matches!(line, Line::Warning(_)))
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Plain(text) => f.write_str(text),
            Line::Success(text) => write!(f, "Success: {text}"),
            Line::Warning(text) => write!(f, "Warning: {text}"),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_render_with_their_prefix() {
        let report = Report::new()
            .with_line("Not currently preloading.")
            .with_success("Cache cleared.")
            .with_warning("Pending preload cancel.");

        assert_eq!(
            report.to_string(),
            "Not currently preloading.\nSuccess: Cache cleared.\nWarning: Pending preload cancel.\n"
        );
        assert!(report.has_warnings());
        assert!(!Report::success("ok").has_warnings());
    }
}
