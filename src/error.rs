// Foxely Error Handling
// Source positions, error kinds and colored reports with backtraces

use colored::*;
use std::fmt;

/// A position in the source code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self {
            line: 1,
            column: 1,
            offset: 0,
        }
    }
}

/// A span in the source code (start to end position)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn single(line: usize, column: usize, offset: usize) -> Self {
        let pos = Position::new(line, column, offset);
        Self {
            start: pos,
            end: pos,
        }
    }

    /// Span covering both `self` and `other`
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start,
            end: other.end,
        }
    }
}

/// Error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SyntaxError,
    CompileError,
    TypeError,
    NameError,
    IndexError,
    ArgumentError,
    ImportError,
    RuntimeError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::CompileError => "CompileError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::NameError => "NameError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::ArgumentError => "ArgumentError",
            ErrorKind::ImportError => "ImportError",
            ErrorKind::RuntimeError => "RuntimeError",
        };
        f.write_str(name)
    }
}

/// One line of a runtime backtrace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// `None` for top-level script code
    pub function_name: Option<String>,
    pub line: usize,
}

impl StackFrame {
    pub fn new(function_name: Option<String>, line: usize) -> Self {
        Self {
            function_name,
            line,
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function_name {
            Some(name) => write!(f, "[line {}] in {}()", self.line, name),
            None => write!(f, "[line {}] in script", self.line),
        }
    }
}

/// Main error type for Foxely
#[derive(Debug, Clone)]
pub struct FoxError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    pub file: String,
    pub help: Option<String>,
    pub backtrace: Vec<StackFrame>,
    source_lines: Vec<String>,
}

impl FoxError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, span: Span, file: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
            file: file.into(),
            help: None,
            backtrace: Vec::new(),
            source_lines: Vec::new(),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source_lines = source.lines().map(String::from).collect();
        self
    }

    pub fn with_backtrace(mut self, trace: Vec<StackFrame>) -> Self {
        self.backtrace = trace;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Plain runtime report: the message, then one line per frame
    pub fn runtime_report(&self) -> String {
        let mut output = format!("{}\n", self.message);
        for frame in &self.backtrace {
            output.push_str(&format!("{}\n", frame));
        }
        output
    }

    /// Colored report with source context, used for compile errors
    pub fn format(&self) -> String {
        let mut output = String::new();

        let header = format!(
            "{}: {} at {}:{}:{}",
            self.kind.to_string().red().bold(),
            self.message.white().bold(),
            self.file,
            self.span.start.line,
            self.span.start.column
        );
        output.push_str(&header);
        output.push('\n');

        if !self.source_lines.is_empty() {
            let error_line = self.span.start.line;
            let start_line = if error_line > 1 { error_line - 1 } else { 1 };
            let end_line = (error_line + 1).min(self.source_lines.len());

            output.push('\n');
            for line_num in start_line..=end_line {
                let Some(line_content) = self.source_lines.get(line_num - 1) else {
                    continue;
                };
                let gutter = format!("{:>4} |", line_num);
                if line_num == error_line {
                    output.push_str(&format!("{} {}\n", gutter.red(), line_content));
                    let spaces = " ".repeat(6 + self.span.start.column);
                    let caret_len = if self.span.end.line == self.span.start.line
                        && self.span.end.column > self.span.start.column
                    {
                        self.span.end.column - self.span.start.column
                    } else {
                        1
                    };
                    output.push_str(&format!("{}{}\n", spaces, "^".repeat(caret_len).red().bold()));
                } else {
                    output.push_str(&format!("{} {}\n", gutter.dimmed(), line_content));
                }
            }
        }

        if let Some(ref help) = self.help {
            output.push_str(&format!("\n      {}: {}\n", "Help".cyan().bold(), help));
        }

        if !self.backtrace.is_empty() {
            output.push_str(&format!("\n{}:\n", "Backtrace".yellow().bold()));
            for frame in &self.backtrace {
                output.push_str(&format!("  {}\n", frame));
            }
        }

        output
    }
}

impl fmt::Display for FoxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FoxError {}

/// Result type for Foxely operations
pub type FoxResult<T> = Result<T, FoxError>;

// Convenience constructors
impl FoxError {
    pub fn syntax_error(message: impl Into<String>, span: Span, file: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, message, span, file)
    }

    pub fn compile_error(message: impl Into<String>, span: Span, file: impl Into<String>) -> Self {
        Self::new(ErrorKind::CompileError, message, span, file)
    }

    /// Runtime errors get their span and file filled in when they are reported
    pub fn runtime(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, Span::default(), "")
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::runtime(ErrorKind::TypeError, message)
    }

    pub fn name_error(message: impl Into<String>) -> Self {
        Self::runtime(ErrorKind::NameError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::runtime(ErrorKind::IndexError, message)
    }

    pub fn argument_error(message: impl Into<String>) -> Self {
        Self::runtime(ErrorKind::ArgumentError, message)
    }

    pub fn import_error(message: impl Into<String>) -> Self {
        Self::runtime(ErrorKind::ImportError, message)
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::runtime(ErrorKind::RuntimeError, message)
    }
}
