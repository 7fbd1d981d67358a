//! Line-oriented output buffer that builds the source map as it writes.

use crate::source_map::SourceMap;
use agentflow_core::Span;

const INDENT: &str = "    ";

/// Where the lines being written come from.
#[derive(Debug, Clone, PartialEq)]
pub struct Origin {
    pub file: String,
    pub span: Span,
}

impl Origin {
    pub fn new(file: &str, span: Span) -> Self {
        Origin {
            file: file.to_owned(),
            span,
        }
    }
}

#[derive(Debug, Default)]
pub struct CodeWriter {
    out: String,
    lines: u32,
    depth: usize,
    origin: Option<Origin>,
    map: SourceMap,
}

impl CodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one line at the current depth. `text` must not contain a
    /// newline. If an origin is set the line is recorded in the source map.
    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        debug_assert!(!text.contains('\n'), "multi-line write: {:?}", text);
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
        self.lines += 1;
        if let Some(origin) = &self.origin {
            self.map.record(
                self.lines,
                &origin.file,
                origin.span.start.line,
                origin.span.start.column,
            );
        }
    }

    /// Empty line; never mapped.
    pub fn blank(&mut self) {
        self.out.push('\n');
        self.lines += 1;
    }

    pub fn indent(&mut self) {
        self.depth += 1;
    }

    pub fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Replace the current origin, returning the previous one.
    pub fn set_origin(&mut self, origin: Option<Origin>) -> Option<Origin> {
        std::mem::replace(&mut self.origin, origin)
    }

    /// Lines written so far.
    pub fn line_count(&self) -> u32 {
        self.lines
    }

    pub fn finish(self) -> (String, SourceMap) {
        (self.out, self.map)
    }
}
