//! Diagnostic rendering: a human form with source excerpts and carets, and
//! a JSON form with a stable field set.

use crate::error::{Diagnostic, Label};
use crate::span::Span;
use std::collections::BTreeMap;

/// Source text by file id, used to print excerpts.
#[derive(Debug, Default, Clone)]
pub struct Sources {
    files: BTreeMap<String, String>,
}

impl Sources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, file: impl Into<String>, text: impl Into<String>) {
        self.files.insert(file.into(), text.into());
    }

    pub fn with(mut self, file: impl Into<String>, text: impl Into<String>) -> Self {
        self.add(file, text);
        self
    }

    /// 1-based line of `file`, without its line terminator.
    pub fn line(&self, file: &str, line: u32) -> Option<&str> {
        let text = self.files.get(file)?;
        let index = usize::try_from(line.checked_sub(1)?).ok()?;
        text.lines().nth(index)
    }
}

/// Render one diagnostic the way rustc does:
///
/// ```text
/// error[E0001]: undefined reference `helpr`
///   --> support.af:4:9
///    |
///  4 |     use helpr
///    |         ^^^^^
///    = help: did you mean `helper`?
/// ```
pub fn render_human(diag: &Diagnostic, sources: &Sources) -> String {
    let mut out = format!("{}[{}]: {}\n", diag.severity, diag.code, diag.message);
    let Some(span) = diag.span else {
        out.push_str(&format!("  --> {}\n", diag.file));
        push_help(&mut out, diag, 3);
        return out;
    };

    let mut labels: Vec<&Label> = diag.labels.iter().collect();
    labels.sort_by_key(|l| (l.span.start.line, l.span.start.column));
    let width = labels
        .iter()
        .map(|l| l.span.start.line)
        .chain(std::iter::once(span.start.line))
        .max()
        .unwrap_or(1)
        .to_string()
        .len();
    let gutter = " ".repeat(width);

    out.push_str(&format!(
        "{}--> {}:{}:{}\n",
        gutter, diag.file, span.start.line, span.start.column
    ));
    out.push_str(&format!("{} |\n", gutter));
    push_excerpt(&mut out, sources, &diag.file, span, '^', "", width);

    for label in labels {
        if label.file != diag.file {
            out.push_str(&format!(
                "{}::: {}:{}:{}\n",
                gutter, label.file, label.span.start.line, label.span.start.column
            ));
        }
        push_excerpt(
            &mut out,
            sources,
            &label.file,
            label.span,
            '-',
            &label.message,
            width,
        );
    }
    push_help(&mut out, diag, width + 1);
    out
}

fn push_excerpt(
    out: &mut String,
    sources: &Sources,
    file: &str,
    span: Span,
    marker: char,
    message: &str,
    width: usize,
) {
    let Some(text) = sources.line(file, span.start.line) else {
        return;
    };
    let gutter = " ".repeat(width);
    out.push_str(&format!("{:>width$} | {}\n", span.start.line, text, width = width));
    let start = span.start.column.max(1) as usize;
    let line_len = text.chars().count();
    let end = if span.end.line == span.start.line && span.end.column as usize > start {
        span.end.column as usize
    } else {
        line_len + 1
    };
    let len = end.saturating_sub(start).max(1);
    let underline = format!(
        "{}{}",
        " ".repeat(start - 1),
        marker.to_string().repeat(len)
    );
    if message.is_empty() {
        out.push_str(&format!("{} | {}\n", gutter, underline));
    } else {
        out.push_str(&format!("{} | {} {}\n", gutter, underline, message));
    }
}

fn push_help(out: &mut String, diag: &Diagnostic, indent: usize) {
    if let Some(help) = &diag.help {
        out.push_str(&format!("{}= help: {}\n", " ".repeat(indent), help));
    }
}

/// Render a list of diagnostics separated by blank lines.
pub fn render_all_human(diags: &[Diagnostic], sources: &Sources) -> String {
    diags
        .iter()
        .map(|d| render_human(d, sources))
        .collect::<Vec<_>>()
        .join("\n")
}

/// JSON array of diagnostics, each with the stable field set.
pub fn render_json(diags: &[Diagnostic]) -> serde_json::Value {
    serde_json::Value::Array(diags.iter().map(Diagnostic::to_json_value).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Code;
    use crate::span::Position;

    const SRC: &str = "agent helper:\n    instruction p\n\nagent triager:\n    use helpr\n";

    fn undefined() -> Diagnostic {
        Diagnostic::new(
            Code::UndefinedReference,
            "support.af",
            Some(Span::new(Position::new(5, 9), Position::new(5, 14))),
            "undefined reference `helpr`",
        )
        .with_help("did you mean `helper`?")
    }

    #[test]
    fn human_form_has_header_location_and_carets() {
        let sources = Sources::new().with("support.af", SRC);
        let text = render_human(&undefined(), &sources);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "error[E0001]: undefined reference `helpr`");
        assert_eq!(lines[1], " --> support.af:5:9");
        assert_eq!(lines[2], "  |");
        assert_eq!(lines[3], "5 |     use helpr");
        assert_eq!(lines[4], "  |         ^^^^^");
        assert_eq!(lines[5], "  = help: did you mean `helper`?");
    }

    #[test]
    fn secondary_labels_use_dashes() {
        let diag = Diagnostic::new(
            Code::DuplicateDefinition,
            "support.af",
            Some(Span::new(Position::new(4, 7), Position::new(4, 14))),
            "duplicate definition of `triager`",
        )
        .with_label(
            "support.af",
            Span::new(Position::new(1, 7), Position::new(1, 13)),
            "first defined here",
        );
        let sources = Sources::new().with("support.af", SRC);
        let text = render_human(&diag, &sources);
        assert!(text.contains("4 | agent triager:\n  |       ^^^^^^^\n"), "{}", text);
        assert!(text.contains("1 | agent helper:\n  |       ------ first defined here\n"), "{}", text);
    }

    #[test]
    fn missing_source_still_renders_location() {
        let text = render_human(&undefined(), &Sources::new());
        assert!(text.contains("--> support.af:5:9"));
        assert!(text.contains("= help:"));
    }

    #[test]
    fn json_form_is_an_array_of_stable_objects() {
        let warning = Diagnostic::new(Code::UnboundedLoop, "a.af", None, "loop without bound");
        let v = render_json(&[undefined(), warning]);
        let arr = v.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["line"], 5);
        assert_eq!(arr[1]["severity"], "warning");
        assert_eq!(arr[1]["line"], 0);
        assert!(arr[1]["help"].is_null());
        let keys: Vec<&String> = arr[0].as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 7);
    }
}
