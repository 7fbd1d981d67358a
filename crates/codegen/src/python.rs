//! Python lexical helpers: string literals, identifiers, class names.

use std::fmt::Write as _;
use std::path::Path;

const KEYWORDS: [&str; 35] = [
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// Double-quoted, single-line Python string literal.
pub fn py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

pub fn py_float(v: f64) -> String {
    if v.is_nan() {
        "float(\"nan\")".to_owned()
    } else if v.is_infinite() {
        if v > 0.0 {
            "float(\"inf\")".to_owned()
        } else {
            "float(\"-inf\")".to_owned()
        }
    } else {
        // `{:?}` always keeps a decimal point or exponent
        format!("{:?}", v)
    }
}

/// An agentflow name as a Python identifier fragment: `-` becomes `_` and
/// Python keywords get a trailing underscore.
pub fn py_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if KEYWORDS.contains(&out.as_str()) {
        out.push('_');
    }
    out
}

/// `support_bot.af` → `SupportBot` + suffix.
pub fn class_name(file: &str, suffix: &str) -> String {
    let stem = Path::new(file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Agentflow");
    let mut out = String::new();
    for part in stem.split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "Agentflow");
    }
    out.push_str(suffix);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_escape_to_one_line() {
        assert_eq!(py_str("a \"b\"\n\\c\t"), "\"a \\\"b\\\"\\n\\\\c\\t\"");
        assert_eq!(py_str("bell\u{7}"), "\"bell\\x07\"");
        assert_eq!(py_str("héllo {x}"), "\"héllo {x}\"");
    }

    #[test]
    fn floats_keep_their_type() {
        assert_eq!(py_float(80.0), "80.0");
        assert_eq!(py_float(0.25), "0.25");
        assert_eq!(py_float(f64::INFINITY), "float(\"inf\")");
    }

    #[test]
    fn names_become_identifiers() {
        assert_eq!(py_name("triage-bot"), "triage_bot");
        assert_eq!(py_name("class"), "class_");
        assert_eq!(py_name("2fa"), "_2fa");
    }

    #[test]
    fn class_names_from_file_ids() {
        assert_eq!(class_name("flows/support_bot.af", "Workflow"), "SupportBotWorkflow");
        assert_eq!(class_name("triage-v2.af", "Workflow"), "TriageV2Workflow");
        assert_eq!(class_name("123.af", "Workflow"), "Agentflow123Workflow");
    }
}
