//! Generated line ↔ source position table for one compiled unit.
//!
//! Entries are recorded by the code writer as lines are emitted. The table
//! does no I/O; runtimes load it (it serializes with serde) to rewrite
//! tracebacks into agentflow positions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMap {
    /// 1-based generated line → origin.
    entries: BTreeMap<u32, SourceLocation>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the origin of `generated_line`. A line keeps its first origin.
    pub fn record(&mut self, generated_line: u32, file: &str, line: u32, column: u32) {
        self.entries
            .entry(generated_line)
            .or_insert_with(|| SourceLocation {
                file: file.to_owned(),
                line,
                column,
            });
    }

    pub fn resolve(&self, generated_line: u32) -> Option<&SourceLocation> {
        self.entries.get(&generated_line)
    }

    /// Generated line whose origin is closest to `line` in `file`. Exact
    /// line matches win; otherwise the nearest origin line, preferring the
    /// earlier one on a tie. Among lines with the same origin the first
    /// generated line is returned.
    pub fn reverse_lookup(&self, file: &str, line: u32) -> Option<u32> {
        self.entries
            .iter()
            .filter(|(_, loc)| loc.file == file)
            .min_by_key(|(generated, loc)| (loc.line.abs_diff(line), loc.line, **generated))
            .map(|(generated, _)| *generated)
    }

    pub fn entries(&self) -> impl Iterator<Item = (u32, &SourceLocation)> {
        self.entries.iter().map(|(l, loc)| (*l, loc))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SourceMap {
        let mut map = SourceMap::new();
        map.record(10, "main.af", 4, 5);
        map.record(11, "main.af", 5, 5);
        map.record(12, "main.af", 5, 5);
        map.record(13, "main.af", 9, 9);
        map.record(20, "lib.af", 5, 1);
        map
    }

    #[test]
    fn resolve_returns_recorded_origin() {
        let map = sample();
        let loc = map.resolve(11).unwrap();
        assert_eq!((loc.file.as_str(), loc.line, loc.column), ("main.af", 5, 5));
        assert!(map.resolve(1).is_none());
    }

    #[test]
    fn first_origin_wins() {
        let mut map = sample();
        map.record(10, "main.af", 99, 1);
        assert_eq!(map.resolve(10).unwrap().line, 4);
    }

    #[test]
    fn reverse_lookup_prefers_exact_then_nearest() {
        let map = sample();
        assert_eq!(map.reverse_lookup("main.af", 5), Some(11));
        assert_eq!(map.reverse_lookup("main.af", 7), Some(11));
        assert_eq!(map.reverse_lookup("main.af", 8), Some(13));
        assert_eq!(map.reverse_lookup("lib.af", 1), Some(20));
        assert_eq!(map.reverse_lookup("other.af", 1), None);
    }

    #[test]
    fn serializes_for_runtimes() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["entries"]["13"]["line"], 9);
    }
}
