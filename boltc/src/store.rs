//! In-memory program store for the interactive shell: an ordered map from
//! BASIC line number to source text, with renumbering, auto-numbering, and
//! load/save. The renumber path must agree with the compiler's line
//! resolution, so it delegates to the shared formatter.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::formatter::{format_code, FormatterOptions};

pub const MIN_LINE: u32 = 1;
pub const MAX_LINE: u32 = 65535;

#[derive(Debug, Default, Clone, Copy)]
pub struct ProgramStats {
    pub line_count: usize,
    pub total_characters: usize,
    pub min_line: u32,
    pub max_line: u32,
    pub has_gaps: bool,
}

#[derive(Debug, Default)]
pub struct ProgramStore {
    lines: BTreeMap<u32, String>,
    filename: Option<String>,
    modified: bool,
    auto_mode: bool,
    auto_start: u32,
    auto_step: u32,
    auto_current: u32,
}

impl ProgramStore {
    pub fn new() -> Self {
        Self {
            lines: BTreeMap::new(),
            filename: None,
            modified: false,
            auto_mode: false,
            auto_start: 10,
            auto_step: 10,
            auto_current: 10,
        }
    }

    pub fn is_valid_line_number(n: u32) -> bool {
        (MIN_LINE..=MAX_LINE).contains(&n)
    }

    /// Store a line. Whitespace is trimmed; an empty line deletes the entry.
    pub fn set(&mut self, number: u32, text: &str) {
        if !Self::is_valid_line_number(number) {
            return;
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            self.delete(number);
            return;
        }
        self.lines.insert(number, trimmed.to_string());
        self.modified = true;
        if self.auto_mode && number >= self.auto_current {
            self.auto_current = number + self.auto_step;
        }
    }

    pub fn delete(&mut self, number: u32) {
        if self.lines.remove(&number).is_some() {
            self.modified = true;
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.filename = None;
        self.modified = false;
        self.auto_current = self.auto_start;
    }

    pub fn has(&self, number: u32) -> bool {
        self.lines.contains_key(&number)
    }

    pub fn get(&self, number: u32) -> Option<&str> {
        self.lines.get(&number).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn first(&self) -> Option<u32> {
        self.lines.keys().next().copied()
    }

    pub fn last(&self) -> Option<u32> {
        self.lines.keys().next_back().copied()
    }

    pub fn next(&self, number: u32) -> Option<u32> {
        self.lines.range(number + 1..).next().map(|(&n, _)| n)
    }

    pub fn prev(&self, number: u32) -> Option<u32> {
        self.lines.range(..number).next_back().map(|(&n, _)| n)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.lines.iter().map(|(&n, s)| (n, s.as_str()))
    }

    pub fn range(&self, start: u32, end: u32) -> impl Iterator<Item = (u32, &str)> {
        self.lines.range(start..=end).map(|(&n, s)| (n, s.as_str()))
    }

    /// Concatenated source fed to the compiler on each RUN.
    pub fn generate(&self) -> String {
        let mut out = String::new();
        for (n, text) in &self.lines {
            out.push_str(&n.to_string());
            out.push(' ');
            out.push_str(text);
            out.push('\n');
        }
        out
    }

    pub fn generate_range(&self, start: u32, end: u32) -> String {
        let mut out = String::new();
        for (&n, text) in self.lines.range(start..=end) {
            out.push_str(&n.to_string());
            out.push(' ');
            out.push_str(text);
            out.push('\n');
        }
        out
    }

    /// Renumber by position, rewriting GOTO/GOSUB/THEN/ELSE/RESTORE and
    /// ON ... chains. If formatting fails, fall back to positional
    /// renumbering without reference rewriting.
    pub fn renumber(&mut self, start: u32, step: u32) {
        if self.lines.is_empty() {
            return;
        }
        let source = self.generate();
        let options = FormatterOptions {
            start_line: start,
            step,
            update_references: true,
            uppercase_keywords: true,
        };
        let result = format_code(&source, &options);
        if result.success {
            self.lines.clear();
            for line in result.formatted.lines() {
                let trimmed = line.trim_start();
                let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
                if digits.is_empty() {
                    continue;
                }
                if let Ok(n) = digits.parse::<u32>() {
                    let code = trimmed[digits.len()..].trim_start();
                    if !code.is_empty() {
                        self.lines.insert(n, code.to_string());
                    }
                }
            }
        } else {
            let old = std::mem::take(&mut self.lines);
            let mut current = start;
            for (_, text) in old {
                self.lines.insert(current, text);
                current += step;
            }
        }
        self.modified = true;
        if self.auto_mode {
            self.auto_start = start;
            self.auto_step = step;
            self.auto_current = start + (self.lines.len() as u32) * step;
        }
    }

    // ---- auto-numbering ---------------------------------------------------

    pub fn set_auto_mode(&mut self, enabled: bool, start: u32, step: u32) {
        self.auto_mode = enabled;
        self.auto_start = start;
        self.auto_step = step;
        if enabled {
            self.auto_current = start;
            while self.has(self.auto_current) {
                self.auto_current += step;
            }
        }
    }

    pub fn is_auto_mode(&self) -> bool {
        self.auto_mode
    }

    /// The next free auto line number; advances past occupied lines.
    pub fn next_auto(&mut self) -> Option<u32> {
        if !self.auto_mode {
            return None;
        }
        while self.has(self.auto_current) {
            self.auto_current += self.auto_step;
        }
        Some(self.auto_current)
    }

    pub fn advance_auto(&mut self) {
        if self.auto_mode {
            self.auto_current += self.auto_step;
        }
    }

    // ---- files ------------------------------------------------------------

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn set_filename(&mut self, name: &str) {
        self.filename = Some(with_default_suffix(name));
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    /// Load `<number> <text>` lines. Empty lines and `#` comments are
    /// skipped; lines without numbers are rejected.
    pub fn load(&mut self, path: &str) -> io::Result<usize> {
        let path = with_default_suffix(path);
        let content = fs::read_to_string(Path::new(&path))?;
        self.lines.clear();
        let mut loaded = 0usize;
        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let digits: String = line.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                continue;
            }
            if let Ok(n) = digits.parse::<u32>() {
                if Self::is_valid_line_number(n) {
                    let code = line[digits.len()..].trim();
                    if !code.is_empty() {
                        self.lines.insert(n, code.to_string());
                        loaded += 1;
                    }
                }
            }
        }
        self.filename = Some(path);
        self.modified = false;
        Ok(loaded)
    }

    pub fn save(&mut self, path: &str) -> io::Result<()> {
        let path = with_default_suffix(path);
        fs::write(Path::new(&path), self.generate())?;
        self.filename = Some(path);
        self.modified = false;
        Ok(())
    }

    pub fn statistics(&self) -> ProgramStats {
        let mut stats = ProgramStats::default();
        if self.lines.is_empty() {
            return stats;
        }
        stats.line_count = self.lines.len();
        stats.min_line = self.first().unwrap_or(0);
        stats.max_line = self.last().unwrap_or(0);
        stats.total_characters = self.lines.values().map(|s| s.len()).sum();
        let mut expected = stats.min_line;
        for &n in self.lines.keys() {
            if n > expected {
                stats.has_gaps = true;
                break;
            }
            expected = n + 1;
        }
        stats
    }
}

/// Filenames without a `.` separator default to a `.bas` suffix.
fn with_default_suffix(name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{}.bas", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete() {
        let mut store = ProgramStore::new();
        store.set(10, "  PRINT 1  ");
        assert_eq!(store.get(10), Some("PRINT 1"));
        assert!(store.is_modified());
        // Empty text deletes the line.
        store.set(10, "   ");
        assert!(!store.has(10));
    }

    #[test]
    fn line_number_bounds() {
        let mut store = ProgramStore::new();
        store.set(0, "PRINT 1");
        store.set(65536, "PRINT 1");
        assert!(store.is_empty());
        store.set(1, "PRINT 1");
        store.set(65535, "PRINT 2");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn ordering_queries() {
        let mut store = ProgramStore::new();
        store.set(20, "B");
        store.set(10, "A");
        store.set(30, "C");
        assert_eq!(store.first(), Some(10));
        assert_eq!(store.last(), Some(30));
        assert_eq!(store.next(10), Some(20));
        assert_eq!(store.next(20), Some(30));
        assert_eq!(store.next(30), None);
        assert_eq!(store.prev(30), Some(20));
        assert_eq!(store.prev(10), None);
    }

    #[test]
    fn generate_shapes_lines() {
        let mut store = ProgramStore::new();
        store.set(10, "PRINT 1");
        store.set(20, "END");
        assert_eq!(store.generate(), "10 PRINT 1\n20 END\n");
        assert_eq!(store.generate_range(10, 10), "10 PRINT 1\n");
    }

    #[test]
    fn renumber_rewrites_references() {
        let mut store = ProgramStore::new();
        store.set(5, "FOR I=1 TO 3");
        store.set(7, "GOTO 13");
        store.set(13, "PRINT I");
        store.set(15, "NEXT I");
        store.renumber(100, 10);
        let numbers: Vec<u32> = store.iter().map(|(n, _)| n).collect();
        assert_eq!(numbers, vec![100, 110, 120, 130]);
        assert_eq!(store.get(110), Some("GOTO 120"));
    }

    #[test]
    fn renumber_is_idempotent() {
        let mut store = ProgramStore::new();
        store.set(5, "GOTO 9");
        store.set(9, "END");
        store.renumber(10, 10);
        let first = store.generate();
        store.renumber(10, 10);
        assert_eq!(store.generate(), first);
    }

    #[test]
    fn auto_numbering_skips_occupied_lines() {
        let mut store = ProgramStore::new();
        store.set(20, "PRINT 1");
        store.set_auto_mode(true, 10, 10);
        assert_eq!(store.next_auto(), Some(10));
        store.set(10, "PRINT 0");
        // 20 is taken, so the cursor moves past it.
        assert_eq!(store.next_auto(), Some(30));
    }

    #[test]
    fn statistics() {
        let mut store = ProgramStore::new();
        store.set(10, "PRINT 1");
        store.set(30, "END");
        let stats = store.statistics();
        assert_eq!(stats.line_count, 2);
        assert_eq!(stats.min_line, 10);
        assert_eq!(stats.max_line, 30);
        assert!(stats.has_gaps);
    }
}
