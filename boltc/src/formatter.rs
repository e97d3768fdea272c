//! Source formatter used by RENUM: renumbers statements by position and
//! rewrites every numeric line reference after GOTO, GOSUB, RESTORE,
//! THEN/ELSE, and through ON ... GOTO/GOSUB chains, while leaving strings,
//! comments, and non-numeric targets alone. Keywords are canonicalized to
//! uppercase outside strings and comments.

use std::collections::BTreeMap;

const KEYWORDS: &[&str] = &[
    "FOR", "TO", "STEP", "NEXT", "WHILE", "WEND", "REPEAT", "UNTIL", "DO", "LOOP", "IF", "THEN",
    "ELSE", "ELSEIF", "ENDIF", "END", "GOTO", "GOSUB", "RETURN", "DIM", "LET", "PRINT", "CONSOLE",
    "INPUT", "LINE", "READ", "DATA", "RESTORE", "REM", "AND", "OR", "NOT", "XOR", "MOD", "SUB",
    "FUNCTION", "DEF", "FN", "CALL", "EXIT", "CASE", "OF", "WHEN", "OTHERWISE", "ENDCASE",
    "OPTION", "BASE", "EXPLICIT", "UNICODE", "ERROR", "CANCELLABLE", "OPEN", "CLOSE", "AS",
    "OUTPUT", "APPEND", "CONSTANT", "ON", "OFF", "IN", "USING", "AT", "PLAY", "PLAY_SOUND",
    "INTO_WAV", "INTO_SLOT", "FAST", "IIF",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokKind {
    Word,
    Number,
    Str,
    Comment,
    Other,
}

#[derive(Debug, Clone)]
struct Tok {
    kind: TokKind,
    text: String,
}

pub struct FormatterOptions {
    /// First new line number; 0 keeps original numbers.
    pub start_line: u32,
    pub step: u32,
    pub update_references: bool,
    pub uppercase_keywords: bool,
}

impl Default for FormatterOptions {
    fn default() -> Self {
        Self { start_line: 10, step: 10, update_references: true, uppercase_keywords: true }
    }
}

pub struct FormatterResult {
    pub success: bool,
    pub formatted: String,
    pub lines_processed: usize,
    pub line_map: BTreeMap<u32, u32>,
    pub error: Option<String>,
}

struct SourceLine {
    original_number: u32,
    new_number: u32,
    content: String,
}

/// Split line content into tokens, preserving every character. A word
/// carries any trailing sigil; REM and apostrophe comments swallow the rest
/// of the line.
fn tokenize(content: &str) -> Vec<Tok> {
    let mut toks = Vec::new();
    let chars: Vec<char> = content.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '"' {
            let mut text = String::from('"');
            i += 1;
            while i < chars.len() {
                let d = chars[i];
                text.push(d);
                i += 1;
                if d == '\\' && i < chars.len() {
                    text.push(chars[i]);
                    i += 1;
                    continue;
                }
                if d == '"' {
                    break;
                }
            }
            toks.push(Tok { kind: TokKind::Str, text });
            continue;
        }
        if c == '\'' {
            let text: String = chars[i..].iter().collect();
            toks.push(Tok { kind: TokKind::Comment, text });
            break;
        }
        if c.is_ascii_digit() || (c == '.' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit()) {
            let mut text = String::new();
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                text.push(chars[i]);
                i += 1;
            }
            toks.push(Tok { kind: TokKind::Number, text });
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let mut text = String::new();
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                text.push(chars[i]);
                i += 1;
            }
            if i < chars.len() && matches!(chars[i], '$' | '%' | '#' | '!' | '&') {
                text.push(chars[i]);
                i += 1;
            }
            if text.eq_ignore_ascii_case("REM") {
                let rest: String = chars[i..].iter().collect();
                toks.push(Tok { kind: TokKind::Comment, text: format!("{}{}", text, rest) });
                break;
            }
            toks.push(Tok { kind: TokKind::Word, text });
            continue;
        }
        toks.push(Tok { kind: TokKind::Other, text: c.to_string() });
        i += 1;
    }
    toks
}

/// Rewrite numeric jump references through the line-number map.
fn rewrite_refs(toks: &mut [Tok], map: &BTreeMap<u32, u32>) {
    let mut i = 0;
    while i < toks.len() {
        let trigger = toks[i].kind == TokKind::Word
            && matches!(
                toks[i].text.to_ascii_uppercase().as_str(),
                "GOTO" | "GOSUB" | "RESTORE" | "THEN" | "ELSE"
            );
        let chains = trigger
            && matches!(toks[i].text.to_ascii_uppercase().as_str(), "GOTO" | "GOSUB");
        if !trigger {
            i += 1;
            continue;
        }
        // THEN GOTO / ELSE GOSUB: let the inner keyword do the rewriting.
        let mut j = i + 1;
        loop {
            while j < toks.len()
                && toks[j].kind == TokKind::Other
                && toks[j].text.chars().all(|c| c.is_whitespace())
            {
                j += 1;
            }
            if j >= toks.len() {
                break;
            }
            match toks[j].kind {
                TokKind::Number => {
                    if let Ok(n) = toks[j].text.parse::<u32>() {
                        if let Some(&new) = map.get(&n) {
                            toks[j].text = new.to_string();
                        }
                    }
                    j += 1;
                    if !chains {
                        break;
                    }
                    // ON ... GOTO 10, 20, 30: continue through commas.
                    while j < toks.len()
                        && toks[j].kind == TokKind::Other
                        && toks[j].text.chars().all(|c| c.is_whitespace())
                    {
                        j += 1;
                    }
                    if j < toks.len() && toks[j].kind == TokKind::Other && toks[j].text == "," {
                        j += 1;
                        continue;
                    }
                    break;
                }
                _ => break,
            }
        }
        i += 1;
    }
}

fn uppercase_keywords(toks: &mut [Tok]) {
    for tok in toks.iter_mut() {
        if tok.kind == TokKind::Word {
            let upper = tok.text.to_ascii_uppercase();
            if KEYWORDS.contains(&upper.as_str()) {
                tok.text = upper;
            }
        }
    }
}

fn render(toks: &[Tok]) -> String {
    toks.iter().map(|t| t.text.as_str()).collect()
}

pub fn format_code(source: &str, options: &FormatterOptions) -> FormatterResult {
    let mut lines: Vec<SourceLine> = Vec::new();
    let mut auto_number = 1000u32;
    for raw in source.lines() {
        if raw.trim().is_empty() {
            continue;
        }
        let trimmed = raw.trim_start();
        let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
        let (number, content) = if digits.is_empty() {
            // Unnumbered lines are auto-numbered so they can be renumbered.
            let n = auto_number;
            auto_number += 10;
            (n, trimmed.to_string())
        } else {
            let n = digits.parse::<u32>().unwrap_or(0);
            (n, trimmed[digits.len()..].trim_start().to_string())
        };
        lines.push(SourceLine { original_number: number, new_number: number, content });
    }

    if lines.is_empty() {
        return FormatterResult {
            success: false,
            formatted: String::new(),
            lines_processed: 0,
            line_map: BTreeMap::new(),
            error: Some("no BASIC lines found in source".to_string()),
        };
    }

    let mut map = BTreeMap::new();
    if options.start_line > 0 {
        let mut next = options.start_line;
        for line in &mut lines {
            map.insert(line.original_number, next);
            line.new_number = next;
            next += options.step;
        }
    } else {
        for line in &lines {
            map.insert(line.original_number, line.original_number);
        }
    }

    let mut out = String::new();
    for line in &lines {
        let mut toks = tokenize(&line.content);
        if options.update_references {
            rewrite_refs(&mut toks, &map);
        }
        if options.uppercase_keywords {
            uppercase_keywords(&mut toks);
        }
        out.push_str(&line.new_number.to_string());
        out.push(' ');
        out.push_str(&render(&toks));
        out.push('\n');
    }

    FormatterResult {
        success: true,
        formatted: out,
        lines_processed: lines.len(),
        line_map: map,
        error: None,
    }
}

pub fn renumber_code(source: &str, start: u32, step: u32) -> FormatterResult {
    format_code(
        source,
        &FormatterOptions { start_line: start, step, update_references: true, uppercase_keywords: true },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renumber_rewrites_goto_and_then() {
        let src = "5 FOR I=1 TO 3\n7 GOTO 13\n13 PRINT I\n15 NEXT I\n";
        let result = renumber_code(src, 100, 10);
        assert!(result.success);
        assert_eq!(result.formatted, "100 FOR I=1 TO 3\n110 GOTO 120\n120 PRINT I\n130 NEXT I\n");
    }

    #[test]
    fn then_and_else_targets_are_rewritten() {
        let src = "10 IF X THEN 30 ELSE 40\n30 END\n40 END\n";
        let result = renumber_code(src, 100, 100);
        assert!(result.formatted.contains("IF X THEN 200 ELSE 300"));
    }

    #[test]
    fn on_goto_chain_is_rewritten() {
        let src = "10 ON K GOTO 30, 40, 50\n30 END\n40 END\n50 END\n";
        let result = renumber_code(src, 10, 10);
        assert!(result.formatted.contains("ON K GOTO 20, 30, 40"));
    }

    #[test]
    fn strings_and_comments_are_untouched() {
        let src = "10 PRINT \"GOTO 20\"\n20 REM GOTO 10\n";
        let result = renumber_code(src, 100, 10);
        assert!(result.formatted.contains("PRINT \"GOTO 20\""));
        assert!(result.formatted.contains("REM GOTO 10"));
    }

    #[test]
    fn non_numeric_targets_preserved() {
        let src = "10 GOTO loop\n20 :loop\n30 END\n";
        let result = renumber_code(src, 100, 10);
        assert!(result.formatted.contains("GOTO loop"));
    }

    #[test]
    fn keywords_uppercased_outside_strings() {
        let src = "10 print \"print\"\n";
        let result = renumber_code(src, 10, 10);
        assert_eq!(result.formatted, "10 PRINT \"print\"\n");
    }

    #[test]
    fn restore_target_rewritten() {
        let src = "10 DATA 1\n20 RESTORE 10\n";
        let result = renumber_code(src, 100, 50);
        assert!(result.formatted.contains("RESTORE 100"));
    }
}
