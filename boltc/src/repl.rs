//! Interactive line-numbered shell. Numbered input edits the program store;
//! bare commands (LIST, RUN, NEW, LOAD, SAVE, RENUM, AUTO, IR, SYMBOLS)
//! drive the session. Uses rustyline when a terminal is available and falls
//! back to plain stdio otherwise.

use std::io::{self, BufRead, Write};

use bolt_compiler::compile_with;
use bolt_ir::{EmitOptions, ListingEmitter, TargetEmitter};
use bolt_semantic::SemanticAnalyzer;

use crate::registry;
use crate::store::ProgramStore;

pub struct Session {
    pub store: ProgramStore,
    last_file: String,
}

impl Session {
    pub fn new() -> Self {
        Self { store: ProgramStore::new(), last_file: "program.bas".to_string() }
    }

    fn run(&mut self) {
        if self.store.is_empty() {
            println!("nothing to run");
            return;
        }
        let source = self.store.generate();
        let reg = registry();
        let mut analyzer = SemanticAnalyzer::new(reg);
        match compile_with(&source, reg, &mut analyzer) {
            Ok(program) => {
                for w in &program.warnings {
                    println!("{}", w);
                }
                println!(
                    "ok: {} instructions, {} blocks, {} data values",
                    program.ir.len(),
                    program.ir.block_count,
                    program.ir.data_values.len()
                );
            }
            Err(diags) => {
                for d in diags {
                    println!("{}", d);
                }
            }
        }
    }

    fn dump_ir(&mut self) {
        if self.store.is_empty() {
            println!("nothing to compile");
            return;
        }
        let source = self.store.generate();
        let reg = registry();
        match bolt_compiler::compile(&source, reg) {
            Ok(program) => {
                print!("{}", ListingEmitter.emit(&program.ir, &EmitOptions::default()));
            }
            Err(diags) => {
                for d in diags {
                    println!("{}", d);
                }
            }
        }
    }

    fn symbols(&mut self) {
        let source = self.store.generate();
        let reg = registry();
        let parsed = bolt_compiler::service::analyze_source(&source, reg);
        if parsed.errors.is_empty() && parsed.warnings.is_empty() && parsed.symbols.is_empty() {
            println!("no symbols");
            return;
        }
        for e in &parsed.errors {
            println!("error [{}] at {}:{}: {}", e.code, e.line, e.column, e.message);
        }
        for w in &parsed.warnings {
            println!("warning [{}] at {}:{}: {}", w.code, w.line, w.column, w.message);
        }
        for s in &parsed.symbols {
            println!("{:?} {} (line {})", s.kind, s.name, s.line);
        }
    }

    /// Handle one input line. Returns false when the session should end.
    pub fn handle_line(&mut self, input: &str) -> bool {
        let line = input.trim_end_matches(['\r', '\n']);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return true;
        }

        // Numbered line: edit the program.
        let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            let rest = &trimmed[digits.len()..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                if let Ok(n) = digits.parse::<u32>() {
                    if !ProgramStore::is_valid_line_number(n) {
                        println!("line number {} out of range 1..65535", n);
                        return true;
                    }
                    self.store.set(n, rest.trim_start());
                    return true;
                }
            }
        }

        let mut parts = trimmed.split_whitespace();
        let command = parts.next().unwrap_or("").to_ascii_uppercase();
        match command.as_str() {
            "BYE" | "QUIT" | "SYSTEM" | "EXIT" => return false,
            "LIST" => {
                match parts.next() {
                    Some(range) => {
                        let (a, b) = parse_range(range);
                        for (n, text) in self.store.range(a, b) {
                            println!("{} {}", n, text);
                        }
                    }
                    None => {
                        for (n, text) in self.store.iter() {
                            println!("{} {}", n, text);
                        }
                    }
                }
            }
            "RUN" => self.run(),
            "IR" | "DUMP" => self.dump_ir(),
            "SYMBOLS" | "ANALYZE" => self.symbols(),
            "NEW" | "CLEAR" => {
                self.store.clear();
                println!("ready");
            }
            "RENUM" | "RENUMBER" => {
                let (start, step) = parse_start_step(parts.next(), 10, 10);
                self.store.renumber(start, step);
                println!("renumbered from {} step {}", start, step);
            }
            "AUTO" => match parts.next() {
                Some(arg) if arg.eq_ignore_ascii_case("OFF") => {
                    self.store.set_auto_mode(false, 10, 10);
                    println!("auto off");
                }
                arg => {
                    let (start, step) = parse_start_step(arg, 10, 10);
                    self.store.set_auto_mode(true, start, step);
                    println!("auto from {} step {}", start, step);
                }
            },
            "SAVE" => {
                if let Some(file) = parts.next() {
                    self.last_file = file.to_string();
                }
                let path = self.last_file.clone();
                match self.store.save(&path) {
                    Ok(()) => println!("saved {}", self.store.filename().unwrap_or(&path)),
                    Err(e) => println!("save error: {}", e),
                }
            }
            "LOAD" => match parts.next() {
                Some(file) => {
                    self.last_file = file.to_string();
                    match self.store.load(file) {
                        Ok(count) => println!("loaded {} line(s)", count),
                        Err(e) => println!("load error: {}", e),
                    }
                }
                None => println!("usage: LOAD <filename>"),
            },
            "STATUS" => {
                let stats = self.store.statistics();
                println!(
                    "{} line(s), {} chars, range {}..{}{}{}",
                    stats.line_count,
                    stats.total_characters,
                    stats.min_line,
                    stats.max_line,
                    if stats.has_gaps { ", gaps" } else { "" },
                    if self.store.is_modified() { ", modified" } else { "" }
                );
            }
            "HELP" => {
                println!("commands: LIST [a-b], RUN, IR, SYMBOLS, NEW, RENUM [start[,step]],");
                println!("          AUTO [start[,step]]|OFF, SAVE [file], LOAD <file>, STATUS, BYE");
                println!("enter '<number> <code>' to edit, '<number>' alone to delete a line");
            }
            _ => {
                // In auto mode, bare statements append at the cursor.
                if self.store.is_auto_mode() {
                    if let Some(n) = self.store.next_auto() {
                        self.store.set(n, trimmed);
                        println!("{} {}", n, trimmed);
                        return true;
                    }
                }
                println!("unknown command (HELP lists commands); program lines start with a number");
            }
        }
        true
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_range(arg: &str) -> (u32, u32) {
    if let Some((a, b)) = arg.split_once('-') {
        let start = a.trim().parse().unwrap_or(crate::store::MIN_LINE);
        let end = b.trim().parse().unwrap_or(crate::store::MAX_LINE);
        (start, end)
    } else {
        let n = arg.trim().parse().unwrap_or(crate::store::MIN_LINE);
        (n, n)
    }
}

fn parse_start_step(arg: Option<&str>, default_start: u32, default_step: u32) -> (u32, u32) {
    match arg {
        Some(text) => {
            if let Some((a, b)) = text.split_once(',') {
                (
                    a.trim().parse().unwrap_or(default_start),
                    b.trim().parse().unwrap_or(default_step),
                )
            } else {
                (text.trim().parse().unwrap_or(default_start), default_step)
            }
        }
        None => (default_start, default_step),
    }
}

pub fn start(mut session: Session) {
    println!("Bolt BASIC interactive shell");
    println!("type HELP for commands");

    // Prefer rustyline; fall back to stdio when unavailable.
    let mut editor: Option<rustyline::DefaultEditor> = rustyline::DefaultEditor::new().ok();
    loop {
        print!("\nOK\n");
        let _ = io::stdout().flush();
        let line = match editor.as_mut() {
            Some(ed) => match ed.readline("") {
                Ok(l) => {
                    if !l.trim().is_empty() {
                        let _ = ed.add_history_entry(l.as_str());
                    }
                    l
                }
                Err(_) => break,
            },
            None => {
                let mut buf = String::new();
                match io::stdin().lock().read_line(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => buf,
                }
            }
        };
        if !session.handle_line(&line) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_lines_edit_the_store() {
        let mut s = Session::new();
        assert!(s.handle_line("10 PRINT 1"));
        assert!(s.handle_line("20 END"));
        assert_eq!(s.store.len(), 2);
        // A bare number deletes.
        assert!(s.handle_line("10"));
        assert_eq!(s.store.len(), 1);
    }

    #[test]
    fn bye_ends_the_session() {
        let mut s = Session::new();
        assert!(!s.handle_line("BYE"));
        let mut s2 = Session::new();
        assert!(!s2.handle_line("quit"));
    }

    #[test]
    fn auto_mode_appends() {
        let mut s = Session::new();
        assert!(s.handle_line("AUTO 100,5"));
        assert!(s.handle_line("PRINT 1"));
        assert!(s.handle_line("PRINT 2"));
        assert_eq!(s.store.get(100), Some("PRINT 1"));
        assert_eq!(s.store.get(105), Some("PRINT 2"));
    }

    #[test]
    fn renum_command() {
        let mut s = Session::new();
        s.handle_line("5 GOTO 9");
        s.handle_line("9 END");
        s.handle_line("RENUM 10,10");
        assert_eq!(s.store.get(10), Some("GOTO 20"));
        assert_eq!(s.store.get(20), Some("END"));
    }
}
