/*
Bolt BASIC — interactive shell and batch compiler front-end

MIT License

Copyright (c) 2026 The Bolt BASIC Authors

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

use std::env;
use std::fs;
use std::process::ExitCode;

use bolt_ir::{EmitOptions, ListingEmitter, TargetEmitter};
use bolt_registry::CommandRegistry;
use once_cell::sync::Lazy;

mod formatter;
mod repl;
mod store;

// One default registry for the whole process; the host would extend this at
// startup before any compilation runs.
static REGISTRY: Lazy<CommandRegistry> = Lazy::new(CommandRegistry::with_defaults);

pub fn registry() -> &'static CommandRegistry {
    &REGISTRY
}

fn print_help() {
    println!("boltc — Bolt BASIC compiler and interactive shell");
    println!();
    println!("usage:");
    println!("  boltc                          start the interactive shell");
    println!("  boltc <file.bas>               compile and report diagnostics");
    println!("  boltc --ir <file.bas>          compile and print the IR listing");
    println!("  boltc --ir-bare <file.bas>     IR listing without comments");
    println!("  boltc --analyze <file.bas>     front-end diagnostics and symbols");
    println!("  boltc --analyze-json <file.bas>  the same, as JSON");
    println!("  boltc --renum <file.bas> [start [step]]  renumber to stdout");
    println!("  boltc -h | --help              this help");
}

fn read_source(path: &str) -> Result<String, ExitCode> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) => {
            eprintln!("read {}: {}", path, e);
            Err(ExitCode::FAILURE)
        }
    }
}

fn cmd_compile(path: &str) -> ExitCode {
    let src = match read_source(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    match bolt_compiler::compile(&src, registry()) {
        Ok(program) => {
            for w in &program.warnings {
                eprintln!("{}", w);
            }
            println!(
                "ok: {} instructions, {} labels, {} blocks",
                program.ir.len(),
                program.ir.label_count,
                program.ir.block_count
            );
            ExitCode::SUCCESS
        }
        Err(diags) => {
            for d in &diags {
                eprintln!("{}", d);
            }
            ExitCode::FAILURE
        }
    }
}

fn cmd_ir(path: &str, comments: bool) -> ExitCode {
    let src = match read_source(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    match bolt_compiler::compile(&src, registry()) {
        Ok(program) => {
            print!(
                "{}",
                ListingEmitter.emit(&program.ir, &EmitOptions { emit_comments: comments })
            );
            ExitCode::SUCCESS
        }
        Err(diags) => {
            for d in &diags {
                eprintln!("{}", d);
            }
            ExitCode::FAILURE
        }
    }
}

fn cmd_analyze(path: &str, json: bool) -> ExitCode {
    let src = match read_source(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let diags = bolt_compiler::service::analyze_source(&src, registry());
    if json {
        match serde_json::to_string_pretty(&diags) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                eprintln!("json: {}", e);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }
    if diags.errors.is_empty() {
        println!("no errors");
    } else {
        println!("errors:");
        for e in &diags.errors {
            println!("- [{}] {}:{} {}", e.code, e.line, e.column, e.message);
        }
    }
    for w in &diags.warnings {
        println!("warning [{}] {}:{} {}", w.code, w.line, w.column, w.message);
    }
    if !diags.symbols.is_empty() {
        println!("symbols:");
        for s in &diags.symbols {
            println!("- {:?} {} @{}", s.kind, s.name, s.line);
        }
    }
    if diags.errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn cmd_renum(path: &str, start: u32, step: u32) -> ExitCode {
    let src = match read_source(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let result = formatter::renumber_code(&src, start, step);
    if result.success {
        print!("{}", result.formatted);
        ExitCode::SUCCESS
    } else {
        eprintln!("renumber failed: {}", result.error.unwrap_or_default());
        ExitCode::FAILURE
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        repl::start(repl::Session::new());
        return ExitCode::SUCCESS;
    }
    match args[0].as_str() {
        "-h" | "--help" => {
            print_help();
            ExitCode::SUCCESS
        }
        "--ir" => match args.get(1) {
            Some(path) => cmd_ir(path, true),
            None => {
                eprintln!("usage: boltc --ir <file.bas>");
                ExitCode::FAILURE
            }
        },
        "--ir-bare" => match args.get(1) {
            Some(path) => cmd_ir(path, false),
            None => {
                eprintln!("usage: boltc --ir-bare <file.bas>");
                ExitCode::FAILURE
            }
        },
        "--analyze" => match args.get(1) {
            Some(path) => cmd_analyze(path, false),
            None => {
                eprintln!("usage: boltc --analyze <file.bas>");
                ExitCode::FAILURE
            }
        },
        "--analyze-json" => match args.get(1) {
            Some(path) => cmd_analyze(path, true),
            None => {
                eprintln!("usage: boltc --analyze-json <file.bas>");
                ExitCode::FAILURE
            }
        },
        "--renum" => match args.get(1) {
            Some(path) => {
                let start = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);
                let step = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(10);
                cmd_renum(path, start, step)
            }
            None => {
                eprintln!("usage: boltc --renum <file.bas> [start [step]]");
                ExitCode::FAILURE
            }
        },
        other if other.starts_with('-') => {
            eprintln!("error: unknown option '{}'", other);
            print_help();
            ExitCode::FAILURE
        }
        path => cmd_compile(path),
    }
}
