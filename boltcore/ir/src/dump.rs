//! Target-emitter interface and the reference listing emitter. Every IR
//! instruction maps to one deterministic output line; source-line comments
//! can be switched off for byte-stable output across recompilations.

use crate::IrProgram;

pub struct EmitOptions {
    pub emit_comments: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self { emit_comments: true }
    }
}

/// Consumes an IR program and produces target source text. Emitters add no
/// semantics of their own: runtime facilities are referenced only by the
/// names the command and constants managers expose.
pub trait TargetEmitter {
    fn emit(&self, ir: &IrProgram, opts: &EmitOptions) -> String;
}

/// Textual instruction listing, used by the shell's IR dump and as the
/// reference emitter in tests.
pub struct ListingEmitter;

impl TargetEmitter for ListingEmitter {
    fn emit(&self, ir: &IrProgram, opts: &EmitOptions) -> String {
        let mut out = String::new();
        if opts.emit_comments {
            out.push_str(&format!(
                "; {} instructions, {} labels, {} blocks\n",
                ir.len(),
                ir.label_count,
                ir.block_count
            ));
            for (line, addr) in &ir.line_to_address {
                out.push_str(&format!("; line {:>5} -> {:04}\n", line, addr));
            }
        }
        for (i, instr) in ir.instructions.iter().enumerate() {
            if opts.emit_comments && instr.source_line > 0 {
                out.push_str(&format!("[L{:>4}] ", instr.source_line));
            }
            out.push_str(&format!("{:04}: {}\n", i, ir.render_instruction(instr)));
        }
        out
    }
}
