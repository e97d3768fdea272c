//! Symbol tables produced by the analyzer and consumed by the CFG builder
//! and IR generator. Identifier lookup is case-insensitive: keys are the
//! canonical uppercase form, display names keep the source spelling.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use bolt_ast::Expr;
use bolt_common::{SourceLocation, VariableType};
use bolt_registry::ConstValue;

/// Label ids start here so they can never collide with BASIC line numbers
/// (which are at most 65535 but live in a different key space anyway).
pub const FIRST_LABEL_ID: u32 = 10_000;

pub fn canon(name: &str) -> String {
    name.to_ascii_uppercase()
}

#[derive(Debug, Clone)]
pub struct VariableSymbol {
    pub name: String,
    pub ty: VariableType,
    pub is_declared: bool,
    pub is_used: bool,
    pub first_use: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct ArraySymbol {
    pub name: String,
    pub ty: VariableType,
    /// Slot counts per dimension. `DIM A(10)` stores 11 here: BASIC arrays
    /// include the upper bound.
    pub dimensions: Vec<usize>,
    pub total_size: usize,
    pub declaration: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct FunctionSymbol {
    pub name: String,
    pub params: Vec<String>,
    pub return_type: VariableType,
    /// Owned clone of the body expression for DEF FN (inlined at call
    /// sites); FUNCTION/SUB bodies stay in the Program the generator walks.
    pub body: Option<Expr>,
    pub definition: SourceLocation,
}

impl FunctionSymbol {
    pub fn is_def_fn(&self) -> bool {
        self.body.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct LineNumberSymbol {
    pub line: u32,
    pub program_index: usize,
    pub references: Vec<SourceLocation>,
}

#[derive(Debug, Clone)]
pub struct LabelSymbol {
    pub name: String,
    pub label_id: u32,
    pub program_index: usize,
    pub definition: SourceLocation,
    pub references: Vec<SourceLocation>,
}

#[derive(Debug, Clone)]
pub struct ConstantSymbol {
    pub value: ConstValue,
    /// Index into the constants manager; `LOAD_CONST` uses this.
    pub index: usize,
}

/// Flat DATA pool in source order plus named and numeric restore points.
#[derive(Debug, Clone, Default)]
pub struct DataSegment {
    pub values: Vec<String>,
    pub line_restore_points: BTreeMap<u32, usize>,
    pub label_restore_points: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    pub variables: HashMap<String, VariableSymbol>,
    pub arrays: HashMap<String, ArraySymbol>,
    pub functions: HashMap<String, FunctionSymbol>,
    pub line_numbers: HashMap<u32, LineNumberSymbol>,
    pub labels: HashMap<String, LabelSymbol>,
    pub constants: HashMap<String, ConstantSymbol>,
    pub data_segment: DataSegment,
    pub next_label_id: u32,
    // Compilation flags copied from CompilerOptions, plus event detection.
    pub array_base: u8,
    pub unicode_mode: bool,
    pub error_tracking: bool,
    pub cancellable_loops: bool,
    pub events_used: bool,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            variables: HashMap::new(),
            arrays: HashMap::new(),
            functions: HashMap::new(),
            line_numbers: HashMap::new(),
            labels: HashMap::new(),
            constants: HashMap::new(),
            data_segment: DataSegment::default(),
            next_label_id: FIRST_LABEL_ID,
            array_base: 1,
            unicode_mode: false,
            error_tracking: true,
            cancellable_loops: true,
            events_used: false,
        }
    }

    pub fn lookup_variable(&self, canon_name: &str) -> Option<&VariableSymbol> {
        self.variables.get(canon_name)
    }

    pub fn lookup_array(&self, canon_name: &str) -> Option<&ArraySymbol> {
        self.arrays.get(canon_name)
    }

    /// Function lookup accepts both spellings of a name: the sigil form used
    /// at call sites (`ADD%`) and the normalized form used at definitions
    /// (`ADD_INT`).
    pub fn lookup_function(&self, canon_name: &str) -> Option<&FunctionSymbol> {
        self.functions
            .get(canon_name)
            .or_else(|| self.functions.get(&bolt_common::normalize_name(canon_name)))
    }

    pub fn lookup_line(&self, line: u32) -> Option<&LineNumberSymbol> {
        self.line_numbers.get(&line)
    }

    pub fn lookup_label(&self, canon_name: &str) -> Option<&LabelSymbol> {
        self.labels.get(canon_name)
    }

    pub fn lookup_constant(&self, canon_name: &str) -> Option<&ConstantSymbol> {
        self.constants.get(canon_name)
    }

    /// Single triage point for `IDENT(args)` sites. The validator and the IR
    /// generator both go through here, so they agree by construction:
    /// declared arrays win, then user functions; anything else is left for
    /// builtin/registry/implicit handling at the call site.
    pub fn resolve_callable(&self, canon_name: &str) -> Binding<'_> {
        if let Some(arr) = self.arrays.get(canon_name) {
            return Binding::Array(arr);
        }
        if let Some(f) = self.lookup_function(canon_name) {
            if f.is_def_fn() {
                return Binding::DefFn(f);
            }
            return Binding::Function(f);
        }
        Binding::Unbound
    }

    /// Human-readable symbol table report for the shell's diagnostics.
    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str("=== SYMBOL TABLE ===\n");
        if !self.line_numbers.is_empty() {
            let mut lines: Vec<&LineNumberSymbol> = self.line_numbers.values().collect();
            lines.sort_by_key(|s| s.line);
            let _ = writeln!(out, "Line numbers ({}):", lines.len());
            for s in lines {
                let _ = writeln!(out, "  {} (index {}, {} refs)", s.line, s.program_index, s.references.len());
            }
        }
        if !self.labels.is_empty() {
            let mut labels: Vec<&LabelSymbol> = self.labels.values().collect();
            labels.sort_by_key(|s| s.label_id);
            let _ = writeln!(out, "Labels ({}):", labels.len());
            for s in labels {
                let _ = writeln!(out, "  :{} (id {}, {} refs)", s.name, s.label_id, s.references.len());
            }
        }
        if !self.variables.is_empty() {
            let mut vars: Vec<&VariableSymbol> = self.variables.values().collect();
            vars.sort_by(|a, b| a.name.cmp(&b.name));
            let _ = writeln!(out, "Variables ({}):", vars.len());
            for s in vars {
                let mut flags = String::new();
                if !s.is_declared {
                    flags.push_str(" [implicit]");
                }
                if !s.is_used {
                    flags.push_str(" [unused]");
                }
                let _ = writeln!(out, "  {} : {}{}", s.name, s.ty.name(), flags);
            }
        }
        if !self.arrays.is_empty() {
            let mut arrays: Vec<&ArraySymbol> = self.arrays.values().collect();
            arrays.sort_by(|a, b| a.name.cmp(&b.name));
            let _ = writeln!(out, "Arrays ({}):", arrays.len());
            for s in arrays {
                let dims: Vec<String> = s.dimensions.iter().map(|d| d.to_string()).collect();
                let _ = writeln!(out, "  {}({}) : {} [{} elements]", s.name, dims.join(", "), s.ty.name(), s.total_size);
            }
        }
        if !self.functions.is_empty() {
            let mut funcs: Vec<&FunctionSymbol> = self.functions.values().collect();
            funcs.sort_by(|a, b| a.name.cmp(&b.name));
            let _ = writeln!(out, "Functions ({}):", funcs.len());
            for s in funcs {
                let _ = writeln!(out, "  {}({}) : {}", s.name, s.params.join(", "), s.return_type.name());
            }
        }
        if !self.data_segment.values.is_empty() {
            let _ = writeln!(
                out,
                "Data segment: {} values, {} line restore points, {} label restore points",
                self.data_segment.values.len(),
                self.data_segment.line_restore_points.len(),
                self.data_segment.label_restore_points.len()
            );
        }
        out.push_str("=== END SYMBOL TABLE ===\n");
        out
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Binding<'a> {
    Array(&'a ArraySymbol),
    DefFn(&'a FunctionSymbol),
    Function(&'a FunctionSymbol),
    Unbound,
}
