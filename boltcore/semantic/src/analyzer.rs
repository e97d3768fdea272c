/*
Bolt BASIC — semantic analyzer

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

use std::collections::HashMap;

use bolt_ast::{
    BinOp, Expr, ExprKind, JumpTarget, Program, Stmt, StmtKind, UnaryOp, WhenClause,
};
use bolt_common::{
    type_from_name, CompilerOptions, Diagnostic, ReturnType, SourceLocation, Stage, VariableType,
};
use bolt_registry::{CommandRegistry, ConstValue, ConstantsManager, EventType};

use crate::consteval::{evaluate_const_expr, EvalNote};
use crate::symbols::{
    canon, ArraySymbol, Binding, ConstantSymbol, FunctionSymbol, LabelSymbol, LineNumberSymbol,
    SymbolTable, VariableSymbol,
};

/// Two-pass semantic analyzer. Owns the constants manager until code
/// emission; the IR generator reads constant indices out of the symbol
/// table and the emitter reads values back by index.
pub struct SemanticAnalyzer<'r> {
    registry: &'r CommandRegistry,
    symbols: SymbolTable,
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
    constants: ConstantsManager,
    /// Constant symbols that survive `analyze` resets: predefined plus
    /// host-injected.
    base_constants: HashMap<String, ConstantSymbol>,
    /// DATA labels registered by a preprocessor, applied during pass 1 so
    /// RESTORE can find them.
    pending_data_labels: Vec<(String, u32)>,
    builtins: HashMap<String, i32>,
    strict_mode: bool,
    warn_unused: bool,
    explicit_mode: bool,
    for_stack: Vec<(String, SourceLocation)>,
    while_stack: Vec<SourceLocation>,
    repeat_stack: Vec<SourceLocation>,
    do_stack: Vec<SourceLocation>,
}

impl<'r> SemanticAnalyzer<'r> {
    pub fn new(registry: &'r CommandRegistry) -> Self {
        let mut constants = ConstantsManager::new();
        constants.add_predefined();
        let mut base_constants = HashMap::new();
        for name in constants.names() {
            if let Some(idx) = constants.index_of(&name) {
                if let Some(value) = constants.get(idx) {
                    base_constants.insert(name.clone(), ConstantSymbol { value: value.clone(), index: idx });
                }
            }
        }
        let mut builtins = HashMap::new();
        init_builtins(&mut builtins);
        for def in registry.iter() {
            let key = canon(&def.name);
            builtins.entry(key).or_insert(def.required_param_count() as i32);
        }
        let mut symbols = SymbolTable::new();
        symbols.constants = base_constants.clone();
        Self {
            registry,
            symbols,
            errors: Vec::new(),
            warnings: Vec::new(),
            constants,
            base_constants,
            pending_data_labels: Vec::new(),
            builtins,
            strict_mode: false,
            warn_unused: true,
            explicit_mode: false,
            for_stack: Vec::new(),
            while_stack: Vec::new(),
            repeat_stack: Vec::new(),
            do_stack: Vec::new(),
        }
    }

    pub fn set_strict_mode(&mut self, strict: bool) {
        self.strict_mode = strict;
    }

    pub fn set_warn_unused(&mut self, warn: bool) {
        self.warn_unused = warn;
    }

    /// Host-injected constants behave exactly like CONSTANT statements and
    /// survive re-analysis.
    pub fn inject_runtime_constant(&mut self, name: &str, value: ConstValue) {
        let key = canon(name);
        let index = self.constants.add(&key, value.clone());
        let sym = ConstantSymbol { value, index };
        self.base_constants.insert(key.clone(), sym.clone());
        self.symbols.constants.insert(key, sym);
    }

    /// Register DATA labels discovered outside the program text so RESTORE
    /// can target them.
    pub fn register_data_labels<I: IntoIterator<Item = (String, u32)>>(&mut self, labels: I) {
        self.pending_data_labels.extend(labels);
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn constants(&self) -> &ConstantsManager {
        &self.constants
    }

    pub fn take_constants(&mut self) -> ConstantsManager {
        let mut out = ConstantsManager::new();
        out.copy_from(&self.constants);
        out
    }

    /// Run both passes. Returns true when no errors were produced.
    pub fn analyze(&mut self, program: &Program, options: &CompilerOptions) -> bool {
        self.errors.clear();
        self.warnings.clear();
        self.for_stack.clear();
        self.while_stack.clear();
        self.repeat_stack.clear();
        self.do_stack.clear();

        self.symbols = SymbolTable::new();
        self.symbols.constants = self.base_constants.clone();
        self.symbols.array_base = options.array_base;
        self.symbols.unicode_mode = options.unicode_mode;
        self.symbols.error_tracking = options.error_tracking;
        self.symbols.cancellable_loops = options.cancellable_loops;
        self.explicit_mode = options.explicit_mode;

        self.pass1_collect_declarations(program, options);
        self.pass2_validate(program, options);
        self.validate_control_flow();
        if self.warn_unused {
            self.check_unused_variables();
        }
        self.errors.is_empty()
    }

    // ---- pass 1: declaration collection -----------------------------------

    fn pass1_collect_declarations(&mut self, program: &Program, options: &CompilerOptions) {
        self.collect_line_numbers(program);
        self.collect_labels(program);
        self.apply_pending_data_labels();
        self.collect_constants(program);
        self.collect_dims(program);
        self.collect_def_fns(program);
        self.check_def_fn_cycles();
        self.collect_functions_and_subs(program);
        self.collect_data(program);
        let _ = options;
    }

    fn collect_line_numbers(&mut self, program: &Program) {
        for (i, line) in program.lines.iter().enumerate() {
            if line.number == 0 {
                continue;
            }
            if self.symbols.line_numbers.contains_key(&line.number) {
                self.error(
                    "DUPLICATE_LINE_NUMBER",
                    format!("duplicate line number: {}", line.number),
                    line.loc,
                );
                continue;
            }
            self.symbols.line_numbers.insert(
                line.number,
                LineNumberSymbol { line: line.number, program_index: i, references: Vec::new() },
            );
        }
    }

    fn collect_labels(&mut self, program: &Program) {
        for (i, line) in program.lines.iter().enumerate() {
            for stmt in &line.stmts {
                if let StmtKind::Label { name } = &stmt.kind {
                    self.declare_label(name, i, stmt.loc);
                }
            }
        }
    }

    fn declare_label(&mut self, name: &str, program_index: usize, loc: SourceLocation) {
        let key = canon(name);
        if self.symbols.labels.contains_key(&key) {
            self.error("DUPLICATE_LABEL", format!("label :{} already defined", name), loc);
            return;
        }
        let label_id = self.symbols.next_label_id;
        self.symbols.next_label_id += 1;
        self.symbols.labels.insert(
            key,
            LabelSymbol {
                name: name.to_string(),
                label_id,
                program_index,
                definition: loc,
                references: Vec::new(),
            },
        );
    }

    fn apply_pending_data_labels(&mut self) {
        let pending = std::mem::take(&mut self.pending_data_labels);
        for (name, line) in pending {
            let key = canon(&name);
            if self.symbols.labels.contains_key(&key) {
                continue;
            }
            let label_id = self.symbols.next_label_id;
            self.symbols.next_label_id += 1;
            self.symbols.labels.insert(
                key,
                LabelSymbol {
                    name,
                    label_id,
                    program_index: 0,
                    definition: SourceLocation::new(line, 0),
                    references: Vec::new(),
                },
            );
        }
    }

    fn collect_constants(&mut self, program: &Program) {
        for line in &program.lines {
            for stmt in &line.stmts {
                if let StmtKind::Constant { name, value } = &stmt.kind {
                    self.process_constant(name, value, stmt.loc);
                }
            }
        }
    }

    fn process_constant(&mut self, name: &str, value: &Expr, loc: SourceLocation) {
        let key = canon(name);
        if self.symbols.constants.contains_key(&key) {
            self.error("DUPLICATE_CONSTANT", format!("constant {} already declared", name), loc);
            return;
        }
        let folded = self.fold_constant(value);
        let index = self.constants.add(&key, folded.clone());
        self.symbols.constants.insert(key, ConstantSymbol { value: folded, index });
    }

    /// Evaluate a constant expression, reporting failures as diagnostics.
    /// Failures fold to integer zero so later stages still see an index.
    fn fold_constant(&mut self, expr: &Expr) -> ConstValue {
        let mut notes: Vec<EvalNote> = Vec::new();
        let result = evaluate_const_expr(expr, &self.symbols, &mut notes);
        if self.strict_mode {
            for n in notes {
                self.warning(n.code, n.message, n.location);
            }
        }
        match result {
            Ok(v) => v,
            Err(n) => {
                self.error(n.code, n.message, n.location);
                ConstValue::Int(0)
            }
        }
    }

    fn collect_dims(&mut self, program: &Program) {
        for line in &program.lines {
            for stmt in &line.stmts {
                if let StmtKind::Dim { arrays } = &stmt.kind {
                    for decl in arrays {
                        self.process_dim(&decl.name, &decl.dims, decl.loc);
                    }
                }
            }
        }
    }

    fn process_dim(&mut self, name: &str, dims: &[Expr], loc: SourceLocation) {
        let key = canon(name);
        if self.symbols.arrays.contains_key(&key) {
            self.error("ARRAY_REDECLARED", format!("array '{}' already declared", name), loc);
            return;
        }
        let mut dimensions = Vec::with_capacity(dims.len());
        let mut total_size = 1usize;
        for dim in dims {
            let mut notes = Vec::new();
            match evaluate_const_expr(dim, &self.symbols, &mut notes) {
                Ok(v) if v.is_numeric() => {
                    let bound = v.as_int();
                    let slots = if bound <= 0 {
                        self.error(
                            "INVALID_ARRAY_INDEX",
                            "array dimension must be positive".to_string(),
                            loc,
                        );
                        2
                    } else {
                        // DIM A(N) holds indices 0..=N: N+1 slots.
                        bound as usize + 1
                    };
                    dimensions.push(slots);
                    total_size *= slots;
                }
                _ => {
                    // Non-constant bound: default to 10, 11 slots.
                    dimensions.push(11);
                    total_size *= 11;
                    self.warning(
                        "NON_CONSTANT_DIM",
                        "non-constant array dimension; assuming 10".to_string(),
                        loc,
                    );
                }
            }
        }
        let ty = type_from_name(&key, self.symbols.unicode_mode);
        self.symbols.arrays.insert(
            key,
            ArraySymbol { name: name.to_string(), ty, dimensions, total_size, declaration: loc },
        );
    }

    fn collect_def_fns(&mut self, program: &Program) {
        for line in &program.lines {
            for stmt in &line.stmts {
                if let StmtKind::DefFn { name, params, body } = &stmt.kind {
                    let key = canon(name);
                    if self.symbols.functions.contains_key(&key) {
                        self.error(
                            "FUNCTION_REDECLARED",
                            format!("function FN {} already declared", name),
                            stmt.loc,
                        );
                        continue;
                    }
                    let return_type = type_from_name(&key, self.symbols.unicode_mode);
                    self.symbols.functions.insert(
                        key,
                        FunctionSymbol {
                            name: name.clone(),
                            params: params.iter().map(|p| canon(p)).collect(),
                            return_type,
                            body: Some((**body).clone()),
                            definition: stmt.loc,
                        },
                    );
                }
            }
        }
    }

    /// Inlining DEF FN bodies terminates only when the call graph between
    /// them is acyclic; reject any cycle up front.
    fn check_def_fn_cycles(&mut self) {
        fn callees(expr: &Expr, out: &mut Vec<String>) {
            match &expr.kind {
                ExprKind::ArrayAccess { name, indices } => {
                    out.push(canon(name));
                    for i in indices {
                        callees(i, out);
                    }
                }
                ExprKind::FunctionCall { name, args, .. } => {
                    out.push(canon(name));
                    for a in args {
                        callees(a, out);
                    }
                }
                ExprKind::RegistryCall { args, .. } => {
                    for a in args {
                        callees(a, out);
                    }
                }
                ExprKind::Unary { expr, .. } => callees(expr, out),
                ExprKind::Binary { lhs, rhs, .. } => {
                    callees(lhs, out);
                    callees(rhs, out);
                }
                ExprKind::Iif { cond, then_value, else_value } => {
                    callees(cond, out);
                    callees(then_value, out);
                    callees(else_value, out);
                }
                _ => {}
            }
        }

        let graph: HashMap<String, Vec<String>> = self
            .symbols
            .functions
            .iter()
            .filter(|(_, f)| f.is_def_fn())
            .map(|(name, f)| {
                let mut out = Vec::new();
                if let Some(body) = &f.body {
                    callees(body, &mut out);
                }
                (name.clone(), out)
            })
            .collect();

        fn dfs(
            node: &str,
            graph: &HashMap<String, Vec<String>>,
            visiting: &mut Vec<String>,
            done: &mut Vec<String>,
        ) -> bool {
            if done.iter().any(|n| n == node) {
                return false;
            }
            if visiting.iter().any(|n| n == node) {
                return true;
            }
            visiting.push(node.to_string());
            if let Some(next) = graph.get(node) {
                for n in next {
                    if graph.contains_key(n) && dfs(n, graph, visiting, done) {
                        return true;
                    }
                }
            }
            visiting.pop();
            done.push(node.to_string());
            false
        }

        let mut cyclic = Vec::new();
        let mut done = Vec::new();
        for name in graph.keys() {
            let mut visiting = Vec::new();
            if dfs(name, &graph, &mut visiting, &mut done) {
                cyclic.push(name.clone());
            }
        }
        cyclic.sort();
        for name in cyclic {
            let loc = self.symbols.functions.get(&name).map(|f| f.definition).unwrap_or_default();
            self.error(
                "DEF_FN_CYCLE",
                format!("DEF FN {} participates in a recursive cycle", name),
                loc,
            );
        }
    }

    fn collect_functions_and_subs(&mut self, program: &Program) {
        for line in &program.lines {
            for stmt in &line.stmts {
                match &stmt.kind {
                    StmtKind::Function { name, params, .. } => {
                        let key = canon(name);
                        if self.symbols.functions.contains_key(&key) {
                            self.error(
                                "FUNCTION_REDECLARED",
                                format!("function {} already declared", name),
                                stmt.loc,
                            );
                            continue;
                        }
                        let return_type = type_from_name(&key, self.symbols.unicode_mode);
                        self.symbols.functions.insert(
                            key,
                            FunctionSymbol {
                                name: name.clone(),
                                params: params.iter().map(|p| canon(p)).collect(),
                                return_type,
                                body: None,
                                definition: stmt.loc,
                            },
                        );
                    }
                    StmtKind::Sub { name, params, .. } => {
                        let key = canon(name);
                        if self.symbols.functions.contains_key(&key) {
                            self.error(
                                "FUNCTION_REDECLARED",
                                format!("subroutine {} already declared", name),
                                stmt.loc,
                            );
                            continue;
                        }
                        self.symbols.functions.insert(
                            key,
                            FunctionSymbol {
                                name: name.clone(),
                                params: params.iter().map(|p| canon(p)).collect(),
                                return_type: VariableType::Void,
                                body: None,
                                definition: stmt.loc,
                            },
                        );
                    }
                    _ => {}
                }
            }
        }
    }

    fn collect_data(&mut self, program: &Program) {
        // A label on the DATA line, or alone on the immediately preceding
        // line, names a restore point for that DATA run.
        let mut pending_label: Option<String> = None;
        for line in &program.lines {
            let mut line_label: Option<String> = None;
            let mut has_data = false;
            for stmt in &line.stmts {
                match &stmt.kind {
                    StmtKind::Label { name } => line_label = Some(name.clone()),
                    StmtKind::Data { .. } => has_data = true,
                    _ => {}
                }
            }
            if has_data {
                let effective = line_label.or(pending_label.take());
                let mut first = true;
                for stmt in &line.stmts {
                    if let StmtKind::Data { values } = &stmt.kind {
                        let start = self.symbols.data_segment.values.len();
                        if first {
                            if line.number > 0 {
                                self.symbols.data_segment.line_restore_points.insert(line.number, start);
                            }
                            if let Some(label) = &effective {
                                self.symbols
                                    .data_segment
                                    .label_restore_points
                                    .insert(canon(label), start);
                            }
                            first = false;
                        }
                        self.symbols.data_segment.values.extend(values.iter().cloned());
                    }
                }
            } else if line_label.is_some() && line.stmts.len() == 1 {
                pending_label = line_label;
            } else {
                pending_label = None;
            }
        }
    }

    // ---- pass 2: validation and type inference ----------------------------

    fn pass2_validate(&mut self, program: &Program, options: &CompilerOptions) {
        for line in &program.lines {
            for stmt in &line.stmts {
                self.validate_stmt(stmt, options);
            }
        }
    }

    fn validate_stmt(&mut self, stmt: &Stmt, options: &CompilerOptions) {
        let loc = stmt.loc;
        match &stmt.kind {
            StmtKind::Print { items, using_fmt, using_values, .. } => {
                for item in items {
                    self.infer_expr(&item.expr);
                }
                if let Some(fmt) = using_fmt {
                    self.infer_expr(fmt);
                }
                for v in using_values {
                    self.infer_expr(v);
                }
            }
            StmtKind::Console { items, .. } => {
                for item in items {
                    self.infer_expr(&item.expr);
                }
            }
            StmtKind::PrintAt { x, y, items, using_fmt, using_values, fg, bg } => {
                self.require_numeric(x, "PRINT AT coordinate");
                self.require_numeric(y, "PRINT AT coordinate");
                for item in items {
                    self.infer_expr(&item.expr);
                }
                if let Some(fmt) = using_fmt {
                    self.infer_expr(fmt);
                }
                for v in using_values {
                    self.infer_expr(v);
                }
                if let Some(e) = fg {
                    self.require_numeric(e, "PRINT AT color");
                }
                if let Some(e) = bg {
                    self.require_numeric(e, "PRINT AT color");
                }
            }
            StmtKind::Input { vars, .. } => {
                for v in vars {
                    self.use_variable(v, loc);
                }
            }
            StmtKind::InputAt { x, y, var, .. } => {
                self.require_numeric(x, "INPUT AT coordinate");
                self.require_numeric(y, "INPUT AT coordinate");
                self.use_variable(var, loc);
            }
            StmtKind::Let { variable, indices, value } => {
                for index in indices {
                    self.require_numeric(index, "array index");
                }
                let target_type = if indices.is_empty() {
                    self.use_variable(variable, loc);
                    self.symbols
                        .lookup_variable(&canon(variable))
                        .map(|s| s.ty)
                        .unwrap_or(VariableType::Unknown)
                } else {
                    self.use_array(variable, indices.len(), loc, options);
                    self.symbols
                        .lookup_array(&canon(variable))
                        .map(|s| s.ty)
                        .unwrap_or(VariableType::Unknown)
                };
                let value_type = self.infer_expr(value);
                self.check_type_compatibility(target_type, value_type, loc, "assignment");
            }
            StmtKind::MidAssign { variable, position, length, replacement } => {
                self.use_variable(variable, loc);
                let target = self
                    .symbols
                    .lookup_variable(&canon(variable))
                    .map(|s| s.ty)
                    .unwrap_or(VariableType::Unknown);
                if target != VariableType::Unknown && !target.is_string() {
                    self.error(
                        "TYPE_MISMATCH",
                        format!("MID$ target '{}' must be a string", variable),
                        loc,
                    );
                }
                self.require_numeric(position, "MID$ position");
                self.require_numeric(length, "MID$ length");
                let rep = self.infer_expr(replacement);
                if rep != VariableType::Unknown && !rep.is_string() {
                    self.error("TYPE_MISMATCH", "MID$ replacement must be a string".to_string(), loc);
                }
            }
            StmtKind::If { cond, goto_line, then_stmts, elseifs, else_stmts } => {
                self.infer_expr(cond);
                if let Some(n) = goto_line {
                    self.verify_line_target(*n, loc, "IF THEN");
                }
                for s in then_stmts {
                    self.validate_stmt(s, options);
                }
                for clause in elseifs {
                    self.infer_expr(&clause.cond);
                    for s in &clause.stmts {
                        self.validate_stmt(s, options);
                    }
                }
                for s in else_stmts {
                    self.validate_stmt(s, options);
                }
            }
            StmtKind::Case { selector, whens, otherwise } => {
                self.infer_expr(selector);
                for WhenClause { values, stmts } in whens {
                    for v in values {
                        self.infer_expr(v);
                    }
                    for s in stmts {
                        self.validate_stmt(s, options);
                    }
                }
                for s in otherwise {
                    self.validate_stmt(s, options);
                }
            }
            StmtKind::For { variable, start, end, step } => {
                self.use_variable(variable, loc);
                let start_t = self.infer_expr(start);
                let end_t = self.infer_expr(end);
                if let Some(s) = step {
                    self.require_numeric(s, "FOR step");
                }
                if !type_is_numeric_or_unknown(start_t) || !type_is_numeric_or_unknown(end_t) {
                    self.error("TYPE_MISMATCH", "FOR loop bounds must be numeric".to_string(), loc);
                }
                self.for_stack.push((canon(variable), loc));
            }
            StmtKind::ForIn { variable, index_variable, array } => {
                self.use_variable(variable, loc);
                if let Some(idx) = index_variable {
                    self.use_variable(idx, loc);
                }
                self.infer_expr(array);
                self.for_stack.push((canon(variable), loc));
            }
            StmtKind::Next { variable } => match self.for_stack.pop() {
                None => {
                    self.error("NEXT_WITHOUT_FOR", "NEXT without matching FOR".to_string(), loc);
                }
                Some((open_var, _)) => {
                    if let Some(v) = variable {
                        if canon(v) != open_var {
                            self.error(
                                "CONTROL_FLOW_MISMATCH",
                                format!(
                                    "NEXT variable '{}' does not match FOR variable '{}'",
                                    v, open_var
                                ),
                                loc,
                            );
                        }
                    }
                }
            },
            StmtKind::While { cond } => {
                self.infer_expr(cond);
                self.while_stack.push(loc);
            }
            StmtKind::Wend => {
                if self.while_stack.pop().is_none() {
                    self.error("WEND_WITHOUT_WHILE", "WEND without matching WHILE".to_string(), loc);
                }
            }
            StmtKind::Repeat => self.repeat_stack.push(loc),
            StmtKind::Until { cond } => {
                if self.repeat_stack.pop().is_none() {
                    self.error(
                        "UNTIL_WITHOUT_REPEAT",
                        "UNTIL without matching REPEAT".to_string(),
                        loc,
                    );
                }
                self.infer_expr(cond);
            }
            StmtKind::Do { cond, .. } => {
                if let Some(c) = cond {
                    self.infer_expr(c);
                }
                self.do_stack.push(loc);
            }
            StmtKind::Loop { cond, .. } => {
                if self.do_stack.pop().is_none() {
                    self.error("LOOP_WITHOUT_DO", "LOOP without matching DO".to_string(), loc);
                }
                if let Some(c) = cond {
                    self.infer_expr(c);
                }
            }
            StmtKind::Exit(_) => {}
            StmtKind::Goto { target } | StmtKind::Gosub { target } => {
                self.verify_jump_target(target, loc);
            }
            StmtKind::OnGoto { selector, targets } | StmtKind::OnGosub { selector, targets } => {
                self.require_numeric(selector, "ON selector");
                for t in targets {
                    self.verify_jump_target(t, loc);
                }
            }
            StmtKind::OnCall { selector, functions } => {
                self.require_numeric(selector, "ON selector");
                for f in functions {
                    if self.symbols.lookup_function(&canon(f)).is_none() {
                        self.warning(
                            "UNRESOLVED_HANDLER",
                            format!("function '{}' not found for ON ... CALL handler", f),
                            loc,
                        );
                    }
                }
            }
            StmtKind::OnEvent { event, handler, target, is_line_number } => {
                self.symbols.events_used = true;
                if EventType::from_name(event).is_none() {
                    self.error("UNKNOWN_EVENT", format!("unknown event name: {}", event), loc);
                    return;
                }
                match handler {
                    bolt_ast::EventHandlerKind::Call => {
                        if self.symbols.lookup_function(&canon(target)).is_none() {
                            // Could be defined later in the session.
                            self.warning(
                                "UNRESOLVED_HANDLER",
                                format!("function '{}' not found for event handler", target),
                                loc,
                            );
                        }
                    }
                    bolt_ast::EventHandlerKind::Goto | bolt_ast::EventHandlerKind::Gosub => {
                        if *is_line_number {
                            match target.parse::<u32>() {
                                Ok(n) => self.verify_line_target(n, loc, "event handler"),
                                Err(_) => self.error(
                                    "UNDEFINED_LINE",
                                    format!("invalid line number: {}", target),
                                    loc,
                                ),
                            }
                        } else if self.symbols.lookup_label(&canon(target)).is_none() {
                            self.error(
                                "UNDEFINED_LABEL",
                                format!("label '{}' not found for event handler", target),
                                loc,
                            );
                        }
                    }
                }
            }
            StmtKind::Return { value } => {
                if let Some(v) = value {
                    self.infer_expr(v);
                }
            }
            StmtKind::Dim { .. } => {}
            StmtKind::DefFn { .. } => {}
            StmtKind::Function { name: _, params, body } | StmtKind::Sub { name: _, params, body } => {
                for p in params {
                    let key = canon(p);
                    let ty = type_from_name(&key, self.symbols.unicode_mode);
                    self.symbols.variables.entry(key).or_insert(VariableSymbol {
                        name: p.clone(),
                        ty,
                        is_declared: true,
                        is_used: true,
                        first_use: loc,
                    });
                }
                for s in body {
                    self.validate_stmt(s, options);
                }
            }
            StmtKind::Call { name, args } => {
                let key = canon(name);
                let found = self.symbols.lookup_function(&key).map(|f| f.params.len());
                match found {
                    Some(expected) => {
                        if args.len() != expected {
                            self.error(
                                "WRONG_ARGUMENT_COUNT",
                                format!(
                                    "subroutine {} expects {} argument(s), got {}",
                                    name,
                                    expected,
                                    args.len()
                                ),
                                loc,
                            );
                        }
                    }
                    None => {
                        self.error("UNDEFINED_FUNCTION", format!("undefined subroutine: {}", name), loc);
                    }
                }
                for a in args {
                    self.infer_expr(a);
                }
            }
            StmtKind::Label { .. } | StmtKind::Data { .. } | StmtKind::Rem | StmtKind::End => {}
            StmtKind::Read { vars } => {
                for v in vars {
                    self.use_variable(v, loc);
                }
            }
            StmtKind::Restore { target } => {
                // RESTORE may target DATA labels resolved at runtime, so
                // unknown targets are not errors.
                let resolved = match target {
                    None => true,
                    Some(JumpTarget::Line(n)) => {
                        self.symbols.lookup_line(*n).is_some()
                            || self.symbols.data_segment.line_restore_points.contains_key(n)
                    }
                    Some(JumpTarget::Label(l)) => {
                        let key = canon(l);
                        self.symbols.lookup_label(&key).is_some()
                            || self.symbols.data_segment.label_restore_points.contains_key(&key)
                    }
                };
                if !resolved && self.strict_mode {
                    self.warning(
                        "RESTORE_UNRESOLVED",
                        "RESTORE target not resolved at compile time".to_string(),
                        loc,
                    );
                }
            }
            StmtKind::Open { .. } | StmtKind::Close { .. } => {}
            StmtKind::Constant { .. } => {}
            StmtKind::Play { filename, wav_output, slot, .. } => {
                self.infer_expr(filename);
                if let Some(e) = wav_output {
                    self.infer_expr(e);
                }
                if let Some(e) = slot {
                    self.require_numeric(e, "PLAY slot");
                }
            }
            StmtKind::PlaySound { sound_id, volume, cap_duration } => {
                self.require_numeric(sound_id, "PLAY_SOUND id");
                self.require_numeric(volume, "PLAY_SOUND volume");
                if let Some(e) = cap_duration {
                    self.require_numeric(e, "PLAY_SOUND duration");
                }
            }
            StmtKind::Command { name, args } => {
                if let Some(def) = self.registry.get(name) {
                    let required = def.required_param_count();
                    let total = def.param_count();
                    if args.len() < required || args.len() > total {
                        self.error(
                            "WRONG_ARGUMENT_COUNT",
                            format!(
                                "{} expects {} argument(s), got {}",
                                name,
                                total,
                                args.len()
                            ),
                            loc,
                        );
                    }
                }
                for a in args {
                    self.infer_expr(a);
                }
            }
            StmtKind::SimpleCommand { name } => {
                if let Some(def) = self.registry.get(name) {
                    if def.required_param_count() > 0 {
                        self.error(
                            "WRONG_ARGUMENT_COUNT",
                            format!("{} expects {} argument(s), got 0", name, def.param_count()),
                            loc,
                        );
                    }
                }
            }
        }
    }

    // ---- expression type inference ----------------------------------------

    fn infer_expr(&mut self, expr: &Expr) -> VariableType {
        match &expr.kind {
            ExprKind::Number(_) => VariableType::Float,
            ExprKind::Str(_) => self.string_type(),
            ExprKind::Var(name) => {
                let key = canon(name);
                if let Some(c) = self.symbols.lookup_constant(&key) {
                    return match c.value {
                        ConstValue::Int(_) => VariableType::Int,
                        ConstValue::Num(_) => VariableType::Double,
                        ConstValue::Str(_) => self.string_type(),
                    };
                }
                self.use_variable(name, expr.loc);
                self.symbols.lookup_variable(&key).map(|s| s.ty).unwrap_or(VariableType::Unknown)
            }
            ExprKind::ArrayAccess { name, indices } => self.infer_ident_args(name, indices, expr.loc),
            ExprKind::FunctionCall { name, args, .. } => {
                for a in args {
                    self.infer_expr(a);
                }
                let key = canon(name);
                let found = self.symbols.lookup_function(&key).map(|f| (f.params.len(), f.return_type));
                match found {
                    Some((expected, ty)) => {
                        if args.len() != expected {
                            self.error(
                                "WRONG_ARGUMENT_COUNT",
                                format!(
                                    "function {} expects {} argument(s), got {}",
                                    name,
                                    expected,
                                    args.len()
                                ),
                                expr.loc,
                            );
                        }
                        ty
                    }
                    None => {
                        self.error("UNDEFINED_FUNCTION", format!("undefined function FN {}", name), expr.loc);
                        VariableType::Unknown
                    }
                }
            }
            ExprKind::RegistryCall { name, args, return_type } => {
                for a in args {
                    self.infer_expr(a);
                }
                if let Some(def) = self.registry.get(name) {
                    let required = def.required_param_count();
                    let total = def.param_count();
                    if args.len() < required || args.len() > total {
                        self.error(
                            "WRONG_ARGUMENT_COUNT",
                            format!("{} expects {} argument(s), got {}", name, total, args.len()),
                            expr.loc,
                        );
                    }
                }
                self.map_return_type(*return_type)
            }
            ExprKind::Unary { op, expr: inner } => {
                let t = self.infer_expr(inner);
                match op {
                    UnaryOp::Not => VariableType::Float,
                    _ => t,
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let left = self.infer_expr(lhs);
                let right = self.infer_expr(rhs);
                if *op == BinOp::Add && (left.is_string() || right.is_string()) {
                    return if left == VariableType::Unicode || right == VariableType::Unicode {
                        VariableType::Unicode
                    } else {
                        VariableType::Str
                    };
                }
                match op {
                    BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
                    | BinOp::And | BinOp::Or | BinOp::Xor => VariableType::Float,
                    _ => promote_types(left, right),
                }
            }
            ExprKind::Iif { cond, then_value, else_value } => {
                self.infer_expr(cond);
                let t = self.infer_expr(then_value);
                let f = self.infer_expr(else_value);
                promote_types(t, f)
            }
        }
    }

    /// `IDENT(args)` triage: declared array, then user function, then core
    /// builtin, then registry function; otherwise an implicit array.
    fn infer_ident_args(&mut self, name: &str, args: &[Expr], loc: SourceLocation) -> VariableType {
        let key = canon(name);
        enum R {
            Array { ty: VariableType, dims: usize },
            Func { ty: VariableType, params: usize },
            Unbound,
        }
        let resolved = match self.symbols.resolve_callable(&key) {
            Binding::Array(a) => R::Array { ty: a.ty, dims: a.dimensions.len() },
            Binding::DefFn(f) | Binding::Function(f) => {
                R::Func { ty: f.return_type, params: f.params.len() }
            }
            Binding::Unbound => R::Unbound,
        };
        match resolved {
            R::Array { ty, dims } => {
                if args.len() != dims {
                    self.error(
                        "WRONG_DIMENSION_COUNT",
                        format!("array '{}' expects {} dimension(s), got {}", name, dims, args.len()),
                        loc,
                    );
                }
                for index in args {
                    self.require_numeric(index, "array index");
                }
                ty
            }
            R::Func { ty, params } => {
                if args.len() != params {
                    self.error(
                        "WRONG_ARGUMENT_COUNT",
                        format!("function {} expects {} argument(s), got {}", name, params, args.len()),
                        loc,
                    );
                }
                for a in args {
                    self.infer_expr(a);
                }
                ty
            }
            R::Unbound => {
                if let Some(&argc) = self.builtins.get(&key) {
                    if argc >= 0 && args.len() != argc as usize {
                        self.error(
                            "WRONG_ARGUMENT_COUNT",
                            format!(
                                "built-in function {} expects {} argument(s), got {}",
                                name, argc, args.len()
                            ),
                            loc,
                        );
                    }
                    for a in args {
                        self.infer_expr(a);
                    }
                    return self.builtin_return_type(&key);
                }
                // Implicit array reference.
                for index in args {
                    self.require_numeric(index, "array index");
                }
                self.error_if_explicit(name, loc);
                VariableType::Unknown
            }
        }
    }

    fn error_if_explicit(&mut self, name: &str, loc: SourceLocation) {
        if self.explicit_mode {
            self.error(
                "ARRAY_NOT_DECLARED",
                format!("array '{}' used without DIM declaration", name),
                loc,
            );
        }
    }

    fn use_variable(&mut self, name: &str, loc: SourceLocation) {
        let key = canon(name);
        if self.symbols.constants.contains_key(&key) {
            return;
        }
        let unicode = self.symbols.unicode_mode;
        let entry = self.symbols.variables.entry(key.clone()).or_insert_with(|| VariableSymbol {
            name: name.to_string(),
            ty: type_from_name(&key, unicode),
            is_declared: false,
            is_used: false,
            first_use: loc,
        });
        entry.is_used = true;
    }

    fn use_array(&mut self, name: &str, dims: usize, loc: SourceLocation, _options: &CompilerOptions) {
        let key = canon(name);
        if self.symbols.lookup_function(&key).is_some() {
            return;
        }
        match self.symbols.arrays.get(&key) {
            None => self.error_if_explicit(name, loc),
            Some(sym) => {
                let expected = sym.dimensions.len();
                if dims != expected {
                    self.error(
                        "WRONG_DIMENSION_COUNT",
                        format!("array '{}' expects {} dimension(s), got {}", name, expected, dims),
                        loc,
                    );
                }
            }
        }
    }

    fn require_numeric(&mut self, expr: &Expr, what: &str) {
        let t = self.infer_expr(expr);
        if !type_is_numeric_or_unknown(t) {
            self.error("TYPE_MISMATCH", format!("{} must be numeric", what), expr.loc);
        }
    }

    fn check_type_compatibility(
        &mut self,
        expected: VariableType,
        actual: VariableType,
        loc: SourceLocation,
        context: &str,
    ) {
        if expected == VariableType::Unknown || actual == VariableType::Unknown {
            return;
        }
        if expected.is_string() != actual.is_string() {
            self.error(
                "TYPE_MISMATCH",
                format!(
                    "type mismatch in {}: cannot assign {} to {}",
                    context,
                    actual.name(),
                    expected.name()
                ),
                loc,
            );
        }
    }

    fn string_type(&self) -> VariableType {
        if self.symbols.unicode_mode {
            VariableType::Unicode
        } else {
            VariableType::Str
        }
    }

    fn map_return_type(&mut self, rt: ReturnType) -> VariableType {
        match rt {
            ReturnType::Int | ReturnType::Bool => VariableType::Int,
            ReturnType::Float => VariableType::Float,
            ReturnType::Str => self.string_type(),
            // Void builtins used in value position: the runtime pushes a
            // placeholder integer.
            ReturnType::Void => VariableType::Int,
        }
    }

    fn builtin_return_type(&self, key: &str) -> VariableType {
        if key.ends_with('$') {
            return self.string_type();
        }
        match key {
            "LEN" | "ASC" | "INSTR" | "EOF" | "LOC" | "LOF" => VariableType::Int,
            _ => {
                if let Some(def) = self.registry.get(key) {
                    let rt = def.return_type;
                    return match rt {
                        ReturnType::Int | ReturnType::Bool | ReturnType::Void => VariableType::Int,
                        ReturnType::Float => VariableType::Float,
                        ReturnType::Str => {
                            if self.symbols.unicode_mode {
                                VariableType::Unicode
                            } else {
                                VariableType::Str
                            }
                        }
                    };
                }
                VariableType::Float
            }
        }
    }

    // ---- jump target verification ------------------------------------------

    fn verify_jump_target(&mut self, target: &JumpTarget, loc: SourceLocation) {
        match target {
            JumpTarget::Line(n) => self.verify_line_target(*n, loc, "jump"),
            JumpTarget::Label(l) => {
                let key = canon(l);
                if let Some(sym) = self.symbols.labels.get_mut(&key) {
                    sym.references.push(loc);
                    return;
                }
                self.error("UNDEFINED_LABEL", format!("undefined label: {}", l), loc);
            }
        }
    }

    /// A missing line is only an error when no later line exists: control
    /// into a gap transfers to the next greater line.
    fn verify_line_target(&mut self, n: u32, loc: SourceLocation, context: &str) {
        if let Some(sym) = self.symbols.line_numbers.get_mut(&n) {
            sym.references.push(loc);
            return;
        }
        let has_following = self.symbols.line_numbers.keys().any(|&k| k > n);
        if !has_following {
            self.error(
                "UNDEFINED_LINE",
                format!("{} target line {} does not exist", context, n),
                loc,
            );
        }
    }

    // ---- final validation ---------------------------------------------------

    fn validate_control_flow(&mut self) {
        if let Some((var, loc)) = self.for_stack.last().cloned() {
            self.error(
                "FOR_WITHOUT_NEXT",
                format!("FOR {} has no matching NEXT", var),
                loc,
            );
        }
        if let Some(loc) = self.while_stack.last().copied() {
            self.error("WHILE_WITHOUT_WEND", "WHILE has no matching WEND".to_string(), loc);
        }
        if let Some(loc) = self.repeat_stack.last().copied() {
            self.error("REPEAT_WITHOUT_UNTIL", "REPEAT has no matching UNTIL".to_string(), loc);
        }
        if let Some(loc) = self.do_stack.last().copied() {
            self.error("DO_WITHOUT_LOOP", "DO has no matching LOOP".to_string(), loc);
        }
    }

    fn check_unused_variables(&mut self) {
        let mut unused: Vec<(String, SourceLocation)> = self
            .symbols
            .variables
            .values()
            .filter(|s| s.is_declared && !s.is_used)
            .map(|s| (s.name.clone(), s.first_use))
            .collect();
        unused.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, loc) in unused {
            self.warning("UNUSED_VARIABLE", format!("variable '{}' declared but never used", name), loc);
        }
    }

    /// Text report of analysis results for the shell.
    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str("=== SEMANTIC ANALYSIS REPORT ===\n");
        out.push_str(if self.errors.is_empty() { "Status: PASSED\n" } else { "Status: FAILED\n" });
        out.push_str(&format!("Errors: {}\nWarnings: {}\n", self.errors.len(), self.warnings.len()));
        for e in &self.errors {
            out.push_str(&format!("  {}\n", e));
        }
        for w in &self.warnings {
            out.push_str(&format!("  {}\n", w));
        }
        out.push_str(&self.symbols.report());
        out
    }

    // ---- diagnostics --------------------------------------------------------

    fn error(&mut self, code: &'static str, message: String, loc: SourceLocation) {
        self.errors.push(Diagnostic::error(Stage::Semantic, code, message, loc));
    }

    fn warning(&mut self, code: &'static str, message: String, loc: SourceLocation) {
        self.warnings.push(Diagnostic::warning(Stage::Semantic, code, message, loc));
    }
}

fn type_is_numeric_or_unknown(t: VariableType) -> bool {
    t.is_numeric() || t == VariableType::Unknown
}

/// Numeric promotion: INT < FLOAT < DOUBLE, strings take precedence.
fn promote_types(left: VariableType, right: VariableType) -> VariableType {
    use VariableType::*;
    if left == Unicode || right == Unicode {
        return Unicode;
    }
    if left == Str || right == Str {
        return Str;
    }
    if left == Double || right == Double {
        return Double;
    }
    if left == Float || right == Float {
        return Float;
    }
    if left == Int || right == Int {
        return Int;
    }
    Float
}

fn init_builtins(map: &mut HashMap<String, i32>) {
    // Math (1 argument, FLOAT result)
    for name in ["ABS", "SIN", "COS", "TAN", "ATN", "SQR", "INT", "SGN", "LOG", "EXP"] {
        map.insert(name.to_string(), 1);
    }
    // RND takes 0 or 1 argument; INSTR 2 or 3.
    map.insert("RND".to_string(), -1);
    map.insert("INSTR".to_string(), -1);
    map.insert("TIMER".to_string(), 0);
    // String functions
    map.insert("LEN".to_string(), 1);
    map.insert("ASC".to_string(), 1);
    map.insert("CHR$".to_string(), 1);
    map.insert("STR$".to_string(), 1);
    map.insert("VAL".to_string(), 1);
    map.insert("LEFT$".to_string(), 2);
    map.insert("RIGHT$".to_string(), 2);
    map.insert("MID$".to_string(), 3);
    map.insert("STRING$".to_string(), 2);
    map.insert("SPACE$".to_string(), 1);
    map.insert("LCASE$".to_string(), 1);
    map.insert("UCASE$".to_string(), 1);
    map.insert("LTRIM$".to_string(), 1);
    map.insert("RTRIM$".to_string(), 1);
    map.insert("TRIM$".to_string(), 1);
    map.insert("REVERSE$".to_string(), 1);
    map.insert("MIN".to_string(), 2);
    map.insert("MAX".to_string(), 2);
    // File I/O
    map.insert("EOF".to_string(), 1);
    map.insert("LOC".to_string(), 1);
    map.insert("LOF".to_string(), 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolt_parser::parse_source;
    use bolt_registry::CommandRegistry;

    fn analyze(src: &str) -> (bool, Vec<Diagnostic>, Vec<Diagnostic>, SymbolTable, ConstantsManager) {
        let reg = CommandRegistry::with_defaults();
        let out = parse_source(src, &reg);
        assert!(
            out.diagnostics.iter().all(|d| !d.is_error()),
            "parse errors: {:?}",
            out.diagnostics
        );
        let mut analyzer = SemanticAnalyzer::new(&reg);
        let ok = analyzer.analyze(&out.program, &out.options);
        let errors = analyzer.errors().to_vec();
        let warnings = analyzer.warnings().to_vec();
        let symbols = analyzer.symbols().clone();
        let constants = analyzer.take_constants();
        (ok, errors, warnings, symbols, constants)
    }

    fn codes(diags: &[Diagnostic]) -> Vec<&'static str> {
        diags.iter().map(|d| d.code).collect()
    }

    #[test]
    fn clean_program_passes() {
        let (ok, errors, _, symbols, _) = analyze("10 FOR I = 1 TO 3\n20 PRINT I\n30 NEXT I\n40 END\n");
        assert!(ok, "errors: {:?}", errors);
        assert!(symbols.lookup_variable("I").is_some());
        assert_eq!(symbols.lookup_line(20).map(|s| s.program_index), Some(1));
    }

    #[test]
    fn sigil_type_inference() {
        let (_, _, _, symbols, _) = analyze("10 LET A$ = \"x\"\n20 LET N% = 1\n30 LET D# = 1\n40 LET F = 1\n");
        assert_eq!(symbols.lookup_variable("A$").unwrap().ty, VariableType::Str);
        assert_eq!(symbols.lookup_variable("N%").unwrap().ty, VariableType::Int);
        assert_eq!(symbols.lookup_variable("D#").unwrap().ty, VariableType::Double);
        assert_eq!(symbols.lookup_variable("F").unwrap().ty, VariableType::Float);
    }

    #[test]
    fn unicode_mode_changes_string_type() {
        let (_, _, _, symbols, _) = analyze("OPTION UNICODE\n10 LET A$ = \"x\"\n");
        assert_eq!(symbols.lookup_variable("A$").unwrap().ty, VariableType::Unicode);
    }

    #[test]
    fn string_numeric_assignment_is_error() {
        let (ok, errors, _, _, _) = analyze("10 LET A$ = 5\n");
        assert!(!ok);
        assert!(codes(&errors).contains(&"TYPE_MISMATCH"));
    }

    #[test]
    fn next_variable_mismatch() {
        let (ok, errors, _, _, _) = analyze("10 FOR I = 1 TO 3\n20 NEXT J\n");
        assert!(!ok);
        assert!(codes(&errors).contains(&"CONTROL_FLOW_MISMATCH"));
    }

    #[test]
    fn unclosed_loops_reported() {
        let (_, errors, _, _, _) = analyze("10 FOR I = 1 TO 3\n20 WHILE 1\n30 REPEAT\n40 DO\n");
        let codes = codes(&errors);
        assert!(codes.contains(&"FOR_WITHOUT_NEXT"));
        assert!(codes.contains(&"WHILE_WITHOUT_WEND"));
        assert!(codes.contains(&"REPEAT_WITHOUT_UNTIL"));
        assert!(codes.contains(&"DO_WITHOUT_LOOP"));
    }

    #[test]
    fn goto_into_gap_is_allowed_but_past_end_is_not() {
        let (ok, errors, _, _, _) = analyze("10 GOTO 50\n20 PRINT \"x\"\n30 END\n100 PRINT \"y\"\n");
        assert!(ok, "errors: {:?}", errors);
        let (ok2, errors2, _, _, _) = analyze("10 GOTO 500\n20 END\n");
        assert!(!ok2);
        assert!(codes(&errors2).contains(&"UNDEFINED_LINE"));
    }

    #[test]
    fn labels_get_disjoint_ids() {
        let (_, _, _, symbols, _) = analyze("10 :first\n20 :second\n30 GOTO first\n");
        let a = symbols.lookup_label("FIRST").unwrap();
        let b = symbols.lookup_label("SECOND").unwrap();
        assert!(a.label_id >= crate::symbols::FIRST_LABEL_ID);
        assert!(b.label_id >= crate::symbols::FIRST_LABEL_ID);
        assert_ne!(a.label_id, b.label_id);
        assert_eq!(a.references.len(), 1);
    }

    #[test]
    fn duplicate_label_is_error() {
        let (ok, errors, _, _, _) = analyze("10 :spot\n20 :spot\n");
        assert!(!ok);
        assert!(codes(&errors).contains(&"DUPLICATE_LABEL"));
    }

    #[test]
    fn constant_folding_stores_value_and_index() {
        let (ok, errors, _, symbols, constants) = analyze("10 CONSTANT K = 2 * PI\n20 PRINT K\n");
        assert!(ok, "errors: {:?}", errors);
        let sym = symbols.lookup_constant("K").unwrap();
        assert!((constants.get_as_double(sym.index) - 2.0 * std::f64::consts::PI).abs() < 1e-12);
        // The index round-trips through the manager.
        assert_eq!(constants.index_of("K"), Some(sym.index));
    }

    #[test]
    fn dim_slot_counts_include_upper_bound() {
        let (_, _, _, symbols, _) = analyze("10 DIM A(10), B(0)\n20 LET A(5) = 1\n30 LET B(0) = 1\n");
        assert_eq!(symbols.lookup_array("A").unwrap().dimensions, vec![11]);
        assert_eq!(symbols.lookup_array("B").unwrap().dimensions, vec![1]);
    }

    #[test]
    fn non_constant_dim_defaults_with_warning() {
        let (_, _, warnings, symbols, _) = analyze("10 DIM A(N)\n20 LET A(1) = 1\n");
        assert!(codes(&warnings).contains(&"NON_CONSTANT_DIM"));
        assert_eq!(symbols.lookup_array("A").unwrap().dimensions, vec![11]);
    }

    #[test]
    fn explicit_mode_rejects_implicit_arrays() {
        let (ok, errors, _, _, _) = analyze("OPTION EXPLICIT\n10 LET X = Q(3)\n");
        assert!(!ok);
        assert!(codes(&errors).contains(&"ARRAY_NOT_DECLARED"));
    }

    #[test]
    fn wrong_dimension_count() {
        let (ok, errors, _, _, _) = analyze("10 DIM A(5, 5)\n20 LET X = A(1)\n");
        assert!(!ok);
        assert!(codes(&errors).contains(&"WRONG_DIMENSION_COUNT"));
    }

    #[test]
    fn def_fn_cycle_is_rejected() {
        let (ok, errors, _, _, _) =
            analyze("10 DEF FN A(X) = FN B(X) + 1\n20 DEF FN B(X) = FN A(X) - 1\n");
        assert!(!ok);
        assert!(codes(&errors).contains(&"DEF_FN_CYCLE"));
    }

    #[test]
    fn data_segment_staging() {
        let src = "10 DATA 1, 2\n20 :more\n30 DATA 3, 4\n40 READ A\n50 RESTORE more\n";
        let (ok, errors, _, symbols, _) = analyze(src);
        assert!(ok, "errors: {:?}", errors);
        assert_eq!(symbols.data_segment.values, vec!["1", "2", "3", "4"]);
        assert_eq!(symbols.data_segment.line_restore_points.get(&10), Some(&0));
        assert_eq!(symbols.data_segment.line_restore_points.get(&30), Some(&2));
        assert_eq!(symbols.data_segment.label_restore_points.get("MORE"), Some(&2));
    }

    #[test]
    fn restore_to_unknown_target_is_not_an_error() {
        let (ok, errors, _, _, _) = analyze("10 DATA 1\n20 RESTORE somewhere\n30 READ A\n");
        assert!(ok, "errors: {:?}", errors);
    }

    #[test]
    fn on_event_validation() {
        let (ok, errors, _, symbols, _) = analyze("10 ON KEYPRESSED GOSUB 100\n100 RETURN\n");
        assert!(ok, "errors: {:?}", errors);
        assert!(symbols.events_used);
        let (ok2, errors2, _, _, _) = analyze("10 ON NOSUCH GOSUB 100\n100 RETURN\n");
        assert!(!ok2);
        assert!(codes(&errors2).contains(&"UNKNOWN_EVENT"));
    }

    #[test]
    fn builtin_arity_is_checked() {
        let (ok, errors, _, _, _) = analyze("10 LET X = SIN(1, 2)\n");
        assert!(!ok);
        assert!(codes(&errors).contains(&"WRONG_ARGUMENT_COUNT"));
    }

    #[test]
    fn injected_constants_resolve() {
        let reg = CommandRegistry::with_defaults();
        let out = parse_source("10 PRINT SCREEN_W\n", &reg);
        let mut analyzer = SemanticAnalyzer::new(&reg);
        analyzer.inject_runtime_constant("SCREEN_W", ConstValue::Int(640));
        assert!(analyzer.analyze(&out.program, &out.options));
        let sym = analyzer.symbols().lookup_constant("SCREEN_W").unwrap();
        assert_eq!(analyzer.constants().get_as_int(sym.index), 640);
    }

    #[test]
    fn registered_data_labels_satisfy_restore() {
        let reg = CommandRegistry::with_defaults();
        let out = parse_source("10 RESTORE levels\n20 READ A\n", &reg);
        let mut analyzer = SemanticAnalyzer::new(&reg);
        analyzer.set_strict_mode(true);
        analyzer.register_data_labels(vec![("levels".to_string(), 500)]);
        assert!(analyzer.analyze(&out.program, &out.options));
        assert!(analyzer.symbols().lookup_label("LEVELS").is_some());
        assert!(analyzer.warnings().is_empty());
    }
}
