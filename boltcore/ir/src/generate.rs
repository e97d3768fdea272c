/*
Bolt BASIC — IR generator

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

//! AST-to-IR lowering over the control-flow graph. Expressions push values,
//! statements pop them. DEF FN bodies are inlined at call sites through
//! fresh temporaries; simple WHILE conditions are serialized for deferred
//! evaluation by the target runtime.

use std::collections::{HashMap, HashSet};

use bolt_ast::{
    BinOp, DoCondition, EventHandlerKind, ExitKind, Expr, ExprKind, JumpTarget, PrintItem,
    PrintSep, Program, Stmt, StmtKind, UnaryOp,
};
use bolt_cfg::{BasicBlock, Cfg, EdgeKind};
use bolt_semantic::{canon, Binding, SymbolTable};

use crate::{IrInstruction, IrOperand, IrProgram, Opcode};

/// Sigil of a name's trailing type character, if any.
fn type_suffix(name: &str) -> Option<char> {
    match name.as_bytes().last() {
        Some(b'%') => Some('%'),
        Some(b'#') => Some('#'),
        Some(b'!') => Some('!'),
        Some(b'$') => Some('$'),
        Some(b'&') => Some('&'),
        _ => None,
    }
}

/// Number formatting for serialized conditions and operands: integral
/// values print without a fractional part.
fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

pub struct IrGenerator<'a> {
    cfg: &'a Cfg,
    program: &'a Program,
    symbols: &'a SymbolTable,
    code: IrProgram,
    next_label: u32,
    block_labels: HashMap<usize, u32>,
    /// Loop-start labels for open WHILEs; -1 marks deferred evaluation.
    while_labels: Vec<i64>,
    /// DEF FN bodies keyed by canonical name, pre-loaded from the symbol
    /// table so forward references inline correctly.
    def_fns: HashMap<String, (Vec<String>, Expr)>,
    /// FUNCTION/SUB names (calls compile to CALL_FUNCTION/CALL_SUB).
    fn_names: HashSet<String>,
    param_map: HashMap<String, String>,
    inlining: bool,
    cur_line: u32,
    cur_block: u32,
}

impl<'a> IrGenerator<'a> {
    pub fn new(cfg: &'a Cfg, program: &'a Program, symbols: &'a SymbolTable) -> Self {
        let mut def_fns = HashMap::new();
        let mut fn_names = HashSet::new();
        for (name, f) in &symbols.functions {
            match &f.body {
                Some(body) => {
                    def_fns.insert(name.clone(), (f.params.clone(), body.clone()));
                }
                None => {
                    fn_names.insert(name.clone());
                }
            }
        }
        Self {
            cfg,
            program,
            symbols,
            code: IrProgram::default(),
            next_label: 1,
            block_labels: HashMap::new(),
            while_labels: Vec::new(),
            def_fns,
            fn_names,
            param_map: HashMap::new(),
            inlining: false,
            cur_line: 0,
            cur_block: 0,
        }
    }

    pub fn generate(mut self) -> IrProgram {
        self.code.block_count = self.cfg.block_count();
        self.code.array_base = self.symbols.array_base;
        self.code.unicode_mode = self.symbols.unicode_mode;
        self.code.error_tracking = self.symbols.error_tracking;
        self.code.cancellable_loops = self.symbols.cancellable_loops;
        self.code.events_used = self.symbols.events_used;
        self.code.data_values = self.symbols.data_segment.values.clone();
        self.code.data_line_restore_points = self.symbols.data_segment.line_restore_points.clone();
        self.code.data_label_restore_points = self
            .symbols
            .data_segment
            .label_restore_points
            .clone();

        // Mint labels for every block up front so jumps resolve forward.
        for id in 0..self.cfg.block_count() {
            self.label_for_block(id);
        }
        for id in 0..self.cfg.block_count() {
            let block = self.cfg.blocks[id].clone();
            self.generate_block(&block);
        }
        if !matches!(self.code.instructions.last().map(|i| i.op), Some(Opcode::Halt)) {
            self.emit(Opcode::Halt);
        }
        self.code.label_count = self.next_label - 1;
        self.code
    }

    fn generate_block(&mut self, block: &BasicBlock) {
        self.cur_block = block.id as u32;
        self.cur_line = block.first_line;

        let label = self.label_for_block(block.id);
        self.code.bind_label(label);

        for &(li, si) in &block.stmts {
            let line = &self.program.lines[li];
            if line.number > 0 && !self.code.line_to_address.contains_key(&line.number) {
                self.code.line_to_address.insert(line.number, self.code.instructions.len());
            }
            self.cur_line = line.number;
            let stmt = line.stmts[si].clone();
            self.generate_stmt(&stmt, line.number);
        }

        // Blocks that neither end in explicit control flow nor fall through
        // to their successor get an explicit jump.
        let mut has_explicit_flow = false;
        if let Some(&(li, si)) = block.stmts.last() {
            has_explicit_flow = matches!(
                self.program.lines[li].stmts[si].kind,
                StmtKind::Goto { .. }
                    | StmtKind::Gosub { .. }
                    | StmtKind::Return { .. }
                    | StmtKind::End
                    | StmtKind::If { .. }
            );
        }
        if !has_explicit_flow && !block.successors.is_empty() {
            let has_fallthrough = self
                .cfg
                .edges
                .iter()
                .any(|e| e.source == block.id && e.kind == EdgeKind::Fallthrough);
            if !has_fallthrough {
                let target = self.label_for_block(block.successors[0]);
                self.emit1(Opcode::Jump, IrOperand::Label(target));
            }
        }
    }

    // ---- statements -------------------------------------------------------

    fn generate_stmt(&mut self, stmt: &Stmt, line_number: u32) {
        self.cur_line = line_number;
        match &stmt.kind {
            StmtKind::Print { file, items, using_fmt, using_values, trailing_newline } => {
                if *file > 0 {
                    for item in items {
                        self.generate_expr(&item.expr);
                        let sep = match item.sep {
                            PrintSep::Semicolon => ";",
                            PrintSep::Comma => ",",
                            PrintSep::None => "\n",
                        };
                        self.emit2(
                            Opcode::PrintFile,
                            IrOperand::Str(file.to_string()),
                            IrOperand::Str(sep.to_string()),
                        );
                    }
                    if *trailing_newline {
                        self.emit1(Opcode::PrintFileNewline, IrOperand::Str(file.to_string()));
                    }
                    return;
                }
                if let Some(fmt) = using_fmt {
                    self.generate_expr(fmt);
                    for v in using_values {
                        self.generate_expr(v);
                    }
                    self.emit1(Opcode::PrintUsing, IrOperand::Int(using_values.len() as i64));
                    return;
                }
                self.generate_print_items(items, Opcode::Print);
                if *trailing_newline {
                    self.emit(Opcode::PrintNewline);
                }
            }
            StmtKind::Console { items, trailing_newline } => {
                self.generate_print_items(items, Opcode::Console);
                if *trailing_newline {
                    self.emit(Opcode::PrintNewline);
                }
            }
            StmtKind::PrintAt { x, y, items, using_fmt, using_values, fg, bg } => {
                self.generate_expr(x);
                self.generate_expr(y);
                if let Some(fmt) = using_fmt {
                    self.generate_expr(fmt);
                    for v in using_values {
                        self.generate_expr(v);
                    }
                    self.generate_color_or_default(fg, 4294967295.0);
                    self.generate_color_or_default(bg, 4278190080.0);
                    self.emit1(Opcode::PrintAtUsing, IrOperand::Int(using_values.len() as i64));
                    return;
                }
                for item in items {
                    self.generate_expr(&item.expr);
                }
                self.generate_color_or_default(fg, 4294967295.0);
                self.generate_color_or_default(bg, 4278190080.0);
                self.emit1(Opcode::PrintAt, IrOperand::Int(items.len() as i64));
            }
            StmtKind::Input { file, prompt, vars, line_input } => {
                if *file > 0 {
                    for var in vars {
                        let op = if *line_input { Opcode::LineInputFile } else { Opcode::InputFile };
                        self.emit2(op, IrOperand::Str(file.to_string()), IrOperand::Str(canon(var)));
                    }
                    return;
                }
                if !prompt.is_empty() {
                    self.emit1(Opcode::InputPrompt, IrOperand::Str(prompt.clone()));
                }
                for var in vars {
                    self.emit1(Opcode::Input, IrOperand::Str(canon(var)));
                }
            }
            StmtKind::InputAt { x, y, prompt, var } => {
                self.generate_expr(x);
                self.generate_expr(y);
                self.emit2(Opcode::InputAt, IrOperand::Str(prompt.clone()), IrOperand::Str(canon(var)));
            }
            StmtKind::Let { variable, indices, value } => {
                self.generate_expr(value);
                if indices.is_empty() {
                    self.emit1(Opcode::StoreVar, IrOperand::Str(canon(variable)));
                } else {
                    for index in indices {
                        self.generate_expr(index);
                    }
                    let mut instr = IrInstruction::new(Opcode::StoreArray);
                    instr.op1 = Some(IrOperand::Str(canon(variable)));
                    instr.op2 = Some(IrOperand::Int(indices.len() as i64));
                    instr.array_suffix = type_suffix(variable);
                    self.push(instr);
                }
            }
            StmtKind::MidAssign { variable, position, length, replacement } => {
                self.generate_expr(position);
                self.generate_expr(length);
                self.generate_expr(replacement);
                self.emit1(Opcode::MidAssign, IrOperand::Str(canon(variable)));
            }
            StmtKind::If { cond, goto_line, then_stmts, elseifs, else_stmts } => {
                self.generate_expr(cond);
                if let Some(n) = goto_line {
                    let target = self.label_for_line(*n);
                    self.emit1(Opcode::JumpIfTrue, IrOperand::Label(target));
                    return;
                }
                // IF ... THEN GOTO n written longhand lowers the same way.
                if elseifs.is_empty() && else_stmts.is_empty() && then_stmts.len() == 1 {
                    if let StmtKind::Goto { target } = &then_stmts[0].kind {
                        let label = self.resolve_target(target);
                        self.emit1(Opcode::JumpIfTrue, IrOperand::Label(label));
                        return;
                    }
                }
                self.emit(Opcode::IfStart);
                for s in then_stmts {
                    self.generate_stmt(s, line_number);
                }
                for clause in elseifs {
                    self.generate_expr(&clause.cond);
                    self.emit(Opcode::ElseifStart);
                    for s in &clause.stmts {
                        self.generate_stmt(s, line_number);
                    }
                }
                if !else_stmts.is_empty() {
                    self.emit(Opcode::ElseStart);
                    for s in else_stmts {
                        self.generate_stmt(s, line_number);
                    }
                }
                self.emit(Opcode::IfEnd);
            }
            StmtKind::Case { selector, whens, otherwise } => {
                if whens.is_empty() {
                    for s in otherwise {
                        self.generate_stmt(s, line_number);
                    }
                    return;
                }
                // WHEN v1, v2 becomes (sel = v1) OR (sel = v2); the chain
                // lowers as IF/ELSEIF/ELSE.
                for (i, clause) in whens.iter().enumerate() {
                    for (vi, value) in clause.values.iter().enumerate() {
                        self.generate_expr(selector);
                        self.generate_expr(value);
                        self.emit(Opcode::Eq);
                        if vi > 0 {
                            self.emit(Opcode::Or);
                        }
                    }
                    if i == 0 {
                        self.emit(Opcode::IfStart);
                    } else {
                        self.emit(Opcode::ElseifStart);
                    }
                    for s in &clause.stmts {
                        self.generate_stmt(s, line_number);
                    }
                }
                if !otherwise.is_empty() {
                    self.emit(Opcode::ElseStart);
                    for s in otherwise {
                        self.generate_stmt(s, line_number);
                    }
                }
                self.emit(Opcode::IfEnd);
            }
            StmtKind::For { variable, start, end, step } => {
                self.generate_expr(start);
                self.generate_expr(end);
                match step {
                    Some(s) => self.generate_expr(s),
                    None => self.emit1(Opcode::PushInt, IrOperand::Int(1)),
                }
                self.emit1(Opcode::ForInit, IrOperand::Str(canon(variable)));
            }
            StmtKind::ForIn { variable, index_variable, array } => {
                self.generate_expr(array);
                let idx = index_variable.as_ref().map(|v| canon(v)).unwrap_or_default();
                self.emit2(Opcode::ForInInit, IrOperand::Str(canon(variable)), IrOperand::Str(idx));
            }
            StmtKind::Next { variable } => {
                let name = variable.as_ref().map(|v| canon(v)).unwrap_or_default();
                self.emit1(Opcode::ForNext, IrOperand::Str(name));
            }
            StmtKind::While { cond } => {
                match self.serialize_condition(cond) {
                    Some(text) => {
                        // Deferred evaluation: the emitter builds a native
                        // loop around the serialized expression.
                        self.emit1(Opcode::WhileStart, IrOperand::Str(text));
                        self.while_labels.push(-1);
                    }
                    None => {
                        let label = self.alloc_label();
                        self.emit1(Opcode::Label, IrOperand::Label(label));
                        self.generate_expr(cond);
                        self.emit1(Opcode::WhileStart, IrOperand::Label(label));
                        self.while_labels.push(label as i64);
                    }
                }
            }
            StmtKind::Wend => {
                let label = self.while_labels.pop().unwrap_or(-1);
                if label >= 0 {
                    self.emit1(Opcode::WhileEnd, IrOperand::Label(label as u32));
                } else {
                    self.emit(Opcode::WhileEnd);
                }
            }
            StmtKind::Repeat => self.emit(Opcode::RepeatStart),
            StmtKind::Until { cond } => {
                self.generate_expr(cond);
                self.emit(Opcode::RepeatEnd);
            }
            StmtKind::Do { condition, cond } => match condition {
                DoCondition::While => {
                    if let Some(c) = cond {
                        self.generate_expr(c);
                    }
                    self.emit(Opcode::DoWhileStart);
                }
                DoCondition::Until => {
                    if let Some(c) = cond {
                        self.generate_expr(c);
                    }
                    self.emit(Opcode::DoUntilStart);
                }
                DoCondition::Plain => self.emit(Opcode::DoStart),
            },
            StmtKind::Loop { condition, cond } => match condition {
                DoCondition::While => {
                    if let Some(c) = cond {
                        self.generate_expr(c);
                    }
                    self.emit(Opcode::DoLoopWhile);
                }
                DoCondition::Until => {
                    if let Some(c) = cond {
                        self.generate_expr(c);
                    }
                    self.emit(Opcode::DoLoopUntil);
                }
                DoCondition::Plain => self.emit(Opcode::DoLoopEnd),
            },
            StmtKind::Exit(kind) => {
                let op = match kind {
                    ExitKind::For => Opcode::ExitFor,
                    ExitKind::Do => Opcode::ExitDo,
                    ExitKind::While => Opcode::ExitWhile,
                    ExitKind::Repeat => Opcode::ExitRepeat,
                    ExitKind::Function => Opcode::ExitFunction,
                    ExitKind::Sub => Opcode::ExitSub,
                };
                self.emit(op);
            }
            StmtKind::Goto { target } => match target {
                JumpTarget::Line(n) => {
                    let label = self.label_for_line(*n);
                    let is_loop = line_number > 0 && self.cfg.is_back_edge(line_number, *n);
                    let mut instr = IrInstruction::new(Opcode::Jump);
                    instr.op1 = Some(IrOperand::Label(label));
                    instr.is_loop_jump = is_loop;
                    self.push(instr);
                }
                JumpTarget::Label(_) => {
                    // Symbolic targets are conservatively never loop-marked.
                    let label = self.resolve_target(target);
                    self.emit1(Opcode::Jump, IrOperand::Label(label));
                }
            },
            StmtKind::Gosub { target } => {
                let label = self.resolve_target(target);
                self.emit1(Opcode::CallGosub, IrOperand::Label(label));
            }
            StmtKind::OnGoto { selector, targets } => {
                self.generate_expr(selector);
                let list = self.target_label_list(targets);
                self.emit1(Opcode::OnGoto, IrOperand::Str(list));
            }
            StmtKind::OnGosub { selector, targets } => {
                self.generate_expr(selector);
                let list = self.target_label_list(targets);
                self.emit1(Opcode::OnGosub, IrOperand::Str(list));
            }
            StmtKind::OnCall { selector, functions } => {
                self.generate_expr(selector);
                let list: Vec<String> = functions.iter().map(|f| canon(f)).collect();
                self.emit1(Opcode::OnCall, IrOperand::Str(list.join(",")));
            }
            StmtKind::OnEvent { event, handler, target, is_line_number } => {
                // Operand layout: event|kind|target|is_line_number
                let kind = match handler {
                    EventHandlerKind::Call => "call",
                    EventHandlerKind::Goto => "goto",
                    EventHandlerKind::Gosub => "gosub",
                };
                let resolved = if *is_line_number {
                    match target.parse::<u32>() {
                        Ok(n) => self.label_for_line(n).to_string(),
                        Err(_) => target.clone(),
                    }
                } else if *handler == EventHandlerKind::Call {
                    canon(target)
                } else {
                    // Label handler target: use its internal label id.
                    match self.symbols.lookup_label(&canon(target)) {
                        Some(sym) => sym.label_id.to_string(),
                        None => target.clone(),
                    }
                };
                let operand = format!(
                    "{}|{}|{}|{}",
                    event,
                    kind,
                    resolved,
                    if *is_line_number { "true" } else { "false" }
                );
                self.emit1(Opcode::OnEvent, IrOperand::Str(operand));
            }
            StmtKind::Return { value } => match value {
                Some(v) => {
                    self.generate_expr(v);
                    self.emit(Opcode::ReturnValue);
                }
                // Bare RETURN: the emitter distinguishes SUB-return context.
                None => self.emit(Opcode::ReturnGosub),
            },
            StmtKind::Dim { arrays } => {
                for decl in arrays {
                    for dim in &decl.dims {
                        self.generate_expr(dim);
                    }
                    let mut instr = IrInstruction::new(Opcode::DimArray);
                    instr.op1 = Some(IrOperand::Str(canon(&decl.name)));
                    instr.op2 = Some(IrOperand::Int(decl.dims.len() as i64));
                    instr.array_suffix = type_suffix(&decl.name);
                    self.push(instr);
                }
            }
            StmtKind::DefFn { name, params, body } => {
                // Definition sites emit nothing; bodies inline at each call.
                self.def_fns.insert(canon(name), (params.iter().map(|p| canon(p)).collect(), (**body).clone()));
            }
            StmtKind::Function { name, params, body } => {
                self.emit1(Opcode::DefineFunction, IrOperand::Str(canon(name)));
                self.emit1(Opcode::PushInt, IrOperand::Int(params.len() as i64));
                for p in params {
                    self.emit1(Opcode::PushString, IrOperand::Str(canon(p)));
                }
                for s in body {
                    self.generate_stmt(s, line_number);
                }
                self.emit(Opcode::EndFunction);
            }
            StmtKind::Sub { name, params, body } => {
                self.emit1(Opcode::DefineSub, IrOperand::Str(canon(name)));
                self.emit1(Opcode::PushInt, IrOperand::Int(params.len() as i64));
                for p in params {
                    self.emit1(Opcode::PushString, IrOperand::Str(canon(p)));
                }
                for s in body {
                    self.generate_stmt(s, line_number);
                }
                self.emit(Opcode::EndSub);
            }
            StmtKind::Call { name, args } => {
                for a in args {
                    self.generate_expr(a);
                }
                self.emit2(
                    Opcode::CallSub,
                    IrOperand::Str(canon(name)),
                    IrOperand::Int(args.len() as i64),
                );
            }
            StmtKind::Label { name } => {
                if let Some(sym) = self.symbols.lookup_label(&canon(name)) {
                    let id = sym.label_id;
                    self.emit1(Opcode::Label, IrOperand::Label(id));
                }
            }
            StmtKind::Data { .. } => {
                // DATA is staged into the segment during analysis.
            }
            StmtKind::Read { vars } => {
                for var in vars {
                    self.emit1(Opcode::ReadData, IrOperand::Str(canon(var)));
                }
            }
            StmtKind::Restore { target } => match target {
                None => self.emit(Opcode::Restore),
                Some(JumpTarget::Line(n)) => self.emit1(Opcode::Restore, IrOperand::Int(*n as i64)),
                // The DATA manager resolves label targets at runtime.
                Some(JumpTarget::Label(l)) => self.emit1(Opcode::Restore, IrOperand::Str(canon(l))),
            },
            StmtKind::Open { filename, mode, file } => {
                self.emit3(
                    Opcode::OpenFile,
                    IrOperand::Str(filename.clone()),
                    IrOperand::Str(mode.clone()),
                    IrOperand::Str(file.to_string()),
                );
            }
            StmtKind::Close { file } => match file {
                Some(n) => self.emit1(Opcode::CloseFile, IrOperand::Str(n.to_string())),
                None => self.emit(Opcode::CloseFileAll),
            },
            StmtKind::Constant { .. } => {
                // Folded during analysis; references load by index.
            }
            StmtKind::Rem => self.emit(Opcode::Nop),
            StmtKind::End => self.emit(Opcode::End),
            StmtKind::Play { filename, format, wav_output, slot, fast_render } => {
                if let Some(slot) = slot {
                    self.generate_expr(filename);
                    self.generate_expr(slot);
                    self.push_string(format.clone().unwrap_or_default());
                    self.emit1(Opcode::PushInt, IrOperand::Int(i64::from(*fast_render)));
                    self.emit2(
                        Opcode::CallBuiltin,
                        IrOperand::Str("st_music_render_to_slot".to_string()),
                        IrOperand::Int(4),
                    );
                } else if let Some(wav) = wav_output {
                    self.generate_expr(filename);
                    self.generate_expr(wav);
                    self.push_string(format.clone().unwrap_or_default());
                    self.emit1(Opcode::PushInt, IrOperand::Int(i64::from(*fast_render)));
                    self.emit2(
                        Opcode::CallBuiltin,
                        IrOperand::Str("st_music_render_to_wav".to_string()),
                        IrOperand::Int(4),
                    );
                } else if let Some(fmt) = format {
                    self.generate_expr(filename);
                    self.push_string(fmt.clone());
                    self.emit2(
                        Opcode::CallBuiltin,
                        IrOperand::Str("st_music_play_file_with_format".to_string()),
                        IrOperand::Int(2),
                    );
                } else {
                    self.generate_expr(filename);
                    self.emit2(
                        Opcode::CallBuiltin,
                        IrOperand::Str("st_music_play_file".to_string()),
                        IrOperand::Int(1),
                    );
                }
            }
            StmtKind::PlaySound { sound_id, volume, cap_duration } => {
                self.generate_expr(sound_id);
                self.generate_expr(volume);
                match cap_duration {
                    Some(e) => self.generate_expr(e),
                    None => self.emit1(Opcode::PushInt, IrOperand::Int(-1)),
                }
                self.emit2(
                    Opcode::CallBuiltin,
                    IrOperand::Str("st_sound_play_with_fade".to_string()),
                    IrOperand::Int(3),
                );
            }
            StmtKind::Command { name, args } => {
                for a in args {
                    self.generate_expr(a);
                }
                self.emit2(
                    Opcode::CallBuiltin,
                    IrOperand::Str(name.clone()),
                    IrOperand::Int(args.len() as i64),
                );
            }
            StmtKind::SimpleCommand { name } => {
                self.emit2(Opcode::CallBuiltin, IrOperand::Str(name.clone()), IrOperand::Int(0));
            }
        }
    }

    fn generate_print_items(&mut self, items: &[PrintItem], op: Opcode) {
        for (i, item) in items.iter().enumerate() {
            self.generate_expr(&item.expr);
            self.emit1(op, IrOperand::Int(0));
            if i < items.len() - 1 && item.sep == PrintSep::Comma {
                // Comma tabs to the next print zone.
                self.emit1(Opcode::PrintTab, IrOperand::Int(14));
            }
        }
    }

    fn generate_color_or_default(&mut self, color: &Option<Box<Expr>>, default: f64) {
        match color {
            Some(e) => self.generate_expr(e),
            None => self.emit1(Opcode::PushDouble, IrOperand::Num(default)),
        }
    }

    // ---- expressions ------------------------------------------------------

    fn generate_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Number(v) => {
                if v.fract() == 0.0 && *v >= i32::MIN as f64 && *v <= i32::MAX as f64 {
                    self.emit1(Opcode::PushInt, IrOperand::Int(*v as i64));
                } else {
                    self.emit1(Opcode::PushDouble, IrOperand::Num(*v));
                }
            }
            ExprKind::Str(s) => self.push_string(s.clone()),
            ExprKind::Var(name) => {
                let key = canon(name);
                if let Some(sym) = self.symbols.lookup_constant(&key) {
                    self.emit1(Opcode::LoadConst, IrOperand::Int(sym.index as i64));
                    return;
                }
                if self.inlining {
                    if let Some(temp) = self.param_map.get(&key) {
                        let temp = temp.clone();
                        self.emit1(Opcode::LoadVar, IrOperand::Str(temp));
                        return;
                    }
                }
                self.emit1(Opcode::LoadVar, IrOperand::Str(key));
            }
            ExprKind::ArrayAccess { name, indices } => {
                let key = canon(name);
                // Resolve to the symbol's stored canonical name so call
                // operands match DEFINE_FUNCTION/DEFINE_SUB spelling.
                enum Site {
                    Array,
                    DefFn(String),
                    Function(String),
                    Builtin,
                }
                let site = match self.symbols.resolve_callable(&key) {
                    Binding::Array(_) => Site::Array,
                    Binding::DefFn(f) => Site::DefFn(canon(&f.name)),
                    Binding::Function(f) => Site::Function(canon(&f.name)),
                    Binding::Unbound => Site::Builtin,
                };
                match site {
                    Site::Array => {
                        for index in indices {
                            self.generate_expr(index);
                        }
                        let mut instr = IrInstruction::new(Opcode::LoadArray);
                        instr.op1 = Some(IrOperand::Str(key));
                        instr.op2 = Some(IrOperand::Int(indices.len() as i64));
                        instr.array_suffix = type_suffix(name);
                        self.push(instr);
                    }
                    Site::DefFn(stored) => self.generate_inlined_call(&stored, indices),
                    Site::Function(stored) => {
                        for index in indices {
                            self.generate_expr(index);
                        }
                        self.emit2(
                            Opcode::CallFunction,
                            IrOperand::Str(stored),
                            IrOperand::Int(indices.len() as i64),
                        );
                    }
                    Site::Builtin => {
                        for index in indices {
                            self.generate_expr(index);
                        }
                        self.emit2(
                            Opcode::CallBuiltin,
                            IrOperand::Str(key),
                            IrOperand::Int(indices.len() as i64),
                        );
                    }
                }
            }
            ExprKind::FunctionCall { name, args, .. } => {
                let key = canon(name);
                if self.def_fns.contains_key(&key) {
                    self.generate_inlined_call(&key, args);
                } else if self.fn_names.contains(&key) {
                    for a in args {
                        self.generate_expr(a);
                    }
                    self.emit2(Opcode::CallFunction, IrOperand::Str(key), IrOperand::Int(args.len() as i64));
                } else {
                    for a in args {
                        self.generate_expr(a);
                    }
                    self.emit2(Opcode::CallBuiltin, IrOperand::Str(key), IrOperand::Int(args.len() as i64));
                }
            }
            ExprKind::RegistryCall { name, args, .. } => {
                for a in args {
                    self.generate_expr(a);
                }
                self.emit2(
                    Opcode::CallBuiltin,
                    IrOperand::Str(name.clone()),
                    IrOperand::Int(args.len() as i64),
                );
            }
            ExprKind::Unary { op, expr: inner } => {
                self.generate_expr(inner);
                match op {
                    UnaryOp::Neg => self.emit(Opcode::Neg),
                    UnaryOp::Not => self.emit(Opcode::Not),
                    UnaryOp::Plus => {}
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.generate_expr(lhs);
                self.generate_expr(rhs);
                let opcode = match op {
                    BinOp::Add => {
                        if self.is_string_expr(lhs) || self.is_string_expr(rhs) {
                            if self.symbols.unicode_mode {
                                Opcode::UnicodeConcat
                            } else {
                                Opcode::StrConcat
                            }
                        } else {
                            Opcode::Add
                        }
                    }
                    BinOp::Sub => Opcode::Sub,
                    BinOp::Mul => Opcode::Mul,
                    BinOp::Div => Opcode::Div,
                    BinOp::IntDiv => Opcode::IDiv,
                    BinOp::Mod => Opcode::Mod,
                    BinOp::Pow => Opcode::Pow,
                    BinOp::Eq => Opcode::Eq,
                    BinOp::Ne => Opcode::Ne,
                    BinOp::Lt => Opcode::Lt,
                    BinOp::Le => Opcode::Le,
                    BinOp::Gt => Opcode::Gt,
                    BinOp::Ge => Opcode::Ge,
                    BinOp::And => Opcode::And,
                    BinOp::Or => Opcode::Or,
                    BinOp::Xor => Opcode::Xor,
                };
                self.emit(opcode);
            }
            ExprKind::Iif { cond, then_value, else_value } => {
                self.generate_expr(cond);
                self.generate_expr(then_value);
                self.generate_expr(else_value);
                self.emit2(Opcode::CallBuiltin, IrOperand::Str("__IIF".to_string()), IrOperand::Int(3));
            }
        }
    }

    /// Inline a DEF FN call: evaluate arguments into fresh temporaries, map
    /// parameters onto them, and lower the body with the mapping active.
    fn generate_inlined_call(&mut self, key: &str, args: &[Expr]) {
        let Some((params, body)) = self.def_fns.get(key).cloned() else {
            self.emit1(Opcode::PushInt, IrOperand::Int(0));
            return;
        };
        let saved_map = self.param_map.clone();
        let saved_inlining = self.inlining;
        for (i, arg) in args.iter().enumerate().take(params.len()) {
            self.generate_expr(arg);
            let temp = format!("__fn_{}_{}", key, params[i]);
            self.emit1(Opcode::StoreVar, IrOperand::Str(temp.clone()));
            self.param_map.insert(params[i].clone(), temp);
        }
        self.inlining = true;
        self.generate_expr(&body);
        self.param_map = saved_map;
        self.inlining = saved_inlining;
    }

    // ---- WHILE deferred evaluation ----------------------------------------

    /// Serialize a simple condition (literals, numeric variables, unary and
    /// binary operators) for deferred evaluation. Function calls and any
    /// string-typed operand force the label/back-jump pattern instead.
    fn serialize_condition(&self, expr: &Expr) -> Option<String> {
        match &expr.kind {
            ExprKind::Number(v) => Some(format_number(*v)),
            ExprKind::Var(name) => {
                if self.is_string_expr(expr) {
                    return None;
                }
                Some(format!("var_{}", canon(name)))
            }
            ExprKind::Unary { op, expr: inner } => {
                let operand = self.serialize_condition(inner)?;
                match op {
                    UnaryOp::Neg => Some(format!("(-{})", operand)),
                    UnaryOp::Not => Some(format!("(not {})", operand)),
                    UnaryOp::Plus => Some(operand),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let left = self.serialize_condition(lhs)?;
                let right = self.serialize_condition(rhs)?;
                let op_text = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                    BinOp::IntDiv => "//",
                    BinOp::Mod => "%",
                    BinOp::Pow => "^",
                    BinOp::Eq => "==",
                    BinOp::Ne => "~=",
                    BinOp::Lt => "<",
                    BinOp::Le => "<=",
                    BinOp::Gt => ">",
                    BinOp::Ge => ">=",
                    BinOp::And => "and",
                    BinOp::Or => "or",
                    BinOp::Xor => return None,
                };
                Some(format!("({} {} {})", left, op_text, right))
            }
            // Strings, calls, IIF: re-evaluate through the stack each pass.
            _ => None,
        }
    }

    /// Conservative string-ness test used for concatenation selection and
    /// the deferred-evaluation restriction.
    fn is_string_expr(&self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Str(_) => true,
            ExprKind::Var(name) => {
                let key = canon(name);
                if let Some(c) = self.symbols.lookup_constant(&key) {
                    return matches!(c.value, bolt_registry::ConstValue::Str(_));
                }
                if let Some(v) = self.symbols.lookup_variable(&key) {
                    return v.ty.is_string();
                }
                if let Some(a) = self.symbols.lookup_array(&key) {
                    return a.ty.is_string();
                }
                key.ends_with('$') || key.ends_with("_STRING")
            }
            ExprKind::ArrayAccess { name, .. } | ExprKind::FunctionCall { name, .. } => {
                let key = canon(name);
                if let Some(f) = self.symbols.lookup_function(&key) {
                    return f.return_type.is_string();
                }
                if let Some(a) = self.symbols.lookup_array(&key) {
                    return a.ty.is_string();
                }
                key.ends_with('$') || key.ends_with("_STRING")
            }
            ExprKind::RegistryCall { return_type, .. } => {
                matches!(return_type, bolt_common::ReturnType::Str)
            }
            ExprKind::Binary { op: BinOp::Add, lhs, rhs } => {
                self.is_string_expr(lhs) || self.is_string_expr(rhs)
            }
            ExprKind::Iif { then_value, else_value, .. } => {
                self.is_string_expr(then_value) || self.is_string_expr(else_value)
            }
            _ => false,
        }
    }

    // ---- labels -----------------------------------------------------------

    fn label_for_block(&mut self, block_id: usize) -> u32 {
        if let Some(&l) = self.block_labels.get(&block_id) {
            return l;
        }
        let l = self.alloc_label();
        self.block_labels.insert(block_id, l);
        l
    }

    /// Label for a BASIC line target; a missing line falls forward to the
    /// next following block.
    fn label_for_line(&mut self, line: u32) -> u32 {
        match self.cfg.block_for_line_or_next(line) {
            Some(block) => self.label_for_block(block),
            None => self.alloc_label(),
        }
    }

    fn resolve_target(&mut self, target: &JumpTarget) -> u32 {
        match target {
            JumpTarget::Line(n) => self.label_for_line(*n),
            JumpTarget::Label(l) => match self.symbols.lookup_label(&canon(l)) {
                Some(sym) => sym.label_id,
                None => self.alloc_label(),
            },
        }
    }

    fn target_label_list(&mut self, targets: &[JumpTarget]) -> String {
        let labels: Vec<String> =
            targets.iter().map(|t| self.resolve_target(t).to_string()).collect();
        labels.join(",")
    }

    fn alloc_label(&mut self) -> u32 {
        let l = self.next_label;
        self.next_label += 1;
        l
    }

    // ---- emit helpers -----------------------------------------------------

    fn push(&mut self, mut instr: IrInstruction) {
        instr.source_line = self.cur_line;
        instr.block_id = self.cur_block;
        self.code.push(instr);
    }

    fn push_string(&mut self, s: String) {
        self.emit1(Opcode::PushString, IrOperand::Str(s));
    }

    fn emit(&mut self, op: Opcode) {
        self.push(IrInstruction::new(op));
    }

    fn emit1(&mut self, op: Opcode, op1: IrOperand) {
        let mut instr = IrInstruction::new(op);
        instr.op1 = Some(op1);
        self.push(instr);
    }

    fn emit2(&mut self, op: Opcode, op1: IrOperand, op2: IrOperand) {
        let mut instr = IrInstruction::new(op);
        instr.op1 = Some(op1);
        instr.op2 = Some(op2);
        self.push(instr);
    }

    fn emit3(&mut self, op: Opcode, op1: IrOperand, op2: IrOperand, op3: IrOperand) {
        let mut instr = IrInstruction::new(op);
        instr.op1 = Some(op1);
        instr.op2 = Some(op2);
        instr.op3 = Some(op3);
        self.push(instr);
    }
}

/// Lower a program via its CFG into a linear IR program.
pub fn generate(cfg: &Cfg, program: &Program, symbols: &SymbolTable) -> IrProgram {
    IrGenerator::new(cfg, program, symbols).generate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolt_common::SourceLocation;

    #[test]
    fn number_formatting_for_serialized_conditions() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(-4.0), "-4");
    }

    #[test]
    fn type_suffixes() {
        assert_eq!(type_suffix("A%"), Some('%'));
        assert_eq!(type_suffix("A$"), Some('$'));
        assert_eq!(type_suffix("PLAIN"), None);
    }

    #[test]
    fn serialize_simple_condition() {
        let symbols = SymbolTable::new();
        let program = Program::new();
        let cfg = bolt_cfg::build(&program, &symbols);
        let generator = IrGenerator::new(&cfg, &program, &symbols);
        let loc = SourceLocation::default();
        // X < 10
        let cond = Expr::new(
            ExprKind::Binary {
                op: BinOp::Lt,
                lhs: Box::new(Expr::var("X", loc)),
                rhs: Box::new(Expr::number(10.0, loc)),
            },
            loc,
        );
        assert_eq!(generator.serialize_condition(&cond), Some("(var_X < 10)".to_string()));
        // A$ = "x" has a string operand: not deferrable.
        let scond = Expr::new(
            ExprKind::Binary {
                op: BinOp::Eq,
                lhs: Box::new(Expr::var("A$", loc)),
                rhs: Box::new(Expr::string("x", loc)),
            },
            loc,
        );
        assert_eq!(generator.serialize_condition(&scond), None);
        // Function calls force stack evaluation.
        let fcond = Expr::new(
            ExprKind::ArrayAccess { name: "RND".to_string(), indices: vec![] },
            loc,
        );
        assert_eq!(generator.serialize_condition(&fcond), None);
    }
}
