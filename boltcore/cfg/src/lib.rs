//! Control-flow graph construction: the statement stream is split into basic
//! blocks (single entry at the top, transfer only at the bottom), edges are
//! typed, and back edges are exposed so the IR generator can mark loop jumps.
//!
//! Every statement belongs to exactly one block. Jump targets are resolved
//! through the symbol table up front so a target landing mid-run splits the
//! run into two blocks.

use std::collections::{BTreeMap, BTreeSet};

use bolt_ast::{JumpTarget, Program, Stmt, StmtKind};
use bolt_semantic::{canon, SymbolTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Fallthrough,
    ConditionalTrue,
    ConditionalFalse,
    Unconditional,
    Call,
    Return,
}

#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: usize,
    /// BASIC line number of the first covered numbered line (0 if none).
    pub first_line: u32,
    /// All numbered lines covered by this block, in order.
    pub line_numbers: Vec<u32>,
    /// (program line index, statement index) pairs into the `Program`.
    pub stmts: Vec<(usize, usize)>,
    pub successors: Vec<usize>,
    pub predecessors: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Cfg {
    pub blocks: Vec<BasicBlock>,
    pub edges: Vec<Edge>,
    /// Covered numbered line -> owning block.
    line_to_block: BTreeMap<u32, usize>,
    /// Block first line -> block id (only blocks with a numbered first line).
    first_line_to_block: BTreeMap<u32, usize>,
}

impl Cfg {
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The block whose first line is exactly `n`.
    pub fn block_for_line(&self, n: u32) -> Option<usize> {
        self.first_line_to_block.get(&n).copied()
    }

    /// The block with the smallest first line >= `n`. A GOTO into a line
    /// gap transfers control to the next following statement.
    pub fn block_for_line_or_next(&self, n: u32) -> Option<usize> {
        self.first_line_to_block.range(n..).next().map(|(_, &id)| id)
    }

    /// Back edge test for loop-jump marking: the destination block does not
    /// come after the source block.
    pub fn is_back_edge(&self, src_line: u32, dst_line: u32) -> bool {
        let src = self.line_to_block.range(..=src_line).next_back().map(|(_, &id)| id);
        let dst = self.block_for_line_or_next(dst_line);
        match (src, dst) {
            (Some(s), Some(d)) => d <= s,
            _ => false,
        }
    }
}

/// Statement kinds that end a block: control never falls through them.
fn is_terminator(stmt: &Stmt) -> bool {
    matches!(
        stmt.kind,
        StmtKind::Goto { .. } | StmtKind::Return { .. } | StmtKind::End
    ) || matches!(&stmt.kind, StmtKind::If { goto_line: Some(_), then_stmts, else_stmts, .. }
            if then_stmts.is_empty() && else_stmts.is_empty())
}

/// Statement kinds after which a new block begins on the following line.
fn starts_block_after(stmt: &Stmt) -> bool {
    is_terminator(stmt)
        || matches!(
            stmt.kind,
            StmtKind::Gosub { .. }
                | StmtKind::OnGoto { .. }
                | StmtKind::OnGosub { .. }
                | StmtKind::OnCall { .. }
                | StmtKind::If { .. }
                | StmtKind::Case { .. }
                | StmtKind::For { .. }
                | StmtKind::ForIn { .. }
                | StmtKind::While { .. }
                | StmtKind::Repeat
                | StmtKind::Do { .. }
                | StmtKind::Next { .. }
                | StmtKind::Wend
                | StmtKind::Until { .. }
                | StmtKind::Loop { .. }
                | StmtKind::Function { .. }
                | StmtKind::Sub { .. }
        )
}

fn collect_jump_lines(stmt: &Stmt, symbols: &SymbolTable, out: &mut BTreeSet<u32>) {
    let mut push_target = |t: &JumpTarget, out: &mut BTreeSet<u32>| match t {
        JumpTarget::Line(n) => {
            out.insert(*n);
        }
        JumpTarget::Label(l) => {
            if let Some(sym) = symbols.lookup_label(&canon(l)) {
                // Label targets resolve to the program line that holds them.
                out.insert(sym.program_index as u32 | LABEL_INDEX_FLAG);
            }
        }
    };
    match &stmt.kind {
        StmtKind::Goto { target } | StmtKind::Gosub { target } => push_target(target, out),
        StmtKind::OnGoto { targets, .. } | StmtKind::OnGosub { targets, .. } => {
            for t in targets {
                push_target(t, out);
            }
        }
        StmtKind::If { goto_line, then_stmts, elseifs, else_stmts, .. } => {
            if let Some(n) = goto_line {
                out.insert(*n);
            }
            for s in then_stmts {
                collect_jump_lines(s, symbols, out);
            }
            for c in elseifs {
                for s in &c.stmts {
                    collect_jump_lines(s, symbols, out);
                }
            }
            for s in else_stmts {
                collect_jump_lines(s, symbols, out);
            }
        }
        StmtKind::Case { whens, otherwise, .. } => {
            for w in whens {
                for s in &w.stmts {
                    collect_jump_lines(s, symbols, out);
                }
            }
            for s in otherwise {
                collect_jump_lines(s, symbols, out);
            }
        }
        StmtKind::OnEvent { target, is_line_number: true, .. } => {
            if let Ok(n) = target.parse::<u32>() {
                out.insert(n);
            }
        }
        _ => {}
    }
}

/// Jump targets that resolved to a program-line *index* (labels) are tagged
/// with this bit to keep them apart from BASIC line numbers in one set.
const LABEL_INDEX_FLAG: u32 = 0x8000_0000;

pub fn build(program: &Program, symbols: &SymbolTable) -> Cfg {
    // Pass A: find leader line indices.
    let mut leaders: BTreeSet<usize> = BTreeSet::new();
    if !program.lines.is_empty() {
        leaders.insert(0);
    }

    // Jump targets make their destination line a leader.
    let mut raw_targets: BTreeSet<u32> = BTreeSet::new();
    for line in &program.lines {
        for stmt in &line.stmts {
            collect_jump_lines(stmt, symbols, &mut raw_targets);
        }
    }
    for t in raw_targets {
        if t & LABEL_INDEX_FLAG != 0 {
            leaders.insert((t & !LABEL_INDEX_FLAG) as usize);
            continue;
        }
        // Resolve through the line table; a missing line falls forward to
        // the next existing one.
        let idx = symbols
            .lookup_line(t)
            .map(|s| s.program_index)
            .or_else(|| next_line_index(program, t));
        if let Some(i) = idx {
            leaders.insert(i);
        }
    }

    // Statements that transfer or structure control start a block on the
    // following line. FUNCTION and SUB definitions also open their own block.
    for (i, line) in program.lines.iter().enumerate() {
        if line
            .stmts
            .iter()
            .any(|s| matches!(s.kind, StmtKind::Function { .. } | StmtKind::Sub { .. }))
        {
            leaders.insert(i);
        }
        // Loop tails are join points: they open their own block.
        if line.stmts.iter().any(|s| {
            matches!(
                s.kind,
                StmtKind::Next { .. } | StmtKind::Wend | StmtKind::Until { .. } | StmtKind::Loop { .. }
            )
        }) {
            leaders.insert(i);
        }
        if line.stmts.iter().any(starts_block_after) && i + 1 < program.lines.len() {
            leaders.insert(i + 1);
        }
    }

    // Pass B: materialize blocks from leader runs.
    let mut blocks: Vec<BasicBlock> = Vec::new();
    let mut line_to_block = BTreeMap::new();
    let mut first_line_to_block = BTreeMap::new();
    let mut line_index_to_block: Vec<usize> = vec![0; program.lines.len()];
    for (i, line) in program.lines.iter().enumerate() {
        if leaders.contains(&i) || blocks.is_empty() {
            let id = blocks.len();
            blocks.push(BasicBlock {
                id,
                first_line: 0,
                line_numbers: Vec::new(),
                stmts: Vec::new(),
                successors: Vec::new(),
                predecessors: Vec::new(),
            });
        }
        let id = blocks.len() - 1;
        line_index_to_block[i] = id;
        let block = &mut blocks[id];
        if line.number > 0 {
            if block.first_line == 0 {
                block.first_line = line.number;
                first_line_to_block.insert(line.number, id);
            }
            block.line_numbers.push(line.number);
            line_to_block.insert(line.number, id);
        }
        for (j, _) in line.stmts.iter().enumerate() {
            block.stmts.push((i, j));
        }
    }

    // Pass C: edges.
    let mut edges: Vec<Edge> = Vec::new();
    let resolve = |t: &JumpTarget| -> Option<usize> {
        match t {
            JumpTarget::Line(n) => {
                let idx = symbols
                    .lookup_line(*n)
                    .map(|s| s.program_index)
                    .or_else(|| next_line_index(program, *n))?;
                Some(line_index_to_block[idx])
            }
            JumpTarget::Label(l) => {
                let sym = symbols.lookup_label(&canon(l))?;
                line_index_to_block.get(sym.program_index).copied()
            }
        }
    };
    for block in &blocks {
        let mut falls_through = true;
        for &(li, si) in &block.stmts {
            let stmt = &program.lines[li].stmts[si];
            match &stmt.kind {
                StmtKind::Goto { target } => {
                    if let Some(t) = resolve(target) {
                        edges.push(Edge { source: block.id, target: t, kind: EdgeKind::Unconditional });
                    }
                }
                StmtKind::Gosub { target } => {
                    if let Some(t) = resolve(target) {
                        edges.push(Edge { source: block.id, target: t, kind: EdgeKind::Call });
                    }
                }
                StmtKind::OnGoto { targets, .. } => {
                    for t in targets {
                        if let Some(tb) = resolve(t) {
                            edges.push(Edge {
                                source: block.id,
                                target: tb,
                                kind: EdgeKind::ConditionalTrue,
                            });
                        }
                    }
                }
                StmtKind::OnGosub { targets, .. } => {
                    for t in targets {
                        if let Some(tb) = resolve(t) {
                            edges.push(Edge { source: block.id, target: tb, kind: EdgeKind::Call });
                        }
                    }
                }
                StmtKind::If { goto_line: Some(n), .. } => {
                    if let Some(tb) = resolve(&JumpTarget::Line(*n)) {
                        edges.push(Edge {
                            source: block.id,
                            target: tb,
                            kind: EdgeKind::ConditionalTrue,
                        });
                    }
                }
                _ => {}
            }
        }
        if let Some(&(li, si)) = block.stmts.last() {
            let last = &program.lines[li].stmts[si];
            if is_terminator(last) {
                falls_through = false;
            }
            if matches!(last.kind, StmtKind::If { goto_line: Some(_), .. }) {
                // The false side of IF ... THEN <line> continues below.
                if block.id + 1 < blocks.len() {
                    edges.push(Edge {
                        source: block.id,
                        target: block.id + 1,
                        kind: EdgeKind::ConditionalFalse,
                    });
                }
                falls_through = false;
            }
        }
        if falls_through && block.id + 1 < blocks.len() {
            edges.push(Edge { source: block.id, target: block.id + 1, kind: EdgeKind::Fallthrough });
        }
    }

    // Successor/predecessor lists, deduplicated in edge order.
    for e in &edges {
        if !blocks[e.source].successors.contains(&e.target) {
            blocks[e.source].successors.push(e.target);
        }
        if !blocks[e.target].predecessors.contains(&e.source) {
            blocks[e.target].predecessors.push(e.source);
        }
    }

    Cfg { blocks, edges, line_to_block, first_line_to_block }
}

fn next_line_index(program: &Program, n: u32) -> Option<usize> {
    program
        .lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.number >= n)
        .map(|(i, _)| i)
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolt_parser::parse_source;
    use bolt_registry::CommandRegistry;
    use bolt_semantic::SemanticAnalyzer;

    fn build_cfg(src: &str) -> (Cfg, Program) {
        let reg = CommandRegistry::with_defaults();
        let out = parse_source(src, &reg);
        let mut analyzer = SemanticAnalyzer::new(&reg);
        let _ = analyzer.analyze(&out.program, &out.options);
        let cfg = build(&out.program, analyzer.symbols());
        (cfg, out.program)
    }

    #[test]
    fn straight_line_is_one_block() {
        let (cfg, _) = build_cfg("10 LET A = 1\n20 LET B = 2\n30 LET C = 3\n");
        assert_eq!(cfg.block_count(), 1);
        assert_eq!(cfg.blocks[0].line_numbers, vec![10, 20, 30]);
    }

    #[test]
    fn goto_target_starts_a_block() {
        let (cfg, _) = build_cfg("10 GOTO 30\n20 LET A = 1\n30 LET B = 2\n");
        // Line 20 follows a terminator, line 30 is a jump target.
        assert_eq!(cfg.block_count(), 3);
        assert_eq!(cfg.block_for_line(30), Some(2));
        let goto_edges: Vec<&Edge> =
            cfg.edges.iter().filter(|e| e.kind == EdgeKind::Unconditional).collect();
        assert_eq!(goto_edges.len(), 1);
        assert_eq!(goto_edges[0].target, 2);
        // No fallthrough out of the GOTO block.
        assert!(!cfg.blocks[0].successors.contains(&1));
    }

    #[test]
    fn block_for_line_or_next_fills_gaps() {
        let (cfg, _) = build_cfg("10 GOTO 50\n20 PRINT \"x\"\n30 END\n100 PRINT \"y\"\n");
        let target = cfg.block_for_line_or_next(50).unwrap();
        assert_eq!(cfg.blocks[target].first_line, 100);
        assert_eq!(cfg.block_for_line(100), Some(target));
        assert_eq!(cfg.block_for_line(50), None);
    }

    #[test]
    fn back_edge_detection() {
        let (cfg, _) = build_cfg("10 LET A = A + 1\n20 IF A < 3 THEN 10\n30 END\n");
        assert!(cfg.is_back_edge(20, 10));
        assert!(!cfg.is_back_edge(10, 30));
    }

    #[test]
    fn conditional_goto_edges() {
        let (cfg, _) = build_cfg("10 IF X THEN 40\n20 LET A = 1\n30 END\n40 END\n");
        assert!(cfg.edges.iter().any(|e| e.kind == EdgeKind::ConditionalTrue));
        assert!(cfg.edges.iter().any(|e| e.kind == EdgeKind::ConditionalFalse));
    }

    #[test]
    fn gosub_gets_call_edge_and_fallthrough() {
        let (cfg, _) = build_cfg("10 GOSUB 100\n20 END\n100 RETURN\n");
        assert!(cfg.edges.iter().any(|e| e.kind == EdgeKind::Call));
        assert!(cfg
            .edges
            .iter()
            .any(|e| e.kind == EdgeKind::Fallthrough && e.source == 0 && e.target == 1));
    }

    #[test]
    fn loop_body_starts_its_own_block() {
        let (cfg, _) = build_cfg("10 FOR I = 1 TO 3\n20 PRINT I\n30 NEXT I\n");
        // FOR line, body, NEXT line each begin a block.
        let body = cfg.block_for_line(20).unwrap();
        assert!(body > 0);
        assert_eq!(cfg.blocks[body].line_numbers, vec![20]);
    }

    #[test]
    fn label_target_resolves_to_its_line() {
        let (cfg, _) = build_cfg("10 LET A = 1\n20 :top\n30 LET A = A + 1\n40 GOTO top\n");
        let label_block = cfg.block_for_line(20).unwrap();
        assert!(cfg
            .edges
            .iter()
            .any(|e| e.kind == EdgeKind::Unconditional && e.target == label_block));
    }
}
