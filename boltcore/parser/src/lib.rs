/*
Bolt BASIC — parser

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

//! Recursive-descent parser for Bolt BASIC. Total: syntax errors are
//! recorded and parsing resumes at the next statement separator, so the
//! returned `Program` may be partial but is always well-formed.
//!
//! OPTION statements are folded into a `CompilerOptions` record and never
//! appear in the AST. `IDENT(args)` sites that do not name a registry
//! function are parsed as `ArrayAccess`; the semantic analyzer resolves them.

use std::collections::HashSet;

use bolt_ast::{
    ArrayDecl, BinOp, DoCondition, ElseifClause, EventHandlerKind, ExitKind, Expr, ExprKind,
    JumpTarget, PrintItem, PrintSep, Program, ProgramLine, Stmt, StmtKind, UnaryOp, WhenClause,
};
use bolt_common::{normalize_name, BasicError, CompilerOptions, Diagnostic, Result, SourceLocation, Stage};
use bolt_lexer::{Literal, Token, TokenKind};
use bolt_registry::{is_valid_event_name, CommandKind, CommandRegistry};

pub struct ParseOutput {
    pub program: Program,
    pub options: CompilerOptions,
    pub diagnostics: Vec<Diagnostic>,
}

/// Tokenize and parse a whole source text against the given registry.
pub fn parse_source(src: &str, registry: &CommandRegistry) -> ParseOutput {
    let (tokens, mut diagnostics) = bolt_lexer::tokenize(src);
    let mut parser = Parser::new(tokens, registry);
    let program = parser.parse_program();
    diagnostics.extend(parser.diagnostics);
    ParseOutput { program, options: parser.options, diagnostics }
}

pub struct Parser<'r> {
    tokens: Vec<Token>,
    i: usize,
    registry: &'r CommandRegistry,
    options: CompilerOptions,
    diagnostics: Vec<Diagnostic>,
    saw_executable: bool,
}

impl<'r> Parser<'r> {
    pub fn new(tokens: Vec<Token>, registry: &'r CommandRegistry) -> Self {
        Self {
            tokens,
            i: 0,
            registry,
            options: CompilerOptions::default(),
            diagnostics: Vec::new(),
            saw_executable: false,
        }
    }

    pub fn parse_program(&mut self) -> Program {
        let mut program = Program::new();
        let mut seen: HashSet<u32> = HashSet::new();
        let mut last_number = 0u32;
        while !self.check(TokenKind::Eof) {
            while self.match_k(TokenKind::Newline) {}
            if self.check(TokenKind::Eof) {
                break;
            }
            let loc = self.peek_loc();
            let mut number = 0u32;
            let mut drop_line = false;
            if self.check(TokenKind::LineNumber) {
                let t = self.next().unwrap();
                let n = match t.literal {
                    Some(Literal::Int(n)) => n,
                    _ => 0,
                };
                if !(1..=65535).contains(&n) {
                    self.diag_error("INVALID_LINE_NUMBER", format!("line number {} out of range 1..65535", n), t.loc);
                    drop_line = true;
                } else {
                    number = n as u32;
                    if !seen.insert(number) {
                        self.diag_error(
                            "DUPLICATE_LINE_NUMBER",
                            format!("duplicate line number {}", number),
                            t.loc,
                        );
                        drop_line = true;
                    } else if number <= last_number {
                        self.diag_error(
                            "LINE_OUT_OF_ORDER",
                            format!("line number {} not greater than previous line {}", number, last_number),
                            t.loc,
                        );
                        drop_line = true;
                    }
                }
            }
            let stmts = self.parse_line_statements();
            if drop_line {
                continue;
            }
            if number > 0 {
                last_number = number;
            }
            if number > 0 || !stmts.is_empty() {
                program.lines.push(ProgramLine { number, stmts, loc });
            }
        }
        program
    }

    // ---- statement lists --------------------------------------------------

    fn parse_line_statements(&mut self) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        loop {
            if self.match_k(TokenKind::Newline) || self.check(TokenKind::Eof) {
                break;
            }
            if self.check(TokenKind::Colon) {
                if let Some(label) = self.try_label() {
                    stmts.push(label);
                } else {
                    self.next();
                }
                continue;
            }
            match self.parse_stmt() {
                Ok(Some(s)) => stmts.push(s),
                Ok(None) => {}
                Err(_) => self.recover_to_stmt_end(),
            }
            if self.check(TokenKind::Colon) {
                continue;
            }
            if self.match_k(TokenKind::Newline) || self.check(TokenKind::Eof) {
                break;
            }
            let loc = self.peek_loc();
            self.diag_error(
                "UNEXPECTED_TOKEN",
                format!("unexpected token '{}' after statement", self.peek_lexeme()),
                loc,
            );
            self.recover_to_stmt_end();
        }
        stmts
    }

    /// Does a `:name` label definition start here? A colon followed by an
    /// identifier that is not a registry command and ends the statement.
    fn label_ahead(&self) -> bool {
        if !self.check(TokenKind::Colon) {
            return false;
        }
        let Some(next) = self.tokens.get(self.i + 1) else { return false };
        if next.kind != TokenKind::Ident || self.registry.contains(&next.lexeme) {
            return false;
        }
        let after = self.tokens.get(self.i + 2).map(|t| t.kind);
        matches!(after, Some(TokenKind::Newline) | Some(TokenKind::Colon) | Some(TokenKind::Eof) | None)
    }

    /// `:name` at statement position declares a label, unless the name is a
    /// registry command (then the colon was just a separator).
    fn try_label(&mut self) -> Option<Stmt> {
        if !self.label_ahead() {
            return None;
        }
        let loc = self.peek_loc();
        self.next(); // ':'
        let name = self.next().unwrap().lexeme;
        Some(Stmt::new(StmtKind::Label { name }, loc))
    }

    /// Skip newlines, absorbed line numbers, and separator colons inside a
    /// multi-line construct. Stops short of a label definition.
    fn skip_block_separators(&mut self) {
        loop {
            if self.match_k(TokenKind::Newline) {
                self.match_k(TokenKind::LineNumber);
                continue;
            }
            if self.check(TokenKind::Colon) && !self.label_ahead() {
                self.next();
                continue;
            }
            break;
        }
    }

    fn parse_block_until(&mut self, is_term: fn(&Parser) -> bool, what: &str) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            self.skip_block_separators();
            if let Some(label) = self.try_label() {
                stmts.push(label);
                continue;
            }
            if is_term(self) {
                break;
            }
            if self.check(TokenKind::Eof) {
                let loc = self.peek_loc();
                return self.err("UNTERMINATED_BLOCK", format!("unterminated {}", what), loc);
            }
            match self.parse_stmt() {
                Ok(Some(s)) => stmts.push(s),
                Ok(None) => {}
                Err(_) => self.recover_to_stmt_end(),
            }
        }
        Ok(stmts)
    }

    // ---- statements -------------------------------------------------------

    /// Parse a single statement. Returns `Ok(None)` for OPTION statements,
    /// which only update `self.options`.
    fn parse_stmt(&mut self) -> Result<Option<Stmt>> {
        let loc = self.peek_loc();
        let kind = match self.peek_kind() {
            Some(k) => k,
            None => return self.err("UNEXPECTED_EOF", "unexpected end of input".to_string(), loc),
        };
        let stmt = match kind {
            TokenKind::Option => {
                self.parse_option()?;
                return Ok(None);
            }
            TokenKind::Print => self.parse_print(loc)?,
            TokenKind::Console => self.parse_console(loc)?,
            TokenKind::Input => self.parse_input(loc, false)?,
            TokenKind::Line => {
                self.next();
                self.expect(TokenKind::Input)?;
                self.parse_input_tail(loc, true)?
            }
            TokenKind::Let => {
                self.next();
                self.parse_assignment(loc)?
            }
            TokenKind::If => self.parse_if(loc)?,
            TokenKind::Case => self.parse_case(loc)?,
            TokenKind::For => self.parse_for(loc)?,
            TokenKind::Next => {
                self.next();
                let variable = if self.check(TokenKind::Ident) { Some(self.next().unwrap().lexeme) } else { None };
                Stmt::new(StmtKind::Next { variable }, loc)
            }
            TokenKind::While => {
                self.next();
                let cond = self.parse_expr()?;
                Stmt::new(StmtKind::While { cond: Box::new(cond) }, loc)
            }
            TokenKind::Wend => {
                self.next();
                Stmt::new(StmtKind::Wend, loc)
            }
            TokenKind::Repeat => {
                self.next();
                Stmt::new(StmtKind::Repeat, loc)
            }
            TokenKind::Until => {
                self.next();
                let cond = self.parse_expr()?;
                Stmt::new(StmtKind::Until { cond: Box::new(cond) }, loc)
            }
            TokenKind::Do => {
                self.next();
                let (condition, cond) = self.parse_do_condition()?;
                Stmt::new(StmtKind::Do { condition, cond }, loc)
            }
            TokenKind::Loop => {
                self.next();
                let (condition, cond) = self.parse_do_condition()?;
                Stmt::new(StmtKind::Loop { condition, cond }, loc)
            }
            TokenKind::Exit => self.parse_exit(loc)?,
            TokenKind::Goto => {
                self.next();
                let target = self.parse_jump_target()?;
                Stmt::new(StmtKind::Goto { target }, loc)
            }
            TokenKind::Gosub => {
                self.next();
                let target = self.parse_jump_target()?;
                Stmt::new(StmtKind::Gosub { target }, loc)
            }
            TokenKind::On => self.parse_on(loc)?,
            TokenKind::Return => {
                self.next();
                let value =
                    if self.at_stmt_end() { None } else { Some(Box::new(self.parse_expr()?)) };
                Stmt::new(StmtKind::Return { value }, loc)
            }
            TokenKind::Dim => self.parse_dim(loc)?,
            TokenKind::Def => self.parse_def_fn(loc)?,
            TokenKind::Function => self.parse_function(loc, false)?,
            TokenKind::Sub => self.parse_function(loc, true)?,
            TokenKind::Call => self.parse_call(loc)?,
            TokenKind::Data => self.parse_data(loc)?,
            TokenKind::Read => {
                self.next();
                let mut vars = vec![self.expect_ident()?];
                while self.match_k(TokenKind::Comma) {
                    vars.push(self.expect_ident()?);
                }
                Stmt::new(StmtKind::Read { vars }, loc)
            }
            TokenKind::Restore => {
                self.next();
                let target = if self.at_stmt_end() { None } else { Some(self.parse_jump_target()?) };
                Stmt::new(StmtKind::Restore { target }, loc)
            }
            TokenKind::Open => self.parse_open(loc)?,
            TokenKind::Close => {
                self.next();
                let file = if self.at_stmt_end() { None } else { Some(self.parse_file_number()?) };
                Stmt::new(StmtKind::Close { file }, loc)
            }
            TokenKind::Constant => {
                self.next();
                let name = self.expect_ident()?.to_ascii_uppercase();
                self.expect(TokenKind::Assign)?;
                let value = self.parse_expr()?;
                Stmt::new(StmtKind::Constant { name, value: Box::new(value) }, loc)
            }
            TokenKind::Rem => {
                self.next();
                Stmt::new(StmtKind::Rem, loc)
            }
            TokenKind::End => {
                self.next();
                match self.peek_kind() {
                    Some(TokenKind::If) | Some(TokenKind::Function) | Some(TokenKind::Sub)
                    | Some(TokenKind::Case) => {
                        let what = self.peek_lexeme();
                        return self.err(
                            "UNMATCHED_END",
                            format!("END {} without matching opener", what),
                            loc,
                        );
                    }
                    _ => {}
                }
                Stmt::new(StmtKind::End, loc)
            }
            TokenKind::Play => self.parse_play(loc)?,
            TokenKind::PlaySound => self.parse_play_sound(loc)?,
            TokenKind::Ident => self.parse_ident_statement(loc)?,
            other => {
                let lexeme = self.peek_lexeme();
                return self.err(
                    "UNEXPECTED_TOKEN",
                    format!("unexpected token '{}' ({:?}) at start of statement", lexeme, other),
                    loc,
                );
            }
        };
        if !matches!(stmt.kind, StmtKind::Rem | StmtKind::Label { .. } | StmtKind::Data { .. }) {
            self.saw_executable = true;
        }
        Ok(Some(stmt))
    }

    fn parse_option(&mut self) -> Result<()> {
        let loc = self.peek_loc();
        self.next(); // OPTION
        if self.saw_executable {
            return self.err(
                "OPTION_PLACEMENT",
                "OPTION must appear before the first executable statement".to_string(),
                loc,
            );
        }
        match self.peek_kind() {
            Some(TokenKind::Base) => {
                self.next();
                let t = self.expect(TokenKind::Number)?;
                match t.literal {
                    Some(Literal::Int(0)) => self.options.array_base = 0,
                    Some(Literal::Int(1)) => self.options.array_base = 1,
                    _ => {
                        return self.err(
                            "BAD_OPTION",
                            "OPTION BASE requires 0 or 1".to_string(),
                            t.loc,
                        )
                    }
                }
            }
            Some(TokenKind::Unicode) => {
                self.next();
                self.options.unicode_mode = true;
            }
            Some(TokenKind::Error) => {
                self.next();
                self.options.error_tracking = self.parse_on_off()?;
            }
            Some(TokenKind::Cancellable) => {
                self.next();
                self.options.cancellable_loops = self.parse_on_off()?;
            }
            Some(TokenKind::Explicit) => {
                self.next();
                self.options.explicit_mode = true;
            }
            _ => {
                let lexeme = self.peek_lexeme();
                return self.err("BAD_OPTION", format!("unknown OPTION '{}'", lexeme), loc);
            }
        }
        Ok(())
    }

    fn parse_on_off(&mut self) -> Result<bool> {
        let loc = self.peek_loc();
        match self.peek_kind() {
            Some(TokenKind::On) => {
                self.next();
                Ok(true)
            }
            Some(TokenKind::Off) => {
                self.next();
                Ok(false)
            }
            _ => self.err("BAD_OPTION", "expected ON or OFF".to_string(), loc),
        }
    }

    fn parse_print(&mut self, loc: SourceLocation) -> Result<Stmt> {
        self.next(); // PRINT
        // PRINT AT x, y, items
        if self.match_k(TokenKind::At) {
            let x = self.parse_expr()?;
            self.expect(TokenKind::Comma)?;
            let y = self.parse_expr()?;
            if self.match_k(TokenKind::Using) {
                let fmt = self.parse_expr()?;
                self.expect(TokenKind::Semicolon)?;
                let values = self.parse_expr_list()?;
                return Ok(Stmt::new(
                    StmtKind::PrintAt {
                        x: Box::new(x),
                        y: Box::new(y),
                        items: Vec::new(),
                        using_fmt: Some(Box::new(fmt)),
                        using_values: values,
                        fg: None,
                        bg: None,
                    },
                    loc,
                ));
            }
            self.match_k(TokenKind::Comma);
            let (items, _) = self.parse_print_items()?;
            return Ok(Stmt::new(
                StmtKind::PrintAt {
                    x: Box::new(x),
                    y: Box::new(y),
                    items,
                    using_fmt: None,
                    using_values: Vec::new(),
                    fg: None,
                    bg: None,
                },
                loc,
            ));
        }
        // PRINT #n, items
        let mut file = 0u16;
        if self.check(TokenKind::Hash) {
            file = self.parse_file_number()?;
            self.expect(TokenKind::Comma)?;
        }
        // PRINT USING fmt; values
        if self.match_k(TokenKind::Using) {
            let fmt = self.parse_expr()?;
            self.expect(TokenKind::Semicolon)?;
            let values = self.parse_expr_list()?;
            return Ok(Stmt::new(
                StmtKind::Print {
                    file,
                    items: Vec::new(),
                    using_fmt: Some(Box::new(fmt)),
                    using_values: values,
                    trailing_newline: true,
                },
                loc,
            ));
        }
        let (items, trailing_newline) = self.parse_print_items()?;
        Ok(Stmt::new(
            StmtKind::Print { file, items, using_fmt: None, using_values: Vec::new(), trailing_newline },
            loc,
        ))
    }

    fn parse_console(&mut self, loc: SourceLocation) -> Result<Stmt> {
        self.next(); // CONSOLE
        let (items, trailing_newline) = self.parse_print_items()?;
        Ok(Stmt::new(StmtKind::Console { items, trailing_newline }, loc))
    }

    /// Shared item list for PRINT/CONSOLE: expressions separated by `,`
    /// (tab to next zone) or `;` (no space). A trailing separator suppresses
    /// the final newline.
    fn parse_print_items(&mut self) -> Result<(Vec<PrintItem>, bool)> {
        let mut items = Vec::new();
        let mut trailing_newline = true;
        while !self.at_stmt_end() {
            let expr = self.parse_expr()?;
            let sep = if self.match_k(TokenKind::Semicolon) {
                PrintSep::Semicolon
            } else if self.match_k(TokenKind::Comma) {
                PrintSep::Comma
            } else {
                PrintSep::None
            };
            items.push(PrintItem { expr, sep });
            match sep {
                PrintSep::None => break,
                _ => {
                    if self.at_stmt_end() {
                        trailing_newline = false;
                        break;
                    }
                }
            }
        }
        Ok((items, trailing_newline))
    }

    fn parse_input(&mut self, loc: SourceLocation, line_input: bool) -> Result<Stmt> {
        self.next(); // INPUT
        self.parse_input_tail(loc, line_input)
    }

    fn parse_input_tail(&mut self, loc: SourceLocation, line_input: bool) -> Result<Stmt> {
        // INPUT AT x, y, "prompt", var
        if !line_input && self.match_k(TokenKind::At) {
            let x = self.parse_expr()?;
            self.expect(TokenKind::Comma)?;
            let y = self.parse_expr()?;
            self.expect(TokenKind::Comma)?;
            let prompt = match self.peek_kind() {
                Some(TokenKind::StringLit) => {
                    let t = self.next().unwrap();
                    self.expect(TokenKind::Comma)?;
                    match t.literal {
                        Some(Literal::Str(s)) => s,
                        _ => String::new(),
                    }
                }
                _ => String::new(),
            };
            let var = self.expect_ident()?;
            return Ok(Stmt::new(
                StmtKind::InputAt { x: Box::new(x), y: Box::new(y), prompt, var },
                loc,
            ));
        }
        let mut file = 0u16;
        if self.check(TokenKind::Hash) {
            file = self.parse_file_number()?;
            self.expect(TokenKind::Comma)?;
        }
        let mut prompt = String::new();
        if file == 0 && self.check(TokenKind::StringLit) {
            let t = self.next().unwrap();
            if let Some(Literal::Str(s)) = t.literal {
                prompt = s;
            }
            if !self.match_k(TokenKind::Semicolon) {
                self.expect(TokenKind::Comma)?;
            }
        }
        let mut vars = vec![self.expect_ident()?];
        while self.match_k(TokenKind::Comma) {
            vars.push(self.expect_ident()?);
        }
        Ok(Stmt::new(StmtKind::Input { file, prompt, vars, line_input }, loc))
    }

    /// LET-form or bare assignment, after any LET keyword was consumed.
    fn parse_assignment(&mut self, loc: SourceLocation) -> Result<Stmt> {
        let variable = self.expect_ident()?;
        let mut indices = Vec::new();
        if self.match_k(TokenKind::LParen) {
            if !self.check(TokenKind::RParen) {
                indices = self.parse_expr_list()?;
            }
            self.expect(TokenKind::RParen)?;
        }
        self.expect(TokenKind::Assign)?;
        let value = self.parse_expr()?;
        Ok(Stmt::new(StmtKind::Let { variable, indices, value: Box::new(value) }, loc))
    }

    fn parse_if(&mut self, loc: SourceLocation) -> Result<Stmt> {
        self.next(); // IF
        let cond = self.parse_expr()?;
        // IF cond GOTO n
        if self.match_k(TokenKind::Goto) {
            let n = self.expect_line_ref()?;
            return Ok(Stmt::new(
                StmtKind::If {
                    cond: Box::new(cond),
                    goto_line: Some(n),
                    then_stmts: Vec::new(),
                    elseifs: Vec::new(),
                    else_stmts: Vec::new(),
                },
                loc,
            ));
        }
        self.expect(TokenKind::Then)?;
        // IF cond THEN n
        if self.check(TokenKind::Number) {
            let n = self.expect_line_ref()?;
            return Ok(Stmt::new(
                StmtKind::If {
                    cond: Box::new(cond),
                    goto_line: Some(n),
                    then_stmts: Vec::new(),
                    elseifs: Vec::new(),
                    else_stmts: Vec::new(),
                },
                loc,
            ));
        }
        if self.check(TokenKind::Newline) {
            return self.parse_if_block(loc, cond);
        }
        // Single-line IF
        let mut then_stmts = Vec::new();
        loop {
            if let Some(s) = self.parse_stmt()? {
                then_stmts.push(s);
            }
            if self.check(TokenKind::Colon) {
                // Peek past the colon for ELSE
                if self.tokens.get(self.i + 1).map(|t| t.kind) == Some(TokenKind::Else) {
                    self.next();
                    break;
                }
                self.next();
                continue;
            }
            break;
        }
        let mut else_stmts = Vec::new();
        if self.match_k(TokenKind::Else) {
            loop {
                if let Some(s) = self.parse_stmt()? {
                    else_stmts.push(s);
                }
                if self.check(TokenKind::Colon) {
                    self.next();
                    continue;
                }
                break;
            }
        }
        Ok(Stmt::new(
            StmtKind::If {
                cond: Box::new(cond),
                goto_line: None,
                then_stmts,
                elseifs: Vec::new(),
                else_stmts,
            },
            loc,
        ))
    }

    fn parse_if_block(&mut self, loc: SourceLocation, cond: Expr) -> Result<Stmt> {
        fn term(p: &Parser) -> bool {
            p.check(TokenKind::Elseif)
                || p.check(TokenKind::Else)
                || p.check(TokenKind::Endif)
                || p.check_end_pair(TokenKind::If)
        }
        let then_stmts = self.parse_block_until(term, "IF block")?;
        let mut elseifs = Vec::new();
        while self.check(TokenKind::Elseif) {
            self.next();
            let c = self.parse_expr()?;
            self.expect(TokenKind::Then)?;
            let body = self.parse_block_until(term, "ELSEIF block")?;
            elseifs.push(ElseifClause { cond: c, stmts: body });
        }
        let mut else_stmts = Vec::new();
        if self.match_k(TokenKind::Else) {
            fn else_term(p: &Parser) -> bool {
                p.check(TokenKind::Endif) || p.check_end_pair(TokenKind::If)
            }
            else_stmts = self.parse_block_until(else_term, "ELSE block")?;
        }
        self.consume_end_pair(TokenKind::If, TokenKind::Endif)?;
        Ok(Stmt::new(
            StmtKind::If { cond: Box::new(cond), goto_line: None, then_stmts, elseifs, else_stmts },
            loc,
        ))
    }

    fn parse_case(&mut self, loc: SourceLocation) -> Result<Stmt> {
        self.next(); // CASE
        let selector = self.parse_expr()?;
        self.expect(TokenKind::Of)?;
        fn term(p: &Parser) -> bool {
            p.check(TokenKind::When)
                || p.check(TokenKind::Otherwise)
                || p.check(TokenKind::Endcase)
                || p.check_end_pair(TokenKind::Case)
        }
        // Nothing but separators may appear before the first WHEN.
        self.skip_block_separators();
        let mut whens = Vec::new();
        while self.check(TokenKind::When) {
            self.next();
            let values = self.parse_expr_list()?;
            let stmts = self.parse_block_until(term, "WHEN block")?;
            whens.push(WhenClause { values, stmts });
        }
        let mut otherwise = Vec::new();
        if self.match_k(TokenKind::Otherwise) {
            fn oterm(p: &Parser) -> bool {
                p.check(TokenKind::Endcase) || p.check_end_pair(TokenKind::Case)
            }
            otherwise = self.parse_block_until(oterm, "OTHERWISE block")?;
        }
        self.consume_end_pair(TokenKind::Case, TokenKind::Endcase)?;
        Ok(Stmt::new(StmtKind::Case { selector: Box::new(selector), whens, otherwise }, loc))
    }

    fn parse_for(&mut self, loc: SourceLocation) -> Result<Stmt> {
        self.next(); // FOR
        let variable = self.expect_ident()?;
        // FOR v [, idx] IN array
        if self.check(TokenKind::In) || self.check(TokenKind::Comma) {
            let index_variable = if self.match_k(TokenKind::Comma) {
                Some(self.expect_ident()?)
            } else {
                None
            };
            self.expect(TokenKind::In)?;
            let array = self.parse_expr()?;
            return Ok(Stmt::new(
                StmtKind::ForIn { variable, index_variable, array: Box::new(array) },
                loc,
            ));
        }
        self.expect(TokenKind::Assign)?;
        let start = self.parse_expr()?;
        self.expect(TokenKind::To)?;
        let end = self.parse_expr()?;
        let step = if self.match_k(TokenKind::Step) { Some(Box::new(self.parse_expr()?)) } else { None };
        Ok(Stmt::new(
            StmtKind::For { variable, start: Box::new(start), end: Box::new(end), step },
            loc,
        ))
    }

    fn parse_do_condition(&mut self) -> Result<(DoCondition, Option<Box<Expr>>)> {
        if self.match_k(TokenKind::While) {
            let cond = self.parse_expr()?;
            Ok((DoCondition::While, Some(Box::new(cond))))
        } else if self.match_k(TokenKind::Until) {
            let cond = self.parse_expr()?;
            Ok((DoCondition::Until, Some(Box::new(cond))))
        } else {
            Ok((DoCondition::Plain, None))
        }
    }

    fn parse_exit(&mut self, loc: SourceLocation) -> Result<Stmt> {
        self.next(); // EXIT
        let kind = match self.peek_kind() {
            Some(TokenKind::For) => ExitKind::For,
            Some(TokenKind::Do) => ExitKind::Do,
            Some(TokenKind::While) => ExitKind::While,
            Some(TokenKind::Repeat) => ExitKind::Repeat,
            Some(TokenKind::Function) => ExitKind::Function,
            Some(TokenKind::Sub) => ExitKind::Sub,
            _ => {
                let lexeme = self.peek_lexeme();
                return self.err("BAD_EXIT", format!("EXIT cannot leave '{}'", lexeme), loc);
            }
        };
        self.next();
        Ok(Stmt::new(StmtKind::Exit(kind), loc))
    }

    fn parse_on(&mut self, loc: SourceLocation) -> Result<Stmt> {
        self.next(); // ON
        // ON <event> CALL/GOTO/GOSUB target
        let is_event = match self.peek_kind() {
            Some(TokenKind::Ident) | Some(TokenKind::Error) => is_valid_event_name(&self.peek_lexeme()),
            _ => false,
        };
        if is_event {
            let event = self.next().unwrap().lexeme.to_ascii_uppercase();
            let handler = match self.peek_kind() {
                Some(TokenKind::Call) => EventHandlerKind::Call,
                Some(TokenKind::Goto) => EventHandlerKind::Goto,
                Some(TokenKind::Gosub) => EventHandlerKind::Gosub,
                _ => {
                    let lexeme = self.peek_lexeme();
                    return self.err(
                        "BAD_EVENT_HANDLER",
                        format!("expected CALL, GOTO, or GOSUB after event name, found '{}'", lexeme),
                        loc,
                    );
                }
            };
            self.next();
            self.match_k(TokenKind::Colon);
            let (target, is_line_number) = match self.peek_kind() {
                Some(TokenKind::Number) => {
                    let t = self.next().unwrap();
                    let n = match t.literal {
                        Some(Literal::Int(n)) => n,
                        Some(Literal::Num(n)) => n as i64,
                        _ => 0,
                    };
                    (n.to_string(), true)
                }
                Some(TokenKind::Ident) => {
                    let name = self.next().unwrap().lexeme;
                    let target = if handler == EventHandlerKind::Call { normalize_name(&name) } else { name };
                    (target, false)
                }
                _ => {
                    let lexeme = self.peek_lexeme();
                    return self.err(
                        "BAD_EVENT_HANDLER",
                        format!("expected handler target, found '{}'", lexeme),
                        loc,
                    );
                }
            };
            return Ok(Stmt::new(
                StmtKind::OnEvent { event, handler, target, is_line_number },
                loc,
            ));
        }
        // ON expr GOTO/GOSUB/CALL list
        let selector = self.parse_expr()?;
        match self.peek_kind() {
            Some(TokenKind::Goto) => {
                self.next();
                let targets = self.parse_jump_target_list()?;
                Ok(Stmt::new(StmtKind::OnGoto { selector: Box::new(selector), targets }, loc))
            }
            Some(TokenKind::Gosub) => {
                self.next();
                let targets = self.parse_jump_target_list()?;
                Ok(Stmt::new(StmtKind::OnGosub { selector: Box::new(selector), targets }, loc))
            }
            Some(TokenKind::Call) => {
                self.next();
                let mut functions = vec![normalize_name(&self.expect_ident()?)];
                while self.match_k(TokenKind::Comma) {
                    functions.push(normalize_name(&self.expect_ident()?));
                }
                Ok(Stmt::new(StmtKind::OnCall { selector: Box::new(selector), functions }, loc))
            }
            _ => {
                let lexeme = self.peek_lexeme();
                self.err(
                    "BAD_ON",
                    format!("expected GOTO, GOSUB, or CALL after ON selector, found '{}'", lexeme),
                    loc,
                )
            }
        }
    }

    fn parse_dim(&mut self, loc: SourceLocation) -> Result<Stmt> {
        self.next(); // DIM
        let mut arrays = Vec::new();
        loop {
            let decl_loc = self.peek_loc();
            let name = self.expect_ident()?;
            self.expect(TokenKind::LParen)?;
            let dims = self.parse_expr_list()?;
            self.expect(TokenKind::RParen)?;
            arrays.push(ArrayDecl { name, dims, loc: decl_loc });
            if !self.match_k(TokenKind::Comma) {
                break;
            }
        }
        Ok(Stmt::new(StmtKind::Dim { arrays }, loc))
    }

    fn parse_def_fn(&mut self, loc: SourceLocation) -> Result<Stmt> {
        self.next(); // DEF
        self.expect(TokenKind::Fn)?;
        let raw = self.expect_ident()?;
        let name = normalize_name(&raw);
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                params.push(normalize_name(&self.expect_ident()?));
                if !self.match_k(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Assign)?;
        let body = self.parse_expr()?;
        Ok(Stmt::new(StmtKind::DefFn { name, params, body: Box::new(body) }, loc))
    }

    fn parse_function(&mut self, loc: SourceLocation, is_sub: bool) -> Result<Stmt> {
        self.next(); // FUNCTION or SUB
        let raw = self.expect_ident()?;
        let name = normalize_name(&raw);
        let mut params = Vec::new();
        if self.match_k(TokenKind::LParen) {
            if !self.check(TokenKind::RParen) {
                loop {
                    params.push(normalize_name(&self.expect_ident()?));
                    if !self.match_k(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen)?;
        }
        let body = if is_sub {
            fn term(p: &Parser) -> bool {
                p.check_end_pair(TokenKind::Sub)
            }
            let body = self.parse_block_until(term, "SUB body")?;
            self.next(); // END
            self.next(); // SUB
            body
        } else {
            fn term(p: &Parser) -> bool {
                p.check_end_pair(TokenKind::Function)
            }
            let body = self.parse_block_until(term, "FUNCTION body")?;
            self.next(); // END
            self.next(); // FUNCTION
            body
        };
        let kind = if is_sub {
            StmtKind::Sub { name, params, body }
        } else {
            StmtKind::Function { name, params, body }
        };
        Ok(Stmt::new(kind, loc))
    }

    fn parse_call(&mut self, loc: SourceLocation) -> Result<Stmt> {
        self.next(); // CALL
        let name = normalize_name(&self.expect_ident()?);
        let mut args = Vec::new();
        if self.match_k(TokenKind::LParen) {
            if !self.check(TokenKind::RParen) {
                args = self.parse_expr_list()?;
            }
            self.expect(TokenKind::RParen)?;
        }
        Ok(Stmt::new(StmtKind::Call { name, args }, loc))
    }

    fn parse_data(&mut self, loc: SourceLocation) -> Result<Stmt> {
        self.next(); // DATA
        let mut values = Vec::new();
        while !self.at_stmt_end() {
            let value = match self.peek_kind() {
                Some(TokenKind::StringLit) => {
                    let t = self.next().unwrap();
                    match t.literal {
                        Some(Literal::Str(s)) => s,
                        _ => String::new(),
                    }
                }
                Some(TokenKind::Minus) => {
                    self.next();
                    let t = self.expect(TokenKind::Number)?;
                    format!("-{}", t.lexeme)
                }
                Some(TokenKind::Number) => self.next().unwrap().lexeme,
                Some(TokenKind::Ident) => self.next().unwrap().lexeme,
                _ => {
                    let lexeme = self.peek_lexeme();
                    let l = self.peek_loc();
                    return self.err("BAD_DATA", format!("bad DATA value '{}'", lexeme), l);
                }
            };
            values.push(value);
            if !self.match_k(TokenKind::Comma) {
                break;
            }
        }
        Ok(Stmt::new(StmtKind::Data { values }, loc))
    }

    fn parse_open(&mut self, loc: SourceLocation) -> Result<Stmt> {
        self.next(); // OPEN
        let t = self.expect(TokenKind::StringLit)?;
        let filename = match t.literal {
            Some(Literal::Str(s)) => s,
            _ => String::new(),
        };
        self.expect(TokenKind::For)?;
        let mode = match self.peek_kind() {
            Some(TokenKind::Input) => "INPUT",
            Some(TokenKind::Output) => "OUTPUT",
            Some(TokenKind::Append) => "APPEND",
            _ => {
                let lexeme = self.peek_lexeme();
                return self.err("BAD_OPEN", format!("bad file mode '{}'", lexeme), loc);
            }
        }
        .to_string();
        self.next();
        self.expect(TokenKind::As)?;
        let file = self.parse_file_number()?;
        Ok(Stmt::new(StmtKind::Open { filename, mode, file }, loc))
    }

    fn parse_play(&mut self, loc: SourceLocation) -> Result<Stmt> {
        self.next(); // PLAY
        let filename = self.parse_expr()?;
        let mut format = None;
        let mut wav_output = None;
        let mut slot = None;
        let mut fast_render = false;
        loop {
            match self.peek_kind() {
                Some(TokenKind::As) => {
                    self.next();
                    format = Some(match self.peek_kind() {
                        Some(TokenKind::StringLit) => {
                            let t = self.next().unwrap();
                            match t.literal {
                                Some(Literal::Str(s)) => s,
                                _ => String::new(),
                            }
                        }
                        // Format names may collide with keywords (MOD).
                        Some(TokenKind::Mod) => {
                            self.next();
                            "MOD".to_string()
                        }
                        _ => self.expect_ident()?.to_ascii_uppercase(),
                    });
                }
                Some(TokenKind::IntoWav) => {
                    self.next();
                    wav_output = Some(Box::new(self.parse_expr()?));
                }
                Some(TokenKind::IntoSlot) => {
                    self.next();
                    slot = Some(Box::new(self.parse_expr()?));
                }
                Some(TokenKind::Fast) => {
                    self.next();
                    fast_render = true;
                }
                _ => break,
            }
        }
        Ok(Stmt::new(
            StmtKind::Play { filename: Box::new(filename), format, wav_output, slot, fast_render },
            loc,
        ))
    }

    fn parse_play_sound(&mut self, loc: SourceLocation) -> Result<Stmt> {
        self.next(); // PLAY_SOUND
        let sound_id = self.parse_expr()?;
        self.expect(TokenKind::Comma)?;
        let volume = self.parse_expr()?;
        let cap_duration =
            if self.match_k(TokenKind::Comma) { Some(Box::new(self.parse_expr()?)) } else { None };
        Ok(Stmt::new(
            StmtKind::PlaySound { sound_id: Box::new(sound_id), volume: Box::new(volume), cap_duration },
            loc,
        ))
    }

    /// Statement starting with an identifier: MID$ assignment, a registry
    /// command, or a bare assignment.
    fn parse_ident_statement(&mut self, loc: SourceLocation) -> Result<Stmt> {
        let lexeme = self.peek_lexeme();
        let upper = lexeme.to_ascii_uppercase();
        if upper == "MID$" && self.tokens.get(self.i + 1).map(|t| t.kind) == Some(TokenKind::LParen) {
            return self.parse_mid_assign(loc);
        }
        if let Some(def) = self.registry.get(&upper) {
            // Function-kind entries can still be statements (value discarded),
            // but only commands may omit parentheses.
            let name = def.name.clone();
            self.next();
            let mut args = Vec::new();
            if self.match_k(TokenKind::LParen) {
                if !self.check(TokenKind::RParen) {
                    args = self.parse_expr_list()?;
                }
                self.expect(TokenKind::RParen)?;
            } else if !self.at_stmt_end() && def.kind == CommandKind::Command {
                args = self.parse_expr_list()?;
            }
            if args.is_empty() {
                return Ok(Stmt::new(StmtKind::SimpleCommand { name }, loc));
            }
            return Ok(Stmt::new(StmtKind::Command { name, args }, loc));
        }
        self.parse_assignment(loc)
    }

    fn parse_mid_assign(&mut self, loc: SourceLocation) -> Result<Stmt> {
        self.next(); // MID$
        self.expect(TokenKind::LParen)?;
        let variable = self.expect_ident()?;
        self.expect(TokenKind::Comma)?;
        let position = self.parse_expr()?;
        self.expect(TokenKind::Comma)?;
        let length = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Assign)?;
        let replacement = self.parse_expr()?;
        Ok(Stmt::new(
            StmtKind::MidAssign {
                variable,
                position: Box::new(position),
                length: Box::new(length),
                replacement: Box::new(replacement),
            },
            loc,
        ))
    }

    // ---- expressions ------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>> {
        let mut out = vec![self.parse_expr()?];
        while self.match_k(TokenKind::Comma) {
            out.push(self.parse_expr()?);
        }
        Ok(out)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Or) => BinOp::Or,
                Some(TokenKind::Xor) => BinOp::Xor,
                _ => break,
            };
            let loc = self.peek_loc();
            self.next();
            let rhs = self.parse_and()?;
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, loc);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_not()?;
        while self.check(TokenKind::And) {
            let loc = self.peek_loc();
            self.next();
            let rhs = self.parse_not()?;
            lhs = Expr::new(
                ExprKind::Binary { op: BinOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                loc,
            );
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.check(TokenKind::Not) {
            let loc = self.peek_loc();
            self.next();
            let expr = self.parse_not()?;
            return Ok(Expr::new(ExprKind::Unary { op: UnaryOp::Not, expr: Box::new(expr) }, loc));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Assign) => BinOp::Eq,
                Some(TokenKind::NotEq) => BinOp::Ne,
                Some(TokenKind::Lt) => BinOp::Lt,
                Some(TokenKind::LtEq) => BinOp::Le,
                Some(TokenKind::Gt) => BinOp::Gt,
                Some(TokenKind::GtEq) => BinOp::Ge,
                _ => break,
            };
            let loc = self.peek_loc();
            self.next();
            let rhs = self.parse_additive()?;
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, loc);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => break,
            };
            let loc = self.peek_loc();
            self.next();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, loc);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_int_divide()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                _ => break,
            };
            let loc = self.peek_loc();
            self.next();
            let rhs = self.parse_int_divide()?;
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, loc);
        }
        Ok(lhs)
    }

    fn parse_int_divide(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_mod()?;
        while self.check(TokenKind::Backslash) {
            let loc = self.peek_loc();
            self.next();
            let rhs = self.parse_mod()?;
            lhs = Expr::new(
                ExprKind::Binary { op: BinOp::IntDiv, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                loc,
            );
        }
        Ok(lhs)
    }

    fn parse_mod(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        while self.check(TokenKind::Mod) {
            let loc = self.peek_loc();
            self.next();
            let rhs = self.parse_unary()?;
            lhs = Expr::new(
                ExprKind::Binary { op: BinOp::Mod, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                loc,
            );
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek_kind() {
            Some(TokenKind::Minus) => {
                let loc = self.peek_loc();
                self.next();
                let expr = self.parse_unary()?;
                Ok(Expr::new(ExprKind::Unary { op: UnaryOp::Neg, expr: Box::new(expr) }, loc))
            }
            Some(TokenKind::Plus) => {
                let loc = self.peek_loc();
                self.next();
                let expr = self.parse_unary()?;
                Ok(Expr::new(ExprKind::Unary { op: UnaryOp::Plus, expr: Box::new(expr) }, loc))
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if self.check(TokenKind::Caret) {
            let loc = self.peek_loc();
            self.next();
            // Right-associative; the exponent may itself carry a unary sign.
            let exponent = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::Binary { op: BinOp::Pow, lhs: Box::new(base), rhs: Box::new(exponent) },
                loc,
            ));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let loc = self.peek_loc();
        match self.peek_kind() {
            Some(TokenKind::Number) => {
                let t = self.next().unwrap();
                let value = match t.literal {
                    Some(Literal::Int(n)) => n as f64,
                    Some(Literal::Num(n)) => n,
                    _ => 0.0,
                };
                Ok(Expr::number(value, loc))
            }
            Some(TokenKind::StringLit) => {
                let t = self.next().unwrap();
                let s = match t.literal {
                    Some(Literal::Str(s)) => s,
                    _ => String::new(),
                };
                Ok(Expr::string(s, loc))
            }
            Some(TokenKind::Iif) => {
                self.next();
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::Comma)?;
                let then_value = self.parse_expr()?;
                self.expect(TokenKind::Comma)?;
                let else_value = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::new(
                    ExprKind::Iif {
                        cond: Box::new(cond),
                        then_value: Box::new(then_value),
                        else_value: Box::new(else_value),
                    },
                    loc,
                ))
            }
            Some(TokenKind::Fn) => {
                self.next();
                let name = normalize_name(&self.expect_ident()?);
                self.expect(TokenKind::LParen)?;
                let mut args = Vec::new();
                if !self.check(TokenKind::RParen) {
                    args = self.parse_expr_list()?;
                }
                self.expect(TokenKind::RParen)?;
                Ok(Expr::new(ExprKind::FunctionCall { name, args, is_fn: true }, loc))
            }
            Some(TokenKind::Ident) => {
                let name = self.next().unwrap().lexeme;
                if self.match_k(TokenKind::LParen) {
                    let mut args = Vec::new();
                    if !self.check(TokenKind::RParen) {
                        args = self.parse_expr_list()?;
                    }
                    self.expect(TokenKind::RParen)?;
                    if let Some(def) = self.registry.get(&name) {
                        if def.kind == CommandKind::Function {
                            return Ok(Expr::new(
                                ExprKind::RegistryCall {
                                    name: def.name.clone(),
                                    args,
                                    return_type: def.return_type,
                                },
                                loc,
                            ));
                        }
                    }
                    // Array access and user/builtin calls share this shape;
                    // the semantic analyzer disambiguates.
                    return Ok(Expr::new(ExprKind::ArrayAccess { name, indices: args }, loc));
                }
                Ok(Expr::var(name, loc))
            }
            Some(TokenKind::LParen) => {
                self.next();
                let e = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(e)
            }
            _ => {
                let lexeme = self.peek_lexeme();
                self.err("EXPECTED_EXPR", format!("expected expression, found '{}'", lexeme), loc)
            }
        }
    }

    // ---- shared small parsers --------------------------------------------

    fn parse_jump_target(&mut self) -> Result<JumpTarget> {
        self.match_k(TokenKind::Colon);
        let loc = self.peek_loc();
        match self.peek_kind() {
            Some(TokenKind::Number) => {
                let t = self.next().unwrap();
                match t.literal {
                    Some(Literal::Int(n)) if (1..=65535).contains(&n) => Ok(JumpTarget::Line(n as u32)),
                    _ => self.err("BAD_TARGET", format!("bad line number '{}'", t.lexeme), loc),
                }
            }
            Some(TokenKind::Ident) => Ok(JumpTarget::Label(self.next().unwrap().lexeme)),
            _ => {
                let lexeme = self.peek_lexeme();
                self.err("BAD_TARGET", format!("expected line number or label, found '{}'", lexeme), loc)
            }
        }
    }

    fn parse_jump_target_list(&mut self) -> Result<Vec<JumpTarget>> {
        let mut out = vec![self.parse_jump_target()?];
        while self.match_k(TokenKind::Comma) {
            out.push(self.parse_jump_target()?);
        }
        Ok(out)
    }

    fn expect_line_ref(&mut self) -> Result<u32> {
        let loc = self.peek_loc();
        let t = self.expect(TokenKind::Number)?;
        match t.literal {
            Some(Literal::Int(n)) if (1..=65535).contains(&n) => Ok(n as u32),
            _ => self.err("BAD_TARGET", format!("bad line number '{}'", t.lexeme), loc),
        }
    }

    fn parse_file_number(&mut self) -> Result<u16> {
        self.expect(TokenKind::Hash)?;
        let loc = self.peek_loc();
        let t = self.expect(TokenKind::Number)?;
        match t.literal {
            Some(Literal::Int(n)) if (1..=255).contains(&n) => Ok(n as u16),
            _ => self.err("BAD_FILE_NUMBER", format!("bad file number '{}'", t.lexeme), loc),
        }
    }

    // ---- small helpers ----------------------------------------------------

    fn at_stmt_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            Some(TokenKind::Newline) | Some(TokenKind::Colon) | Some(TokenKind::Eof)
                | Some(TokenKind::Else) | None
        )
    }

    fn check_end_pair(&self, second: TokenKind) -> bool {
        self.check(TokenKind::End) && self.tokens.get(self.i + 1).map(|t| t.kind) == Some(second)
    }

    fn consume_end_pair(&mut self, second: TokenKind, single: TokenKind) -> Result<()> {
        if self.match_k(single) {
            return Ok(());
        }
        if self.check_end_pair(second) {
            self.next();
            self.next();
            return Ok(());
        }
        let loc = self.peek_loc();
        let lexeme = self.peek_lexeme();
        self.err("UNTERMINATED_BLOCK", format!("expected block terminator, found '{}'", lexeme), loc)
    }

    fn recover_to_stmt_end(&mut self) {
        while !matches!(
            self.peek_kind(),
            Some(TokenKind::Newline) | Some(TokenKind::Colon) | Some(TokenKind::Eof) | None
        ) {
            self.next();
        }
    }

    fn err<T>(&mut self, code: &'static str, message: String, loc: SourceLocation) -> Result<T> {
        self.diagnostics.push(Diagnostic::error(Stage::Parser, code, message.clone(), loc));
        Err(BasicError(message))
    }

    fn diag_error(&mut self, code: &'static str, message: String, loc: SourceLocation) {
        self.diagnostics.push(Diagnostic::error(Stage::Parser, code, message, loc));
    }

    fn expect(&mut self, k: TokenKind) -> Result<Token> {
        if self.check(k) {
            Ok(self.next().unwrap())
        } else {
            let loc = self.peek_loc();
            let lexeme = self.peek_lexeme();
            self.err("UNEXPECTED_TOKEN", format!("expected {:?}, found '{}'", k, lexeme), loc)
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        if self.check(TokenKind::Ident) {
            Ok(self.next().unwrap().lexeme)
        } else {
            let loc = self.peek_loc();
            let lexeme = self.peek_lexeme();
            self.err("EXPECTED_IDENT", format!("expected identifier, found '{}'", lexeme), loc)
        }
    }

    fn check(&self, k: TokenKind) -> bool {
        self.peek_kind() == Some(k)
    }

    fn match_k(&mut self, k: TokenKind) -> bool {
        if self.check(k) {
            self.next();
            true
        } else {
            false
        }
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.i).map(|t| t.kind)
    }

    fn peek_lexeme(&self) -> String {
        self.tokens.get(self.i).map(|t| t.lexeme.clone()).unwrap_or_default()
    }

    fn peek_loc(&self) -> SourceLocation {
        self.tokens.get(self.i).map(|t| t.loc).unwrap_or_default()
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.i).cloned();
        if t.is_some() {
            self.i += 1;
        }
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolt_registry::CommandRegistry;

    fn parse(src: &str) -> ParseOutput {
        let reg = CommandRegistry::with_defaults();
        parse_source(src, &reg)
    }

    fn parse_ok(src: &str) -> ParseOutput {
        let out = parse(src);
        let errors: Vec<_> = out.diagnostics.iter().filter(|d| d.is_error()).collect();
        assert!(errors.is_empty(), "unexpected parse errors: {:?}", errors);
        out
    }

    #[test]
    fn hello_world_shape() {
        let out = parse_ok("10 PRINT \"HELLO\"\n20 END\n");
        assert_eq!(out.program.lines.len(), 2);
        assert_eq!(out.program.lines[0].number, 10);
        assert!(matches!(out.program.lines[0].stmts[0].kind, StmtKind::Print { .. }));
        assert!(matches!(out.program.lines[1].stmts[0].kind, StmtKind::End));
    }

    #[test]
    fn options_are_collected_not_emitted() {
        let out = parse_ok("OPTION BASE 0\nOPTION UNICODE\nOPTION ERROR OFF\n10 PRINT 1\n");
        assert_eq!(out.options.array_base, 0);
        assert!(out.options.unicode_mode);
        assert!(!out.options.error_tracking);
        // OPTION lines leave no statements behind.
        let total: usize = out.program.lines.iter().map(|l| l.stmts.len()).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn option_after_executable_is_rejected() {
        let out = parse("10 PRINT 1\n20 OPTION BASE 0\n");
        assert!(out.diagnostics.iter().any(|d| d.code == "OPTION_PLACEMENT"));
        assert_eq!(out.options.array_base, 1);
    }

    #[test]
    fn duplicate_line_numbers_rejected() {
        let out = parse("10 PRINT 1\n10 PRINT 2\n");
        assert!(out.diagnostics.iter().any(|d| d.code == "DUPLICATE_LINE_NUMBER"));
        assert_eq!(out.program.lines.len(), 1);
    }

    #[test]
    fn precedence_power_over_unary() {
        // -2^2 parses as -(2^2)
        let out = parse_ok("10 LET X = -2^2\n");
        let StmtKind::Let { value, .. } = &out.program.lines[0].stmts[0].kind else { panic!() };
        let ExprKind::Unary { op: UnaryOp::Neg, expr } = &value.kind else {
            panic!("expected unary neg at root, got {:?}", value.kind)
        };
        assert!(matches!(expr.kind, ExprKind::Binary { op: BinOp::Pow, .. }));
    }

    #[test]
    fn precedence_mod_tighter_than_int_divide() {
        // 10 \ 4 MOD 3 parses as 10 \ (4 MOD 3)
        let out = parse_ok("10 LET X = 10 \\ 4 MOD 3\n");
        let StmtKind::Let { value, .. } = &out.program.lines[0].stmts[0].kind else { panic!() };
        let ExprKind::Binary { op: BinOp::IntDiv, rhs, .. } = &value.kind else {
            panic!("expected int divide at root")
        };
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Mod, .. }));
    }

    #[test]
    fn ident_parens_is_ambiguous_array_access() {
        let out = parse_ok("10 LET X = A(1, 2)\n");
        let StmtKind::Let { value, .. } = &out.program.lines[0].stmts[0].kind else { panic!() };
        assert!(matches!(&value.kind, ExprKind::ArrayAccess { name, indices } if name == "A" && indices.len() == 2));
    }

    #[test]
    fn registry_function_binds_at_parse_time() {
        let out = parse_ok("10 LET X = MOUSE_X()\n");
        let StmtKind::Let { value, .. } = &out.program.lines[0].stmts[0].kind else { panic!() };
        assert!(matches!(&value.kind, ExprKind::RegistryCall { name, .. } if name == "MOUSE_X"));
    }

    #[test]
    fn registry_command_as_bare_statement() {
        let out = parse_ok("10 CLS\n20 GFX_LINE 0, 0, 100, 100, 255, 1\n");
        assert!(matches!(&out.program.lines[0].stmts[0].kind, StmtKind::SimpleCommand { name } if name == "CLS"));
        assert!(
            matches!(&out.program.lines[1].stmts[0].kind, StmtKind::Command { name, args } if name == "GFX_LINE" && args.len() == 6)
        );
    }

    #[test]
    fn single_line_if_with_else() {
        let out = parse_ok("10 IF X > 1 THEN PRINT 1 : PRINT 2 ELSE PRINT 3\n");
        let StmtKind::If { then_stmts, else_stmts, goto_line, .. } = &out.program.lines[0].stmts[0].kind
        else {
            panic!()
        };
        assert_eq!(goto_line, &None);
        assert_eq!(then_stmts.len(), 2);
        assert_eq!(else_stmts.len(), 1);
    }

    #[test]
    fn if_then_line_number() {
        let out = parse_ok("10 IF X THEN 100\n100 END\n");
        let StmtKind::If { goto_line, .. } = &out.program.lines[0].stmts[0].kind else { panic!() };
        assert_eq!(goto_line, &Some(100));
    }

    #[test]
    fn multi_line_if_absorbs_numbered_lines() {
        let src = "10 IF X THEN\n20 PRINT 1\n30 ELSEIF Y THEN\n40 PRINT 2\n50 ELSE\n60 PRINT 3\n70 END IF\n80 END\n";
        let out = parse_ok(src);
        assert_eq!(out.program.lines.len(), 2);
        let StmtKind::If { then_stmts, elseifs, else_stmts, .. } = &out.program.lines[0].stmts[0].kind
        else {
            panic!()
        };
        assert_eq!(then_stmts.len(), 1);
        assert_eq!(elseifs.len(), 1);
        assert_eq!(else_stmts.len(), 1);
    }

    #[test]
    fn case_when_otherwise() {
        let src = "10 CASE N OF\n20 WHEN 1, 2, 3\n30 PRINT \"low\"\n40 WHEN 4\n50 PRINT \"four\"\n60 OTHERWISE\n70 PRINT \"high\"\n80 ENDCASE\n";
        let out = parse_ok(src);
        let StmtKind::Case { whens, otherwise, .. } = &out.program.lines[0].stmts[0].kind else { panic!() };
        assert_eq!(whens.len(), 2);
        assert_eq!(whens[0].values.len(), 3);
        assert_eq!(otherwise.len(), 1);
    }

    #[test]
    fn def_fn_names_are_normalized() {
        let out = parse_ok("10 DEF FN F$(X$) = X$ + \"!\"\n");
        let StmtKind::DefFn { name, params, .. } = &out.program.lines[0].stmts[0].kind else { panic!() };
        assert_eq!(name, "F_STRING");
        assert_eq!(params, &["X_STRING".to_string()]);
    }

    #[test]
    fn function_sub_blocks() {
        let src = "10 FUNCTION ADD%(A%, B%)\n20 RETURN A% + B%\n30 END FUNCTION\n40 SUB SHOUT(S$)\n50 PRINT S$\n60 END SUB\n";
        let out = parse_ok(src);
        assert!(matches!(&out.program.lines[0].stmts[0].kind, StmtKind::Function { name, .. } if name == "ADD_INT"));
        assert!(matches!(&out.program.lines[1].stmts[0].kind, StmtKind::Sub { name, .. } if name == "SHOUT"));
    }

    #[test]
    fn on_goto_and_on_event() {
        let out = parse_ok("10 ON K GOTO 100, 200, 300\n20 ON KEYPRESSED CALL handler\n100 END\n");
        assert!(
            matches!(&out.program.lines[0].stmts[0].kind, StmtKind::OnGoto { targets, .. } if targets.len() == 3)
        );
        let StmtKind::OnEvent { event, handler, is_line_number, .. } = &out.program.lines[1].stmts[0].kind
        else {
            panic!()
        };
        assert_eq!(event, "KEYPRESSED");
        assert_eq!(*handler, EventHandlerKind::Call);
        assert!(!is_line_number);
    }

    #[test]
    fn labels_and_jumps() {
        let out = parse_ok("10 :start\n20 GOTO start\n");
        assert!(matches!(&out.program.lines[0].stmts[0].kind, StmtKind::Label { name } if name == "start"));
        assert!(
            matches!(&out.program.lines[1].stmts[0].kind, StmtKind::Goto { target: JumpTarget::Label(l) } if l == "start")
        );
    }

    #[test]
    fn data_read_restore() {
        let out = parse_ok("10 DATA 1, -2.5, hello, \"a, b\"\n20 READ A, B$, C\n30 RESTORE 10\n");
        let StmtKind::Data { values } = &out.program.lines[0].stmts[0].kind else { panic!() };
        assert_eq!(values, &["1", "-2.5", "hello", "a, b"]);
        assert!(matches!(&out.program.lines[1].stmts[0].kind, StmtKind::Read { vars } if vars.len() == 3));
        assert!(
            matches!(&out.program.lines[2].stmts[0].kind, StmtKind::Restore { target: Some(JumpTarget::Line(10)) })
        );
    }

    #[test]
    fn file_io_forms() {
        let src = "10 OPEN \"out.txt\" FOR OUTPUT AS #1\n20 PRINT #1, \"X\"\n30 LINE INPUT #1, L$\n40 CLOSE #1\n50 CLOSE\n";
        let out = parse_ok(src);
        assert!(matches!(&out.program.lines[0].stmts[0].kind, StmtKind::Open { file: 1, .. }));
        assert!(matches!(&out.program.lines[1].stmts[0].kind, StmtKind::Print { file: 1, .. }));
        assert!(matches!(&out.program.lines[2].stmts[0].kind, StmtKind::Input { file: 1, line_input: true, .. }));
        assert!(matches!(&out.program.lines[3].stmts[0].kind, StmtKind::Close { file: Some(1) }));
        assert!(matches!(&out.program.lines[4].stmts[0].kind, StmtKind::Close { file: None }));
    }

    #[test]
    fn error_recovery_keeps_later_lines() {
        let out = parse("10 FOR = TO\n20 PRINT 1\n");
        assert!(out.diagnostics.iter().any(|d| d.is_error()));
        assert!(out
            .program
            .lines
            .iter()
            .any(|l| l.number == 20 && matches!(l.stmts[0].kind, StmtKind::Print { .. })));
    }

    #[test]
    fn mid_assignment() {
        let out = parse_ok("10 MID$(A$, 2, 3) = \"xyz\"\n");
        assert!(matches!(&out.program.lines[0].stmts[0].kind, StmtKind::MidAssign { variable, .. } if variable == "A$"));
    }

    #[test]
    fn play_forms() {
        let out = parse_ok("10 PLAY \"tune.mod\" AS MOD INTO_WAV \"out.wav\" FAST\n20 PLAY_SOUND 3, 0.5, 1.5\n");
        let StmtKind::Play { format, wav_output, fast_render, .. } = &out.program.lines[0].stmts[0].kind
        else {
            panic!()
        };
        assert_eq!(format.as_deref(), Some("MOD"));
        assert!(wav_output.is_some());
        assert!(fast_render);
        assert!(matches!(&out.program.lines[1].stmts[0].kind, StmtKind::PlaySound { cap_duration: Some(_), .. }));
    }

    #[test]
    fn for_in_form() {
        let out = parse_ok("10 FOR V, I IN A()\n20 NEXT\n");
        let StmtKind::ForIn { variable, index_variable, .. } = &out.program.lines[0].stmts[0].kind
        else {
            panic!()
        };
        assert_eq!(variable, "V");
        assert_eq!(index_variable.as_deref(), Some("I"));
    }
}
