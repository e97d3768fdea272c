//! Lexer for Bolt BASIC. Single pass over UTF-8 text, total: it always
//! returns a token stream plus an accumulated error list and resynchronizes
//! after bad input instead of bailing out.
//!
//! Keywords are canonicalized to uppercase in the token stream; identifier
//! casing is preserved verbatim. A sigil (`% # ! $ &`) directly after an
//! identifier is folded into its lexeme. An integer that begins a logical
//! line becomes a `LineNumber` token.

use bolt_common::{Diagnostic, SourceLocation, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Punctuation
    LParen,
    RParen,
    Comma,
    Semicolon,
    Colon,
    Hash,
    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Backslash,
    Caret,
    Assign,
    Lt,
    Gt,
    LtEq,
    GtEq,
    NotEq,
    // Literals / identifiers
    Ident,
    Number,
    StringLit,
    LineNumber,
    // Keywords — statement heads
    Print,
    Console,
    Input,
    Line,
    Let,
    If,
    Then,
    Else,
    Elseif,
    Endif,
    Case,
    Of,
    When,
    Otherwise,
    Endcase,
    For,
    To,
    Step,
    Next,
    In,
    While,
    Wend,
    Repeat,
    Until,
    Do,
    Loop,
    Exit,
    Goto,
    Gosub,
    Return,
    On,
    Off,
    Dim,
    Def,
    Fn,
    Function,
    Sub,
    End,
    Call,
    Data,
    Read,
    Restore,
    Open,
    Close,
    As,
    Output,
    Append,
    Constant,
    Rem,
    Option,
    Base,
    Explicit,
    Unicode,
    Error,
    Cancellable,
    Using,
    At,
    Play,
    PlaySound,
    IntoWav,
    IntoSlot,
    Fast,
    Iif,
    // Operator keywords
    And,
    Or,
    Not,
    Xor,
    Mod,
    // Structure
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Num(f64),
    Str(String),
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub literal: Option<Literal>,
    pub loc: SourceLocation,
}

fn keyword_kind(upper: &str) -> Option<TokenKind> {
    let kind = match upper {
        "PRINT" => TokenKind::Print,
        "CONSOLE" => TokenKind::Console,
        "INPUT" => TokenKind::Input,
        "LINE" => TokenKind::Line,
        "LET" => TokenKind::Let,
        "IF" => TokenKind::If,
        "THEN" => TokenKind::Then,
        "ELSE" => TokenKind::Else,
        "ELSEIF" | "ELSIF" => TokenKind::Elseif,
        "ENDIF" => TokenKind::Endif,
        "CASE" => TokenKind::Case,
        "OF" => TokenKind::Of,
        "WHEN" => TokenKind::When,
        "OTHERWISE" => TokenKind::Otherwise,
        "ENDCASE" => TokenKind::Endcase,
        "FOR" => TokenKind::For,
        "TO" => TokenKind::To,
        "STEP" => TokenKind::Step,
        "NEXT" => TokenKind::Next,
        "IN" => TokenKind::In,
        "WHILE" => TokenKind::While,
        "WEND" => TokenKind::Wend,
        "REPEAT" => TokenKind::Repeat,
        "UNTIL" => TokenKind::Until,
        "DO" => TokenKind::Do,
        "LOOP" => TokenKind::Loop,
        "EXIT" => TokenKind::Exit,
        "GOTO" => TokenKind::Goto,
        "GOSUB" => TokenKind::Gosub,
        "RETURN" => TokenKind::Return,
        "ON" => TokenKind::On,
        "OFF" => TokenKind::Off,
        "DIM" => TokenKind::Dim,
        "DEF" => TokenKind::Def,
        "FN" => TokenKind::Fn,
        "FUNCTION" => TokenKind::Function,
        "SUB" => TokenKind::Sub,
        "END" => TokenKind::End,
        "CALL" => TokenKind::Call,
        "DATA" => TokenKind::Data,
        "READ" => TokenKind::Read,
        "RESTORE" => TokenKind::Restore,
        "OPEN" => TokenKind::Open,
        "CLOSE" => TokenKind::Close,
        "AS" => TokenKind::As,
        "OUTPUT" => TokenKind::Output,
        "APPEND" => TokenKind::Append,
        "CONSTANT" => TokenKind::Constant,
        "REM" => TokenKind::Rem,
        "OPTION" => TokenKind::Option,
        "BASE" => TokenKind::Base,
        "EXPLICIT" => TokenKind::Explicit,
        "UNICODE" => TokenKind::Unicode,
        "ERROR" => TokenKind::Error,
        "CANCELLABLE" => TokenKind::Cancellable,
        "USING" => TokenKind::Using,
        "AT" => TokenKind::At,
        "PLAY" => TokenKind::Play,
        "PLAY_SOUND" => TokenKind::PlaySound,
        "INTO_WAV" => TokenKind::IntoWav,
        "INTO_SLOT" => TokenKind::IntoSlot,
        "FAST" => TokenKind::Fast,
        "IIF" => TokenKind::Iif,
        "AND" => TokenKind::And,
        "OR" => TokenKind::Or,
        "NOT" => TokenKind::Not,
        "XOR" => TokenKind::Xor,
        "MOD" => TokenKind::Mod,
        _ => return None,
    };
    Some(kind)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_sigil(c: char) -> bool {
    matches!(c, '%' | '#' | '!' | '$' | '&')
}

pub struct Lexer<'a> {
    src: &'a str,
    chars: std::str::Chars<'a>,
    cur: Option<char>,
    pos: usize,
    start: usize,
    line: u32,
    col: u32,
    start_loc: SourceLocation,
    at_line_start: bool,
    errors: Vec<Diagnostic>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        let mut l = Self {
            src,
            chars: src.chars(),
            cur: None,
            pos: 0,
            start: 0,
            line: 1,
            col: 0,
            start_loc: SourceLocation::new(1, 1),
            at_line_start: true,
            errors: Vec::new(),
        };
        l.advance();
        l.col = 1;
        l
    }

    /// Tokenize the whole input. Never fails: bad input is reported in the
    /// diagnostic list and scanning resumes at the next safe character.
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut out = Vec::new();
        loop {
            let t = self.next_token();
            let eof = t.kind == TokenKind::Eof;
            out.push(t);
            if eof {
                break;
            }
        }
        (out, self.errors)
    }

    fn next_token(&mut self) -> Token {
        self.skip_ws_and_comments();
        self.start = self.pos;
        self.start_loc = SourceLocation::new(self.line, self.col);
        let ch = match self.cur {
            Some(c) => c,
            None => return self.make(TokenKind::Eof),
        };
        let line_start = self.at_line_start;
        self.at_line_start = false;
        match ch {
            '\n' => {
                self.advance();
                self.at_line_start = true;
                self.make(TokenKind::Newline)
            }
            '(' => self.single(TokenKind::LParen),
            ')' => self.single(TokenKind::RParen),
            ',' => self.single(TokenKind::Comma),
            ';' => self.single(TokenKind::Semicolon),
            ':' => self.single(TokenKind::Colon),
            '#' => self.single(TokenKind::Hash),
            '+' => self.single(TokenKind::Plus),
            '-' => self.single(TokenKind::Minus),
            '*' => {
                self.advance();
                if self.match_char('*') {
                    self.make(TokenKind::Caret)
                } else {
                    self.make(TokenKind::Star)
                }
            }
            '/' => self.single(TokenKind::Slash),
            '\\' => self.single(TokenKind::Backslash),
            '^' => self.single(TokenKind::Caret),
            '=' => self.single(TokenKind::Assign),
            '<' => {
                self.advance();
                if self.match_char('=') {
                    self.make(TokenKind::LtEq)
                } else if self.match_char('>') {
                    self.make(TokenKind::NotEq)
                } else {
                    self.make(TokenKind::Lt)
                }
            }
            '>' => {
                self.advance();
                if self.match_char('=') {
                    self.make(TokenKind::GtEq)
                } else {
                    self.make(TokenKind::Gt)
                }
            }
            '"' => self.string(),
            '&' => {
                // &H.. hex literal
                self.advance();
                if self.cur == Some('H') || self.cur == Some('h') {
                    self.advance();
                    self.hex_number()
                } else {
                    self.error("UNKNOWN_CHAR", "unexpected character '&'".to_string());
                    self.resync();
                    self.next_token()
                }
            }
            c if c.is_ascii_digit() => self.number(line_start),
            c if is_ident_start(c) => self.ident_or_kw(),
            c => {
                self.error("UNKNOWN_CHAR", format!("unexpected character '{}'", c));
                self.advance();
                self.next_token()
            }
        }
    }

    fn single(&mut self, kind: TokenKind) -> Token {
        self.advance();
        self.make(kind)
    }

    fn string(&mut self) -> Token {
        // opening quote in cur at entry
        self.advance();
        let mut s = String::new();
        loop {
            match self.cur {
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\n') | None => {
                    self.error("UNTERMINATED_STRING", "unterminated string literal".to_string());
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.cur {
                        Some('"') => {
                            s.push('"');
                            self.advance();
                        }
                        Some('\\') => {
                            s.push('\\');
                            self.advance();
                        }
                        Some(c2) => {
                            s.push('\\');
                            s.push(c2);
                            self.advance();
                        }
                        None => break,
                    }
                }
                Some(c) => {
                    s.push(c);
                    self.advance();
                }
            }
        }
        let mut tok = self.make(TokenKind::StringLit);
        tok.literal = Some(Literal::Str(s));
        tok
    }

    fn number(&mut self, line_start: bool) -> Token {
        while self.cur.map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }
        let mut is_float = false;
        if self.cur == Some('.') && self.peek().map_or(false, |c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while self.cur.map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.cur, Some('e') | Some('E'))
            && self
                .peek()
                .map_or(false, |c| c.is_ascii_digit() || c == '+' || c == '-')
        {
            is_float = true;
            self.advance();
            if matches!(self.cur, Some('+') | Some('-')) {
                self.advance();
            }
            while self.cur.map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        let src = self.src;
        let lex = &src[self.start..self.pos];
        if line_start && !is_float {
            // Leading integer on a logical line is its line number.
            let n = lex.parse::<i64>().unwrap_or_else(|_| {
                self.errors.push(Diagnostic::error(
                    Stage::Lexer,
                    "INVALID_NUMBER",
                    format!("line number '{}' out of range", lex),
                    self.start_loc,
                ));
                0
            });
            let mut tok = self.make(TokenKind::LineNumber);
            tok.literal = Some(Literal::Int(n));
            return tok;
        }
        let mut tok = self.make(TokenKind::Number);
        if is_float {
            match lex.parse::<f64>() {
                Ok(n) => tok.literal = Some(Literal::Num(n)),
                Err(_) => {
                    self.error("INVALID_NUMBER", format!("invalid numeric literal '{}'", lex));
                    tok.literal = Some(Literal::Num(0.0));
                }
            }
        } else {
            match lex.parse::<i64>() {
                Ok(n) => tok.literal = Some(Literal::Int(n)),
                Err(_) => {
                    self.error("INVALID_NUMBER", format!("integer literal '{}' overflows", lex));
                    tok.literal = Some(Literal::Int(0));
                }
            }
        }
        tok
    }

    fn hex_number(&mut self) -> Token {
        let digits_start = self.pos;
        while self.cur.map_or(false, |c| c.is_ascii_hexdigit()) {
            self.advance();
        }
        let src = self.src;
        let digits = &src[digits_start..self.pos];
        let mut tok = self.make(TokenKind::Number);
        if digits.is_empty() {
            self.error("INVALID_NUMBER", "hex literal has no digits".to_string());
            tok.literal = Some(Literal::Int(0));
            return tok;
        }
        match i64::from_str_radix(digits, 16) {
            Ok(n) => tok.literal = Some(Literal::Int(n)),
            Err(_) => {
                self.error("INVALID_NUMBER", format!("hex literal '&H{}' overflows", digits));
                tok.literal = Some(Literal::Int(0));
            }
        }
        tok
    }

    fn ident_or_kw(&mut self) -> Token {
        while self.cur.map_or(false, is_ident_continue) {
            self.advance();
        }
        let has_sigil = self.cur.map_or(false, is_sigil);
        if has_sigil {
            self.advance();
        }
        if !has_sigil {
            let upper = self.src[self.start..self.pos].to_ascii_uppercase();
            if let Some(kind) = keyword_kind(&upper) {
                if kind == TokenKind::Rem {
                    // REM swallows the rest of the line; the comment text is
                    // not preserved.
                    while self.cur.map_or(false, |c| c != '\n') {
                        self.advance();
                    }
                }
                let mut tok = self.make(kind);
                tok.lexeme = upper;
                return tok;
            }
        }
        self.make(TokenKind::Ident)
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            match self.cur {
                Some(c) if c.is_whitespace() && c != '\n' => {
                    self.advance();
                }
                Some('\'') => {
                    while self.cur.map_or(false, |c| c != '\n') {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    /// Skip ahead to the next whitespace or line terminator after bad input.
    fn resync(&mut self) {
        while self.cur.map_or(false, |c| !c.is_whitespace()) {
            self.advance();
        }
    }

    fn error(&mut self, code: &'static str, message: String) {
        self.errors.push(Diagnostic::error(Stage::Lexer, code, message, self.start_loc));
    }

    fn make(&self, kind: TokenKind) -> Token {
        Token {
            kind,
            lexeme: self.src[self.start..self.pos].to_string(),
            literal: None,
            loc: self.start_loc,
        }
    }

    fn advance(&mut self) {
        if self.cur == Some('\n') {
            self.line += 1;
            self.col = 0;
        }
        self.cur = self.chars.next();
        if let Some(c) = self.cur {
            self.pos += c.len_utf8();
            self.col += 1;
        } else {
            self.pos = self.src.len();
        }
    }

    fn match_char(&mut self, want: char) -> bool {
        if self.cur == Some(want) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.clone().next()
    }
}

/// Convenience wrapper over `Lexer::tokenize`.
pub fn tokenize(src: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    Lexer::new(src).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let (toks, errs) = tokenize(src);
        assert!(errs.is_empty(), "unexpected lexer errors: {:?}", errs);
        toks.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn line_number_is_contextual() {
        let (toks, _) = tokenize("10 PRINT 10\n");
        assert_eq!(toks[0].kind, TokenKind::LineNumber);
        assert_eq!(toks[0].literal, Some(Literal::Int(10)));
        // The second 10 is an ordinary number literal.
        assert_eq!(toks[2].kind, TokenKind::Number);
    }

    #[test]
    fn keywords_uppercase_identifiers_preserved() {
        let (toks, _) = tokenize("print Total$\n");
        assert_eq!(toks[0].kind, TokenKind::Print);
        assert_eq!(toks[0].lexeme, "PRINT");
        assert_eq!(toks[1].kind, TokenKind::Ident);
        assert_eq!(toks[1].lexeme, "Total$");
    }

    #[test]
    fn sigils_fold_into_identifier() {
        let (toks, _) = tokenize("A% B# C! D$ E&");
        let lexemes: Vec<&str> = toks[..5].iter().map(|t| t.lexeme.as_str()).collect();
        assert_eq!(lexemes, ["A%", "B#", "C!", "D$", "E&"]);
    }

    #[test]
    fn compound_operators() {
        assert_eq!(
            kinds("<= >= <> ** ^ \\")[..6],
            [
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::NotEq,
                TokenKind::Caret,
                TokenKind::Caret,
                TokenKind::Backslash
            ]
        );
    }

    #[test]
    fn hex_literal() {
        let (toks, errs) = tokenize("10 LET C = &HFF00FF\n");
        assert!(errs.is_empty());
        let num = toks.iter().find(|t| t.kind == TokenKind::Number).unwrap();
        assert_eq!(num.literal, Some(Literal::Int(0x00FF00FF)));
    }

    #[test]
    fn string_escapes() {
        let (toks, errs) = tokenize("10 PRINT \"a\\\"b\\\\c\"\n");
        assert!(errs.is_empty());
        let s = toks.iter().find(|t| t.kind == TokenKind::StringLit).unwrap();
        assert_eq!(s.literal, Some(Literal::Str("a\"b\\c".to_string())));
    }

    #[test]
    fn unterminated_string_is_recovered() {
        let (toks, errs) = tokenize("10 PRINT \"oops\n20 END\n");
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].code, "UNTERMINATED_STRING");
        // Scanning continued: line 20 is still tokenized.
        assert!(toks
            .iter()
            .any(|t| t.kind == TokenKind::LineNumber && t.literal == Some(Literal::Int(20))));
    }

    #[test]
    fn comments_are_dropped() {
        let k = kinds("10 PRINT 1 ' trailing\n20 REM whole line\n");
        assert!(k.contains(&TokenKind::Rem));
        assert!(!k.contains(&TokenKind::Ident));
    }

    #[test]
    fn rem_consumes_rest_of_line() {
        let (toks, _) = tokenize("10 REM GOTO 99\n");
        assert!(!toks.iter().any(|t| t.kind == TokenKind::Goto));
    }
}
