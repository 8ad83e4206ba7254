use crate::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    /// Raw source of a `${...}` hole plus the position it started at.
    Expr(String, usize, usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Num(f64),
    Str(String),
    Template(Vec<TemplatePart>),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
    pub column: usize,
    /// A line break separates this token from the previous one.
    pub newline_before: bool,
}

// Longest first so that greedy matching works.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "===", "!==", "**=", "...", "<<=", ">>=", ">>>", "=>", "==", "!=", "<=", ">=", "&&",
    "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "**", "<<", ">>", "{", "}", "(",
    ")", "[", "]", ";", ",", "<", ">", "+", "-", "*", "/", "%", "!", "~", "?", ":", "=", ".", "&",
    "|", "^",
];

struct Lexer<'a> {
    src: &'a [u8],
    text: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str, line: usize, column: usize) -> Self {
        Self {
            src: text.as_bytes(),
            text,
            pos: 0,
            line,
            column,
        }
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError {
            message: message.into(),
            line: self.line,
            column: self.column,
        }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Skips whitespace and comments; reports whether a newline was crossed.
    fn skip_trivia(&mut self) -> Result<bool, CompileError> {
        let mut newline = false;
        loop {
            match self.peek() {
                Some('\n') => {
                    newline = true;
                    self.bump();
                }
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some(b'*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some('\n') => newline = true,
                            Some(_) => {}
                            None => return Err(self.error("Unterminated comment")),
                        }
                    }
                }
                _ => return Ok(newline),
            }
        }
    }

    fn number(&mut self) -> Result<Tok, CompileError> {
        let start = self.pos;
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            self.bump();
            self.bump();
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
            let digits = &self.text[digits_start..self.pos];
            return u64::from_str_radix(digits, 16)
                .map(|v| Tok::Num(v as f64))
                .map_err(|_| self.error("Invalid hexadecimal literal"));
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.bump();
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            self.bump();
        } else if self.peek() == Some('.') && start != self.pos {
            // `1.` is a complete literal.
            self.bump();
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.bump();
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let save = (self.pos, self.line, self.column);
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.bump();
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            } else {
                (self.pos, self.line, self.column) = save;
            }
        }
        let literal: String = self.text[start..self.pos]
            .chars()
            .filter(|&c| c != '_')
            .collect();
        literal
            .parse::<f64>()
            .map(Tok::Num)
            .map_err(|_| self.error(format!("Invalid number literal '{literal}'")))
    }

    fn escape(&mut self) -> Result<char, CompileError> {
        let c = self
            .bump()
            .ok_or_else(|| self.error("Unterminated string literal"))?;
        Ok(match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'v' => '\u{b}',
            'u' => {
                let mut code = 0u32;
                for _ in 0..4 {
                    let d = self
                        .bump()
                        .and_then(|c| c.to_digit(16))
                        .ok_or_else(|| self.error("Invalid unicode escape"))?;
                    code = code * 16 + d;
                }
                char::from_u32(code).unwrap_or('\u{fffd}')
            }
            other => other,
        })
    }

    fn string(&mut self, quote: char) -> Result<Tok, CompileError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(Tok::Str(out)),
                Some('\\') => out.push(self.escape()?),
                Some('\n') | None => return Err(self.error("Unterminated string literal")),
                Some(c) => out.push(c),
            }
        }
    }

    fn template(&mut self) -> Result<Tok, CompileError> {
        self.bump();
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('`') => break,
                Some('\\') => text.push(self.escape()?),
                Some('$') if self.peek() == Some('{') => {
                    self.bump();
                    if !text.is_empty() {
                        parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                    }
                    let (line, column) = (self.line, self.column);
                    let start = self.pos;
                    let mut depth = 0usize;
                    loop {
                        match self.peek() {
                            None => return Err(self.error("Unterminated template literal")),
                            Some('}') if depth == 0 => break,
                            Some('}') => depth -= 1,
                            Some('{') => depth += 1,
                            Some(q @ ('"' | '\'' | '`')) => {
                                // Skip nested literals wholesale so their braces do not count.
                                match q {
                                    '`' => {
                                        self.template()?;
                                    }
                                    _ => {
                                        self.string(q)?;
                                    }
                                }
                                continue;
                            }
                            _ => {}
                        }
                        self.bump();
                    }
                    let source = self.text[start..self.pos].to_string();
                    self.bump();
                    parts.push(TemplatePart::Expr(source, line, column));
                }
                Some(c) => text.push(c),
                None => return Err(self.error("Unterminated template literal")),
            }
        }
        if !text.is_empty() {
            parts.push(TemplatePart::Text(text));
        }
        Ok(Tok::Template(parts))
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        let newline_before = self.skip_trivia()?;
        let (line, column) = (self.line, self.column);
        let tok = match self.peek() {
            None => Tok::Eof,
            Some(c) if c.is_ascii_digit() => self.number()?,
            Some('.') if self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) => self.number()?,
            Some(q @ ('"' | '\'')) => self.string(q)?,
            Some('`') => self.template()?,
            Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
                {
                    self.bump();
                }
                Tok::Ident(self.text[start..self.pos].to_string())
            }
            Some(c) => {
                let rest = &self.text[self.pos..];
                let punct = PUNCTUATORS
                    .iter()
                    .find(|p| rest.starts_with(**p))
                    .copied()
                    .ok_or_else(|| self.error(format!("Unexpected character '{c}'")))?;
                for _ in 0..punct.len() {
                    self.bump();
                }
                Tok::Punct(punct)
            }
        };
        Ok(Token {
            tok,
            line,
            column,
            newline_before,
        })
    }
}

/// Tokenize `source`; positions are offset by `(line, column)` so template
/// holes report locations inside the enclosing script.
pub fn tokenize_at(source: &str, line: usize, column: usize) -> Result<Vec<Token>, CompileError> {
    let mut lexer = Lexer::new(source, line, column);
    let mut out = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.tok == Tok::Eof;
        out.push(token);
        if done {
            return Ok(out);
        }
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    tokenize_at(source, 1, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn numbers_strings_and_punctuation() {
        assert_eq!(
            kinds("x === 1.5e2 'a\\n' >= .5"),
            vec![
                Tok::Ident("x".into()),
                Tok::Punct("==="),
                Tok::Num(150.0),
                Tok::Str("a\n".into()),
                Tok::Punct(">="),
                Tok::Num(0.5),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn member_access_on_integer_literal_is_not_a_fraction() {
        assert_eq!(
            kinds("a.b"),
            vec![
                Tok::Ident("a".into()),
                Tok::Punct("."),
                Tok::Ident("b".into()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn comments_and_newlines() {
        let toks = tokenize("a // one\n/* two\n */ b").unwrap();
        assert_eq!(toks[1].tok, Tok::Ident("b".into()));
        assert!(toks[1].newline_before);
        assert_eq!(toks[1].line, 3);
    }

    #[test]
    fn template_holes_keep_nested_braces() {
        let toks = kinds("`v=${ {a:1}.a } and ${x}!`");
        match &toks[0] {
            Tok::Template(parts) => {
                assert_eq!(parts.len(), 5);
                assert_eq!(parts[0], TemplatePart::Text("v=".into()));
                assert!(matches!(&parts[1], TemplatePart::Expr(s, _, _) if s.trim() == "{a:1}.a"));
                assert_eq!(parts[2], TemplatePart::Text(" and ".into()));
                assert_eq!(parts[4], TemplatePart::Text("!".into()));
            }
            other => panic!("expected template, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_string_reports_position() {
        let err = tokenize("var s = 'abc").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("Unterminated"));
    }
}
