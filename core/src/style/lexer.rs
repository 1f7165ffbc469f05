//! Python tokenizer: enough of the language to recover the statement
//! structure (logical lines, indentation, brackets) and the tokens of every
//! statement.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Name,
    Number,
    Str,
    Op,
    Newline,
    Indent,
    Dedent,
    EndMarker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// 1-based.
    pub line: usize,
    /// 0-based, in characters.
    pub col: usize,
}

impl Token {
    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.text == op
    }

    pub fn is_name(&self, name: &str) -> bool {
        self.kind == TokenKind::Name && self.text == name
    }

    pub fn is_keyword(&self) -> bool {
        self.kind == TokenKind::Name && KEYWORDS.contains(&self.text.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct SyntaxError {
    pub line: usize,
    pub msg: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Syntax error at line {}: {}", self.line, self.msg)
    }
}

impl SyntaxError {
    pub fn new(line: usize, msg: impl Into<String>) -> Self {
        Self {
            line,
            msg: msg.into(),
        }
    }
}

pub const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const OPS3: &[&str] = &["**=", "//=", ">>=", "<<=", "..."];
const OPS2: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "->", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=",
    ":=", "<<", ">>",
];
const OPS1: &str = "+-*/%@&|^~<>()[]{},:.;=";

const STRING_PREFIXES: &[&str] = &["r", "u", "b", "f", "br", "rb", "fr", "rf"];

#[derive(Debug, Default)]
pub struct Tokens {
    pub tokens: Vec<Token>,
    pub comments: Vec<Comment>,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    line_start: usize,
    indents: Vec<usize>,
    brackets: Vec<(char, usize)>,
    out: Tokens,
}

pub fn tokenize(source: &str) -> Result<Tokens, SyntaxError> {
    let mut lx = Lexer {
        chars: source.chars().filter(|c| *c != '\r').collect(),
        pos: 0,
        line: 1,
        line_start: 0,
        indents: vec![0],
        brackets: Vec::new(),
        out: Tokens::default(),
    };
    lx.run()?;
    Ok(lx.out)
}

impl Lexer {
    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn col(&self) -> usize {
        self.pos - self.line_start
    }

    fn push(&mut self, kind: TokenKind, text: String, line: usize, col: usize) {
        self.out.tokens.push(Token {
            kind,
            text,
            line,
            col,
        });
    }

    fn newline(&mut self) {
        self.pos += 1;
        self.line += 1;
        self.line_start = self.pos;
    }

    fn run(&mut self) -> Result<(), SyntaxError> {
        let mut at_line_start = true;
        while self.pos < self.chars.len() {
            if at_line_start && self.brackets.is_empty() {
                if !self.indentation()? {
                    continue;
                }
                at_line_start = false;
            }
            let c = self.chars[self.pos];
            match c {
                ' ' | '\t' | '\x0c' => self.pos += 1,
                '\n' => {
                    if self.brackets.is_empty() {
                        let col = self.col();
                        self.push(TokenKind::Newline, String::new(), self.line, col);
                        at_line_start = true;
                    }
                    self.newline();
                }
                '#' => self.comment(),
                '\\' => {
                    if self.peek(1) == Some('\n') {
                        self.pos += 1;
                        self.newline();
                    } else {
                        return Err(SyntaxError::new(
                            self.line,
                            "unexpected character after line continuation character",
                        ));
                    }
                }
                '"' | '\'' => self.string(self.pos)?,
                c if c.is_ascii_digit() || (c == '.' && self.peek(1).map_or(false, |d| d.is_ascii_digit())) => {
                    self.number()
                }
                c if c == '_' || c.is_alphabetic() => self.name()?,
                _ => self.op()?,
            }
        }

        if let Some((open, line)) = self.brackets.last() {
            return Err(SyntaxError::new(*line, format!("'{}' was never closed", open)));
        }
        let needs_newline = self
            .out
            .tokens
            .last()
            .map_or(false, |t| !matches!(t.kind, TokenKind::Newline | TokenKind::Dedent));
        if needs_newline {
            let col = self.col();
            self.push(TokenKind::Newline, String::new(), self.line, col);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, String::new(), self.line, 0);
        }
        self.push(TokenKind::EndMarker, String::new(), self.line, 0);
        Ok(())
    }

    /// Measures the indentation of a new logical line. Returns `false` when
    /// the line is blank or a comment and was consumed entirely.
    fn indentation(&mut self) -> Result<bool, SyntaxError> {
        let mut width = 0;
        while let Some(c) = self.peek(0) {
            match c {
                ' ' => width += 1,
                '\t' => width += 8 - width % 8,
                '\x0c' => width = 0,
                _ => break,
            }
            self.pos += 1;
        }
        match self.peek(0) {
            None => return Ok(false),
            Some('\n') => {
                self.newline();
                return Ok(false);
            }
            Some('#') => {
                self.comment();
                if self.peek(0) == Some('\n') {
                    self.newline();
                }
                return Ok(false);
            }
            _ => {}
        }

        let top = self.indents.last().copied().unwrap_or(0);
        if width > top {
            self.indents.push(width);
            self.push(TokenKind::Indent, String::new(), self.line, 0);
        } else if width < top {
            while self.indents.last().map_or(false, |&w| width < w) {
                self.indents.pop();
                self.push(TokenKind::Dedent, String::new(), self.line, 0);
            }
            if self.indents.last() != Some(&width) {
                return Err(SyntaxError::new(
                    self.line,
                    "unindent does not match any outer indentation level",
                ));
            }
        }
        Ok(true)
    }

    fn comment(&mut self) {
        let start = self.pos;
        while self.peek(0).map_or(false, |c| c != '\n') {
            self.pos += 1;
        }
        let text = self.chars[start..self.pos].iter().collect();
        self.out.comments.push(Comment {
            line: self.line,
            text,
        });
    }

    fn name(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        let (line, col) = (self.line, self.col());
        while self
            .peek(0)
            .map_or(false, |c| c == '_' || c.is_alphanumeric())
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let quote_follows = matches!(self.peek(0), Some('"') | Some('\''));
        if quote_follows && STRING_PREFIXES.contains(&text.to_ascii_lowercase().as_str()) {
            return self.string(start);
        }
        self.push(TokenKind::Name, text, line, col);
        Ok(())
    }

    fn number(&mut self) {
        let start = self.pos;
        let (line, col) = (self.line, self.col());
        let hex = self.peek(0) == Some('0') && matches!(self.peek(1), Some('x') | Some('X'));
        while let Some(c) = self.peek(0) {
            let exponent_sign = (c == '+' || c == '-')
                && !hex
                && matches!(self.chars.get(self.pos.wrapping_sub(1)), Some('e') | Some('E'));
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = self.chars[start..self.pos].iter().collect();
        self.push(TokenKind::Number, text, line, col);
    }

    /// Reads a string literal whose prefix (if any) starts at `start`.
    fn string(&mut self, start: usize) -> Result<(), SyntaxError> {
        let line = self.line;
        let col = start - self.line_start;
        let Some(quote) = self.peek(0) else {
            return Err(SyntaxError::new(line, "unterminated string literal"));
        };
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        loop {
            match self.peek(0) {
                None => {
                    let msg = if triple {
                        "unterminated triple-quoted string literal"
                    } else {
                        "unterminated string literal"
                    };
                    return Err(SyntaxError::new(line, msg));
                }
                Some('\\') => {
                    self.pos += 1;
                    if self.peek(0) == Some('\n') {
                        self.newline();
                    } else if self.peek(0).is_some() {
                        self.pos += 1;
                    }
                }
                Some('\n') if !triple => {
                    return Err(SyntaxError::new(line, "unterminated string literal"));
                }
                Some('\n') => self.newline(),
                Some(c) if c == quote => {
                    if !triple {
                        self.pos += 1;
                        break;
                    }
                    if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                        self.pos += 3;
                        break;
                    }
                    self.pos += 1;
                }
                Some(_) => self.pos += 1,
            }
        }
        let text = self.chars[start..self.pos].iter().collect();
        self.push(TokenKind::Str, text, line, col);
        Ok(())
    }

    fn op(&mut self) -> Result<(), SyntaxError> {
        let (line, col) = (self.line, self.col());
        let rest: String = self.chars[self.pos..(self.pos + 3).min(self.chars.len())]
            .iter()
            .collect();
        let op = OPS3
            .iter()
            .chain(OPS2)
            .find(|op| rest.starts_with(**op))
            .map(|op| op.to_string())
            .or_else(|| {
                let c = self.chars[self.pos];
                OPS1.contains(c).then(|| c.to_string())
            });
        let Some(op) = op else {
            return Err(SyntaxError::new(
                line,
                format!("invalid character '{}'", self.chars[self.pos]),
            ));
        };

        match op.as_str() {
            "(" | "[" | "{" => self.brackets.push((self.chars[self.pos], line)),
            ")" | "]" | "}" => {
                let close = self.chars[self.pos];
                let Some((open, _)) = self.brackets.pop() else {
                    return Err(SyntaxError::new(line, format!("unmatched '{}'", close)));
                };
                let expected = match open {
                    '(' => ')',
                    '[' => ']',
                    _ => '}',
                };
                if close != expected {
                    return Err(SyntaxError::new(
                        line,
                        format!(
                            "closing parenthesis '{}' does not match opening parenthesis '{}'",
                            close, open
                        ),
                    ));
                }
            }
            _ => {}
        }
        self.pos += op.chars().count();
        self.push(TokenKind::Op, op, line, col);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use TokenKind::*;

    fn kinds(src: &str) -> Vec<(TokenKind, String)> {
        tokenize(src)
            .unwrap()
            .tokens
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    fn k(kind: TokenKind, text: &str) -> (TokenKind, String) {
        (kind, text.to_owned())
    }

    #[test]
    fn indentation_and_newlines() {
        let src = "def f(x):\n    # note\n\n    return x ** 2\nprint(f(3))\n";
        assert_eq!(
            kinds(src),
            vec![
                k(Name, "def"),
                k(Name, "f"),
                k(Op, "("),
                k(Name, "x"),
                k(Op, ")"),
                k(Op, ":"),
                k(Newline, ""),
                k(Indent, ""),
                k(Name, "return"),
                k(Name, "x"),
                k(Op, "**"),
                k(Number, "2"),
                k(Newline, ""),
                k(Dedent, ""),
                k(Name, "print"),
                k(Op, "("),
                k(Name, "f"),
                k(Op, "("),
                k(Number, "3"),
                k(Op, ")"),
                k(Op, ")"),
                k(Newline, ""),
                k(EndMarker, ""),
            ]
        );
    }

    #[test]
    fn brackets_join_lines() {
        let toks = tokenize("x = [1,\n     2]\ny = 3 + \\\n    4").unwrap().tokens;
        let newlines = toks.iter().filter(|t| t.kind == Newline).count();
        assert_eq!(newlines, 2);
        assert!(toks.iter().all(|t| t.kind != Indent));
        let four = toks.iter().find(|t| t.text == "4").unwrap();
        assert_eq!(four.line, 4);
    }

    #[test]
    fn strings_and_comments() {
        let t = tokenize("s = rb'a\\'b' + \"\"\"x\n# not a comment\n\"\"\"  # pylint: disable=x\nf'{a}'\n")
            .unwrap();
        let strs: Vec<_> = t
            .tokens
            .iter()
            .filter(|t| t.kind == Str)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(strs, vec!["rb'a\\'b'", "\"\"\"x\n# not a comment\n\"\"\"", "f'{a}'"]);
        assert_eq!(
            t.comments,
            vec![Comment {
                line: 3,
                text: "# pylint: disable=x".to_owned()
            }]
        );
        assert_eq!(t.tokens.last().unwrap().line, 5);
    }

    #[test]
    fn numbers() {
        let toks = kinds("1e-5 0x1f .5 1_000j");
        assert_eq!(toks[0], k(Number, "1e-5"));
        assert_eq!(toks[1], k(Number, "0x1f"));
        assert_eq!(toks[2], k(Number, ".5"));
        assert_eq!(toks[3], k(Number, "1_000j"));
    }

    #[test]
    fn errors() {
        let e = |s: &str| tokenize(s).unwrap_err();
        assert_eq!(e("x = (1,\n2\n").msg, "'(' was never closed");
        assert_eq!(e("x = (1]").msg, "closing parenthesis ']' does not match opening parenthesis '('");
        assert_eq!(e("x = 1)").msg, "unmatched ')'");
        assert_eq!(e("s = 'abc\n").line, 1);
        assert_eq!(e("s = '''abc\n\n").msg, "unterminated triple-quoted string literal");
        assert_eq!(
            e("if x:\n        y\n    z\n").msg,
            "unindent does not match any outer indentation level"
        );
        assert_eq!(e("a = $").msg, "invalid character '$'");
        assert_eq!(
            e("a = 1\nb = ?\n").to_string(),
            "Syntax error at line 2: invalid character '?'"
        );
    }
}
