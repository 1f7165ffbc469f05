//! Statement tree of a Python module.
//!
//! Expressions are not parsed; every statement keeps its own tokens (the
//! header tokens for compound statements) for the walker to scan. Clauses
//! such as `elif`, `else`, `except` and `finally` are siblings of the
//! statement they continue, each with its own body.

use super::lexer::{self, SyntaxError, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub annotated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    /// Plain positional parameters, before any `*` or `**`.
    pub params: Vec<Param>,
    pub has_return_annotation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    pub module: String,
    /// Names imported by `from module import ...`; empty for `import module`.
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StmtKind {
    FunctionDef(FunctionDef),
    ClassDef(String),
    If,
    Elif,
    Else,
    For,
    While,
    Try,
    Except,
    Finally,
    With,
    /// Any other statement with a block, e.g. `match`/`case`.
    Block,
    Decorator,
    Expr { is_string: bool },
    /// Plain `=` assignment; holds the token runs of its targets.
    Assign(Vec<Vec<Token>>),
    AugAssign,
    AnnAssign,
    Import(Vec<ImportSpec>),
    Return,
    Raise,
    Assert,
    Break,
    Continue,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
    pub col: usize,
    pub tokens: Vec<Token>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    pub body: Vec<Stmt>,
    pub comments: Vec<lexer::Comment>,
}

pub fn parse(source: &str) -> Result<Module, SyntaxError> {
    let lexer::Tokens { tokens, comments } = lexer::tokenize(source)?;
    let mut p = Parser { toks: tokens, pos: 0 };
    let body = p.block(false)?;
    Ok(Module { body, comments })
}

const AUGMENTED: &[&str] = &[
    "+=", "-=", "*=", "/=", "//=", "%=", "**=", ">>=", "<<=", "&=", "|=", "^=", "@=",
];

fn bracket_delta(t: &Token) -> i32 {
    match t.text.as_str() {
        "(" | "[" | "{" if t.kind == TokenKind::Op => 1,
        ")" | "]" | "}" if t.kind == TokenKind::Op => -1,
        _ => 0,
    }
}

/// Splits `toks` on `sep` operators outside brackets.
fn split_top<'t>(toks: &'t [Token], sep: &str) -> Vec<&'t [Token]> {
    let mut parts = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (i, t) in toks.iter().enumerate() {
        depth += bracket_delta(t);
        if depth == 0 && t.is_op(sep) {
            parts.push(&toks[start..i]);
            start = i + 1;
        }
    }
    parts.push(&toks[start..]);
    parts
}

/// Index of the colon ending a compound statement header.
fn header_colon(toks: &[Token]) -> Option<usize> {
    let mut depth = 0;
    let mut lambdas = 0;
    for (i, t) in toks.iter().enumerate() {
        depth += bracket_delta(t);
        if depth != 0 {
            continue;
        }
        if t.is_name("lambda") {
            lambdas += 1;
        } else if t.is_op(":") {
            if lambdas == 0 {
                return Some(i);
            }
            lambdas -= 1;
        }
    }
    None
}

fn compound_kind(toks: &[Token]) -> Option<StmtKind> {
    let first = toks.first()?;
    let word = if first.is_name("async") {
        toks.get(1)?
    } else {
        first
    };
    if word.kind != TokenKind::Name {
        return None;
    }
    Some(match word.text.as_str() {
        "def" => StmtKind::FunctionDef(FunctionDef {
            name: String::new(),
            params: Vec::new(),
            has_return_annotation: false,
        }),
        "class" => StmtKind::ClassDef(String::new()),
        "if" => StmtKind::If,
        "elif" => StmtKind::Elif,
        "else" => StmtKind::Else,
        "for" => StmtKind::For,
        "while" => StmtKind::While,
        "try" => StmtKind::Try,
        "except" => StmtKind::Except,
        "finally" => StmtKind::Finally,
        "with" => StmtKind::With,
        _ => return None,
    })
}

fn dotted_name(toks: &[Token]) -> String {
    toks.iter().map(|t| t.text.as_str()).collect()
}

fn parse_import(toks: &[Token]) -> Result<Vec<ImportSpec>, SyntaxError> {
    let line = toks.first().map_or(0, |t| t.line);
    let bad = || SyntaxError::new(line, "invalid syntax");
    if toks[0].is_name("import") {
        return split_top(&toks[1..], ",")
            .into_iter()
            .map(|alias| {
                let end = alias.iter().position(|t| t.is_name("as")).unwrap_or(alias.len());
                if end == 0 {
                    return Err(bad());
                }
                Ok(ImportSpec {
                    module: dotted_name(&alias[..end]),
                    names: Vec::new(),
                })
            })
            .collect();
    }

    let import_at = toks.iter().position(|t| t.is_name("import")).ok_or_else(bad)?;
    let module = dotted_name(&toks[1..import_at]);
    if module.is_empty() {
        return Err(bad());
    }
    let names = toks[import_at + 1..]
        .iter()
        .filter(|t| !t.is_op("(") && !t.is_op(")"))
        .cloned()
        .collect::<Vec<_>>();
    let names = split_top(&names, ",")
        .into_iter()
        .filter(|alias| !alias.is_empty())
        .map(|alias| alias[0].text.clone())
        .collect::<Vec<_>>();
    if names.is_empty() {
        return Err(bad());
    }
    Ok(vec![ImportSpec { module, names }])
}

fn parse_def(header: &[Token]) -> Result<FunctionDef, SyntaxError> {
    let line = header.first().map_or(0, |t| t.line);
    let bad = || SyntaxError::new(line, "invalid syntax");
    let def_at = header.iter().position(|t| t.is_name("def")).ok_or_else(bad)?;
    let name = header.get(def_at + 1).filter(|t| t.kind == TokenKind::Name).ok_or_else(bad)?;
    if !header.get(def_at + 2).map_or(false, |t| t.is_op("(")) {
        return Err(bad());
    }

    let open = def_at + 2;
    let mut depth = 0;
    let mut close = None;
    for (i, t) in header.iter().enumerate().skip(open) {
        depth += bracket_delta(t);
        if depth == 0 {
            close = Some(i);
            break;
        }
    }
    let close = close.ok_or_else(bad)?;

    let mut params = Vec::new();
    for piece in split_top(&header[open + 1..close], ",") {
        let Some(first) = piece.first() else { continue };
        if first.is_op("*") || first.is_op("**") {
            break;
        }
        if first.is_op("/") {
            continue;
        }
        params.push(Param {
            name: first.text.clone(),
            annotated: split_top(piece, ":").len() > 1,
        });
    }

    Ok(FunctionDef {
        name: name.text.clone(),
        params,
        has_return_annotation: header[close + 1..].iter().any(|t| t.is_op("->")),
    })
}

fn is_upper(s: &str) -> bool {
    s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_lowercase)
}

fn simple_kind(toks: &[Token]) -> Result<StmtKind, SyntaxError> {
    let first = &toks[0];
    if first.kind == TokenKind::Name {
        match first.text.as_str() {
            "import" | "from" => return Ok(StmtKind::Import(parse_import(toks)?)),
            "return" => return Ok(StmtKind::Return),
            "raise" => return Ok(StmtKind::Raise),
            "assert" => return Ok(StmtKind::Assert),
            "break" => return Ok(StmtKind::Break),
            "continue" => return Ok(StmtKind::Continue),
            "lambda" => {}
            _ if first.is_keyword() => return Ok(StmtKind::Other),
            _ => {}
        }
    }
    if first.is_op("@") {
        return Ok(StmtKind::Decorator);
    }
    if toks.iter().all(|t| t.kind == TokenKind::Str) {
        return Ok(StmtKind::Expr { is_string: true });
    }

    let mut depth = 0;
    for t in toks {
        depth += bracket_delta(t);
        if depth != 0 || t.kind != TokenKind::Op {
            continue;
        }
        if AUGMENTED.contains(&t.text.as_str()) {
            return Ok(StmtKind::AugAssign);
        }
        if t.text == "=" {
            break;
        }
        if t.text == ":" && !first.is_name("lambda") {
            return Ok(StmtKind::AnnAssign);
        }
    }
    let parts = split_top(toks, "=");
    if parts.len() > 1 {
        if parts.iter().any(|p| p.is_empty()) {
            return Err(SyntaxError::new(first.line, "invalid syntax"));
        }
        let targets = parts[..parts.len() - 1].iter().map(|p| p.to_vec()).collect();
        return Ok(StmtKind::Assign(targets));
    }
    Ok(StmtKind::Expr { is_string: false })
}

impl StmtKind {
    /// The single upper-case name an assignment target consists of, if any.
    pub fn is_constant_target(target: &[Token]) -> bool {
        matches!(target, [t] if t.kind == TokenKind::Name && is_upper(&t.text))
    }
}

struct Parser {
    toks: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.toks[self.pos.min(self.toks.len() - 1)]
    }

    fn block(&mut self, indented: bool) -> Result<Vec<Stmt>, SyntaxError> {
        let mut body: Vec<Stmt> = Vec::new();
        loop {
            let t = self.peek().clone();
            match t.kind {
                TokenKind::EndMarker => break,
                TokenKind::Dedent if indented => {
                    self.pos += 1;
                    break;
                }
                TokenKind::Dedent => return Err(SyntaxError::new(t.line, "unexpected unindent")),
                TokenKind::Indent => return Err(SyntaxError::new(t.line, "unexpected indent")),
                TokenKind::Newline => self.pos += 1,
                _ => {
                    for stmt in self.logical_line()? {
                        check_clause_order(body.last(), &stmt)?;
                        body.push(stmt);
                    }
                }
            }
        }
        if let Some(last) = body.last() {
            if last.kind == StmtKind::Try {
                return Err(SyntaxError::new(last.line, "expected 'except' or 'finally' block"));
            }
        }
        Ok(body)
    }

    fn logical_line(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let start = self.pos;
        while !matches!(self.peek().kind, TokenKind::Newline | TokenKind::EndMarker) {
            self.pos += 1;
        }
        let line: Vec<Token> = self.toks[start..self.pos].to_vec();
        if self.peek().kind == TokenKind::Newline {
            self.pos += 1;
        }

        let compound = compound_kind(&line);
        let ends_with_block =
            line.last().map_or(false, |t| t.is_op(":")) && self.peek().kind == TokenKind::Indent;
        if compound.is_none() && !ends_with_block {
            return simple_statements(&line);
        }

        let first = &line[0];
        let colon = header_colon(&line).ok_or_else(|| SyntaxError::new(first.line, "expected ':'"))?;
        let header = line[..colon].to_vec();
        let rest = &line[colon + 1..];

        let kind = match compound {
            Some(StmtKind::FunctionDef(_)) => StmtKind::FunctionDef(parse_def(&header)?),
            Some(StmtKind::ClassDef(_)) => {
                let name = header
                    .get(1)
                    .filter(|t| t.kind == TokenKind::Name)
                    .ok_or_else(|| SyntaxError::new(first.line, "invalid syntax"))?;
                StmtKind::ClassDef(name.text.clone())
            }
            Some(kind) => kind,
            None => StmtKind::Block,
        };

        let body = if rest.is_empty() {
            if self.peek().kind != TokenKind::Indent {
                return Err(SyntaxError::new(
                    first.line,
                    "expected an indented block",
                ));
            }
            self.pos += 1;
            self.block(true)?
        } else {
            simple_statements(rest)?
        };

        Ok(vec![Stmt {
            kind,
            line: first.line,
            col: first.col,
            tokens: header,
            body,
        }])
    }
}

fn simple_statements(line: &[Token]) -> Result<Vec<Stmt>, SyntaxError> {
    let mut stmts = Vec::new();
    for part in split_top(line, ";") {
        let Some(first) = part.first() else { continue };
        if compound_kind(part).is_some() {
            return Err(SyntaxError::new(first.line, "invalid syntax"));
        }
        stmts.push(Stmt {
            kind: simple_kind(part)?,
            line: first.line,
            col: first.col,
            tokens: part.to_vec(),
            body: Vec::new(),
        });
    }
    Ok(stmts)
}

fn check_clause_order(prev: Option<&Stmt>, stmt: &Stmt) -> Result<(), SyntaxError> {
    use StmtKind::*;
    let prev = prev.map(|s| &s.kind);
    let ok = match &stmt.kind {
        Elif => matches!(prev, Some(If | Elif)),
        Else => matches!(prev, Some(If | Elif | For | While | Try | Except)),
        Except => matches!(prev, Some(Try | Except)),
        Finally => matches!(prev, Some(Try | Except | Else)),
        _ => !matches!(prev, Some(Try)),
    };
    if ok {
        Ok(())
    } else {
        Err(SyntaxError::new(stmt.line, "invalid syntax"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn kinds(stmts: &[Stmt]) -> Vec<&StmtKind> {
        stmts.iter().map(|s| &s.kind).collect()
    }

    #[test]
    fn compound_statements_and_clauses() {
        let src = "\
def f(a, b: int, *args, c=1) -> int:
    '''Doc.'''
    if a:
        return 1
    elif b: return 2
    else:
        pass
    try:
        x = 1; y = 2
    except ValueError as e:
        raise
    finally:
        pass
";
        let m = parse(src).unwrap();
        assert_eq!(m.body.len(), 1);
        let StmtKind::FunctionDef(def) = &m.body[0].kind else {
            panic!("not a def")
        };
        assert_eq!(def.name, "f");
        assert_eq!(
            def.params,
            vec![
                Param { name: "a".into(), annotated: false },
                Param { name: "b".into(), annotated: true },
            ]
        );
        assert!(def.has_return_annotation);

        let body = &m.body[0].body;
        assert_eq!(
            kinds(body),
            vec![
                &StmtKind::Expr { is_string: true },
                &StmtKind::If,
                &StmtKind::Elif,
                &StmtKind::Else,
                &StmtKind::Try,
                &StmtKind::Except,
                &StmtKind::Finally,
            ]
        );
        assert_eq!(kinds(&body[2].body), vec![&StmtKind::Return]);
        assert_eq!(body[4].body.len(), 2);
        assert_eq!(body[4].body[1].col, 15);
    }

    #[test]
    fn simple_statement_kinds() {
        let m = parse("import os.path as p, sys\nfrom math import (sqrt,\n  pi as PI)\nX = Y = 3\nn += 1\nz: int = 0\nf = lambda q: q\nprint('x')\n@dec\nclass A(B): pass\n").unwrap();
        assert_eq!(
            m.body[0].kind,
            StmtKind::Import(vec![
                ImportSpec { module: "os.path".into(), names: vec![] },
                ImportSpec { module: "sys".into(), names: vec![] },
            ])
        );
        assert_eq!(
            m.body[1].kind,
            StmtKind::Import(vec![ImportSpec {
                module: "math".into(),
                names: vec!["sqrt".into(), "pi".into()],
            }])
        );
        let StmtKind::Assign(targets) = &m.body[2].kind else { panic!() };
        assert_eq!(targets.len(), 2);
        assert!(StmtKind::is_constant_target(&targets[0]));
        assert_eq!(m.body[3].kind, StmtKind::AugAssign);
        assert_eq!(m.body[4].kind, StmtKind::AnnAssign);
        assert!(matches!(&m.body[5].kind, StmtKind::Assign(t) if !StmtKind::is_constant_target(&t[0])));
        assert_eq!(m.body[6].kind, StmtKind::Expr { is_string: false });
        assert_eq!(m.body[7].kind, StmtKind::Decorator);
        assert_eq!(m.body[8].kind, StmtKind::ClassDef("A".into()));
        assert_eq!(m.body[8].body.len(), 1);
    }

    #[test]
    fn match_statement_is_a_generic_block() {
        let m = parse("match x:\n    case 1:\n        pass\n").unwrap();
        assert_eq!(m.body[0].kind, StmtKind::Block);
        assert_eq!(m.body[0].body[0].kind, StmtKind::Block);
    }

    #[test]
    fn syntax_errors() {
        let e = |s: &str| parse(s).unwrap_err();
        assert_eq!(e("def f():\nreturn 1\n").msg, "expected an indented block");
        assert_eq!(e("x = 1\n    y = 2\n").msg, "unexpected indent");
        assert_eq!(e("if x\n    pass\n").msg, "expected ':'");
        assert_eq!(e("else:\n    pass\n").line, 1);
        assert_eq!(e("x = 1\ntry:\n    pass\ny = 2\n").line, 4);
        assert_eq!(e("try:\n    pass\n").msg, "expected 'except' or 'finally' block");
        assert_eq!(e("def (x):\n    pass\n").msg, "invalid syntax");
        assert_eq!(e("from import x\n").msg, "invalid syntax");
    }
}
