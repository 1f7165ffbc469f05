//! One pass over the statement tree collecting everything the style policy
//! is checked against.

use std::collections::{BTreeMap, BTreeSet};

use super::lexer::{SyntaxError, Token, TokenKind};
use super::syntax::{self, ImportSpec, Module, Stmt, StmtKind};

/// `(line, depth)` of one call: 0-based line in the analysed source and the
/// number of enclosing function definitions.
pub type CallSite = (usize, usize);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    pub constructs: BTreeSet<&'static str>,
    pub calls: BTreeMap<String, Vec<CallSite>>,
    /// Qualified as `Class.method` or `outer.inner`.
    pub defined_functions: BTreeSet<String>,
    /// Statement counts of functions not nested in another function.
    pub function_lengths: Vec<(String, usize)>,
    pub nested_functions: Vec<String>,
    pub global_code: Vec<String>,
    /// Imported modules in order of first appearance, with the names taken
    /// from each.
    pub imports: Vec<(String, Vec<String>)>,
    pub unhinted_functions: Vec<String>,
    pub comments: Vec<String>,
}

impl Analysis {
    pub fn call_sites(&self, name: &str) -> &[CallSite] {
        self.calls.get(name).map_or(&[], Vec::as_slice)
    }

    fn add_import(&mut self, spec: &ImportSpec) {
        match self.imports.iter_mut().find(|(m, _)| m == &spec.module) {
            Some((_, names)) => names.extend(spec.names.iter().cloned()),
            None => self.imports.push((spec.module.clone(), spec.names.clone())),
        }
    }
}

pub fn analyse(source: &str) -> Result<Analysis, SyntaxError> {
    let Module { body, comments } = syntax::parse(source)?;
    let mut analysis = Analysis {
        comments: comments.into_iter().map(|c| c.text).collect(),
        ..Default::default()
    };
    global_code(&body, &mut analysis.global_code);
    Walker {
        out: &mut analysis,
    }
    .walk(&body, 0, "");
    Ok(analysis)
}

/// Number of statements as counted against the maximum function length.
/// String-only expression statements are free; handler bodies of `except`
/// are not counted, and `else`/`finally` count only their bodies.
pub fn count_statements(stmts: &[Stmt]) -> usize {
    stmts
        .iter()
        .map(|s| match &s.kind {
            StmtKind::Expr { is_string: true } | StmtKind::Except | StmtKind::Decorator => 0,
            StmtKind::Else | StmtKind::Finally => count_statements(&s.body),
            _ => 1 + count_statements(&s.body),
        })
        .sum()
}

fn global_code(module: &[Stmt], errors: &mut Vec<String>) {
    for stmt in module.iter().filter(|s| s.col == 0) {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Assign(targets) if targets.len() > 1 => errors.push(format!(
                "Multiple targets in global assignment statement at line {}",
                line
            )),
            StmtKind::Assign(targets) if !StmtKind::is_constant_target(&targets[0]) => {
                errors.push(format!("Global assignment statement at line {}", line))
            }
            StmtKind::For => errors.push(format!("Global for loop at line {}", line)),
            StmtKind::While => errors.push(format!("Global while loop at line {}", line)),
            StmtKind::If => errors.push(format!("Global if statement at line {}", line)),
            _ => {}
        }
    }
}

struct Walker<'a> {
    out: &'a mut Analysis,
}

#[derive(Debug)]
struct Frame {
    open: char,
    subscript: bool,
    lambdas: usize,
    colon_seen: bool,
}

impl Frame {
    fn new(open: char, subscript: bool) -> Self {
        Self {
            open,
            subscript,
            lambdas: 0,
            colon_seen: false,
        }
    }
}

fn ends_operand(t: &Token) -> bool {
    match t.kind {
        TokenKind::Name => !t.is_keyword() || matches!(t.text.as_str(), "None" | "True" | "False"),
        TokenKind::Str | TokenKind::Number => true,
        TokenKind::Op => matches!(t.text.as_str(), ")" | "]" | "}"),
        _ => false,
    }
}

impl Walker<'_> {
    fn tag(&mut self, construct: &'static str) {
        self.out.constructs.insert(construct);
    }

    fn walk(&mut self, stmts: &[Stmt], depth: usize, prefix: &str) {
        for stmt in stmts {
            self.scan(&stmt.tokens, depth);
            match &stmt.kind {
                StmtKind::FunctionDef(def) => {
                    let qualified = format!("{}{}", prefix, def.name);
                    self.out.defined_functions.insert(qualified.clone());
                    if depth > 0 {
                        self.out.nested_functions.push(def.name.clone());
                    } else {
                        self.out
                            .function_lengths
                            .push((def.name.clone(), count_statements(&stmt.body)));
                        let hinted = def.has_return_annotation
                            && def
                                .params
                                .iter()
                                .filter(|p| p.name != "self" && p.name != "cls")
                                .all(|p| p.annotated);
                        if !hinted {
                            self.out.unhinted_functions.push(def.name.clone());
                        }
                    }
                    self.walk(&stmt.body, depth + 1, &format!("{}.", qualified));
                    continue;
                }
                StmtKind::ClassDef(name) => {
                    self.walk(&stmt.body, depth, &format!("{}{}.", prefix, name));
                    continue;
                }
                StmtKind::If | StmtKind::Elif => self.tag("if"),
                StmtKind::For => self.tag("for"),
                StmtKind::While => self.tag("while"),
                StmtKind::Try => self.tag("try"),
                StmtKind::Except => self.tag("except"),
                StmtKind::Finally => self.tag("finally"),
                StmtKind::With => self.tag("with"),
                StmtKind::Import(specs) => {
                    self.tag("import");
                    for spec in specs {
                        self.out.add_import(spec);
                    }
                }
                StmtKind::Return => self.tag("return"),
                StmtKind::Raise => self.tag("raise"),
                StmtKind::Assert => self.tag("assert"),
                StmtKind::Break => self.tag("break"),
                StmtKind::Continue => self.tag("continue"),
                _ => {}
            }
            self.walk(&stmt.body, depth, prefix);
        }
    }

    /// Expression-level constructs and calls inside one statement.
    fn scan(&mut self, tokens: &[Token], depth: usize) {
        let mut frames = vec![Frame::new(' ', false)];
        for (i, t) in tokens.iter().enumerate() {
            let prev = i.checked_sub(1).map(|j| &tokens[j]);
            let before_prev = i.checked_sub(2).map(|j| &tokens[j]);
            match (t.kind, t.text.as_str()) {
                (TokenKind::Name, "lambda") => {
                    self.tag("lambda");
                    if let Some(top) = frames.last_mut() {
                        top.lambdas += 1;
                    }
                }
                (TokenKind::Name, "yield") => self.tag("yield"),
                (TokenKind::Name, "for") if frames.len() > 1 => {
                    self.tag("comprehension");
                    if let Some(top) = frames.last() {
                        match top.open {
                            '[' => self.tag("listcomprehension"),
                            '{' if top.colon_seen => self.tag("dictcomprehension"),
                            '{' => self.tag("setcomprehension"),
                            _ => {}
                        }
                    }
                }
                (TokenKind::Op, open @ ("(" | "[" | "{")) => {
                    let operand = prev.map_or(false, ends_operand);
                    if open == "(" {
                        if let Some(callee) = prev.filter(|p| p.kind == TokenKind::Name && !p.is_keyword()) {
                            let is_definition = before_prev
                                .map_or(false, |b| b.is_name("def") || b.is_name("class"));
                            if !is_definition {
                                self.out
                                    .calls
                                    .entry(callee.text.clone())
                                    .or_default()
                                    .push((callee.line.saturating_sub(1), depth));
                            }
                        }
                    }
                    let ch = open.chars().next().unwrap_or('(');
                    frames.push(Frame::new(ch, ch == '[' && operand));
                }
                (TokenKind::Op, ")" | "]" | "}") => {
                    if frames.len() > 1 {
                        frames.pop();
                    }
                }
                (TokenKind::Op, ":") => {
                    if let Some(top) = frames.last_mut() {
                        if top.lambdas > 0 {
                            top.lambdas -= 1;
                        } else if top.open == '[' && top.subscript {
                            self.out.constructs.insert("slice");
                        } else if top.open == '{' {
                            top.colon_seen = true;
                        }
                    }
                }
                _ => {}
            }
        }
    }
}
