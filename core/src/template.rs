//! `#{name}` interpolation for toolchain command lines.
//!
//! `##` renders a literal `#`. A `#` not followed by `{` or `#` is kept as is.

use std::{borrow::Borrow, collections::HashMap, hash::Hash};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Undefined variable '{0}' at column {}", .1 + 1)]
    UndefinedVar(String, usize),

    #[error("Unclosed brace (opened at column {})", .0 + 1)]
    UnclosedBrace(usize),
}

pub fn render<K, V>(template: &str, vars: &HashMap<K, V>) -> Result<String, TemplateError>
where
    K: Borrow<str> + Hash + Eq,
    V: AsRef<str>,
{
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum State {
        Text,
        Hash,
        Name { open_at: usize },
    }

    let mut state = State::Text;
    let mut out = String::with_capacity(template.len() * 2);
    let mut name = String::new();

    for (i, c) in template.chars().enumerate() {
        state = match (state, c) {
            (State::Text, '#') => State::Hash,
            (State::Text, c) => {
                out.push(c);
                State::Text
            }
            (State::Hash, '#') => {
                out.push('#');
                State::Text
            }
            (State::Hash, '{') => {
                name.clear();
                State::Name { open_at: i }
            }
            (State::Hash, _) => {
                out.push('#');
                out.push(c);
                State::Text
            }
            (State::Name { open_at }, '}') => {
                let value = vars
                    .get(name.as_str())
                    .ok_or_else(|| TemplateError::UndefinedVar(name.clone(), open_at))?;
                out.push_str(value.as_ref());
                State::Text
            }
            (s @ State::Name { .. }, c) => {
                name.push(c);
                s
            }
        };
    }

    match state {
        State::Text => Ok(out),
        State::Hash => {
            out.push('#');
            Ok(out)
        }
        State::Name { open_at } => Err(TemplateError::UnclosedBrace(open_at)),
    }
}
