use std::collections::BTreeMap;

use crate::config::{AccessRule, GradingConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrAccess {
    Allowed,
    /// Callable replaced by a stub that fails with `InvalidAction` when called.
    Stub,
    /// Non-callable made inaccessible.
    Hidden,
}

/// Capabilities of candidate code running in-process. The engine asks before
/// every file open, module attribute binding and built-in call; nothing is
/// patched into a global namespace.
#[derive(Debug, Clone, Default)]
pub struct SandboxPolicy {
    pub files: AccessRule,
    pub modules: BTreeMap<String, AccessRule>,
    pub proscribed_builtins: Vec<String>,
    pub echo_input: bool,
    pub max_output_bytes: usize,
}

impl SandboxPolicy {
    pub fn from_config(cfg: &GradingConfig) -> Self {
        Self {
            files: cfg.restricted_files.clone(),
            modules: cfg.restricted_modules.clone(),
            proscribed_builtins: cfg.proscribed_builtins.clone(),
            echo_input: cfg.echo_standard_input,
            max_output_bytes: cfg.max_output_bytes,
        }
    }

    pub fn may_open(&self, filename: &str) -> bool {
        self.files.permits(filename)
    }

    pub fn attr_access(&self, module: &str, attr: &str, callable: bool) -> AttrAccess {
        match self.modules.get(module) {
            Some(rule) if !rule.permits(attr) => {
                if callable {
                    AttrAccess::Stub
                } else {
                    AttrAccess::Hidden
                }
            }
            _ => AttrAccess::Allowed,
        }
    }

    pub fn is_proscribed_builtin(&self, name: &str) -> bool {
        self.proscribed_builtins.iter().any(|b| b == name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_policy() {
        let p = SandboxPolicy::from_config(&GradingConfig::default());
        assert!(p.may_open("data.txt"));
        assert!(!p.may_open("prog.py"));
        assert!(!p.may_open("__source.py"));

        assert_eq!(p.attr_access("os", "path", false), AttrAccess::Allowed);
        assert_eq!(p.attr_access("os", "system", true), AttrAccess::Stub);
        assert_eq!(p.attr_access("os", "_environ", false), AttrAccess::Hidden);
        assert_eq!(p.attr_access("subprocess", "run", true), AttrAccess::Stub);
        assert_eq!(p.attr_access("math", "sqrt", true), AttrAccess::Allowed);

        assert!(p.is_proscribed_builtin("eval"));
        assert!(!p.is_proscribed_builtin("len"));
        assert!(p.echo_input);
    }
}
