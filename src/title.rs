// Chart title templates: `$name` placeholders filled from bound parameters

use std::collections::HashMap;

/// Parameter bindings for one title.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    vars: HashMap<&'static str, String>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: &'static str, value: impl ToString) -> Self {
        self.vars.insert(name, value.to_string());
        self
    }

    /// Substitute every bound `$name`. Unbound names and a lone `$` stay as written.
    pub fn fill(&self, template: &str) -> String {
        let mut pieces = template.split('$');
        let mut out = pieces.next().unwrap_or_default().to_string();

        for piece in pieces {
            let end = piece
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(piece.len());
            let (name, rest) = piece.split_at(end);
            match self.vars.get(name) {
                Some(value) => out.push_str(value),
                None => {
                    out.push('$');
                    out.push_str(name);
                }
            }
            out.push_str(rest);
        }
        out
    }
}
