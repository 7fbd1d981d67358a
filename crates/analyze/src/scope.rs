//! Local scopes for flow and handler bodies.
//!
//! A body gets one function frame holding its parameters, builtins and every
//! assigned variable. `for` loops push a child frame that binds only the
//! loop variable; assignments inside the loop still land in the function
//! frame, matching the runtime's variable store.

use agentflow_core::Span;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Builtin,
    Param,
    Variable,
    LoopVar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub kind: BindingKind,
    /// Where the name was first bound; `None` for builtins.
    pub span: Option<Span>,
}

#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<HashMap<String, Binding>>,
}

impl ScopeStack {
    /// A function frame with `builtins` pre-bound.
    pub fn new(builtins: &[&str]) -> Self {
        let frame = builtins
            .iter()
            .map(|b| {
                (
                    (*b).to_owned(),
                    Binding {
                        kind: BindingKind::Builtin,
                        span: None,
                    },
                )
            })
            .collect();
        ScopeStack {
            frames: vec![frame],
        }
    }

    pub fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Bind in the innermost frame. Returns the previous binding in that
    /// frame, if any.
    pub fn bind_local(&mut self, name: &str, binding: Binding) -> Option<Binding> {
        let frame = self.frames.last_mut()?;
        match frame.get(name) {
            Some(existing) => Some(*existing),
            None => {
                frame.insert(name.to_owned(), binding);
                None
            }
        }
    }

    /// Bind in the function frame unless already visible. Later assignments
    /// keep the first binding's span.
    pub fn assign(&mut self, name: &str, span: Span) {
        if self.lookup(name).is_some() {
            return;
        }
        if let Some(frame) = self.frames.first_mut() {
            frame.insert(
                name.to_owned(),
                Binding {
                    kind: BindingKind::Variable,
                    span: Some(span),
                },
            );
        }
    }

    /// Innermost binding visible under `name`.
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.frames.iter().rev().find_map(|f| f.get(name))
    }

    /// Every visible name, innermost frames first.
    pub fn visible(&self) -> impl Iterator<Item = &str> {
        self.frames
            .iter()
            .rev()
            .flat_map(|f| f.keys().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_frames_shadow_and_pop() {
        let mut scopes = ScopeStack::new(&["input_prompt"]);
        assert_eq!(
            scopes.lookup("input_prompt").map(|b| b.kind),
            Some(BindingKind::Builtin)
        );
        scopes.push();
        let loop_var = Binding {
            kind: BindingKind::LoopVar,
            span: Some(Span::point(3, 9)),
        };
        assert!(scopes.bind_local("item", loop_var).is_none());
        assert_eq!(scopes.bind_local("item", loop_var), Some(loop_var));
        scopes.assign("total", Span::point(4, 9));
        scopes.pop();
        assert!(scopes.lookup("item").is_none());
        assert_eq!(
            scopes.lookup("total").map(|b| b.kind),
            Some(BindingKind::Variable)
        );
    }

    #[test]
    fn function_frame_is_never_popped() {
        let mut scopes = ScopeStack::new(&[]);
        scopes.pop();
        assert_eq!(scopes.depth(), 1);
        scopes.assign("x", Span::point(1, 1));
        assert!(scopes.lookup("x").is_some());
    }
}
