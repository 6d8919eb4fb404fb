//! Lexical environments.
//!
//! Every function call gets a function frame; blocks, loop iterations and
//! `catch` clauses get block frames chained to it. `var` declarations land in
//! the nearest function frame while `let` and `const` stay in the frame they
//! appear in.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::compiler::ast::Name;
use crate::value::Value;

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    mutable: bool,
}

/// Why an assignment was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignError {
    Undeclared,
    Constant,
}

/// One frame of variable bindings.
pub struct Env {
    vars: RefCell<HashMap<Name, Binding>>,
    parent: Option<Rc<Env>>,
    function_scope: bool,
}

impl Env {
    /// Creates a top-level function frame.
    pub(crate) fn root() -> Rc<Env> {
        Rc::new(Env {
            vars: RefCell::new(HashMap::new()),
            parent: None,
            function_scope: true,
        })
    }

    /// Creates a frame for a function body.
    pub(crate) fn function(parent: &Rc<Env>) -> Rc<Env> {
        Rc::new(Env {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
            function_scope: true,
        })
    }

    /// Creates a frame for a block.
    pub(crate) fn block(parent: &Rc<Env>) -> Rc<Env> {
        Rc::new(Env {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
            function_scope: false,
        })
    }

    /// A sibling frame holding copies of this frame's bindings, used to give
    /// every iteration of a `for (let …)` loop its own variables.
    pub(crate) fn snapshot(&self) -> Rc<Env> {
        Rc::new(Env {
            vars: RefCell::new(self.vars.borrow().clone()),
            parent: self.parent.clone(),
            function_scope: self.function_scope,
        })
    }

    /// Declares a binding in this frame, replacing any previous one.
    pub(crate) fn declare(&self, name: &Name, value: Value, mutable: bool) {
        self.vars
            .borrow_mut()
            .insert(name.clone(), Binding { value, mutable });
    }

    /// Declares a `var` in the nearest function frame. Without a value an
    /// existing binding keeps its value.
    pub(crate) fn declare_var(&self, name: &Name, value: Option<Value>) {
        if !self.function_scope {
            if let Some(parent) = &self.parent {
                return parent.declare_var(name, value);
            }
        }
        let mut vars = self.vars.borrow_mut();
        match (vars.get_mut(name), value) {
            (Some(binding), Some(value)) => binding.value = value,
            (Some(_), None) => {}
            (None, value) => {
                vars.insert(
                    name.clone(),
                    Binding {
                        value: value.unwrap_or_default(),
                        mutable: true,
                    },
                );
            }
        }
    }

    /// Looks a name up through the frame chain.
    pub(crate) fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.vars.borrow().get(name) {
            return Some(binding.value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.lookup(name))
    }

    /// Assigns to the closest binding of `name`.
    pub(crate) fn assign(&self, name: &str, value: Value) -> Result<(), AssignError> {
        if let Some(binding) = self.vars.borrow_mut().get_mut(name) {
            if !binding.mutable {
                return Err(AssignError::Constant);
            }
            binding.value = value;
            return Ok(());
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => Err(AssignError::Undeclared),
        }
    }

    pub(crate) fn parent(&self) -> Option<&Rc<Env>> {
        self.parent.as_ref()
    }

    /// Drops every binding of this frame.
    pub(crate) fn clear(&self) {
        // Take the map out first so destructors never run under the borrow.
        let vars = std::mem::take(&mut *self.vars.borrow_mut());
        drop(vars);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        s.into()
    }

    #[test]
    fn test_var_goes_to_function_frame() {
        let root = Env::root();
        let block = Env::block(&root);
        block.declare_var(&name("x"), Some(Value::Number(1.0)));
        assert!(root.lookup("x").is_some());

        block.declare_var(&name("x"), None);
        assert_eq!(root.lookup("x").map(|v| v.to_number()), Some(1.0));
    }

    #[test]
    fn test_let_shadows_and_const_is_read_only() {
        let root = Env::root();
        root.declare(&name("x"), Value::from("outer"), true);
        let block = Env::block(&root);
        block.declare(&name("x"), Value::from("inner"), false);

        assert_eq!(block.lookup("x").unwrap().to_js_string(), "inner");
        assert_eq!(block.assign("x", Value::Null), Err(AssignError::Constant));
        assert_eq!(block.assign("y", Value::Null), Err(AssignError::Undeclared));
        assert_eq!(root.lookup("x").unwrap().to_js_string(), "outer");
    }

    #[test]
    fn test_snapshot_copies_bindings() {
        let root = Env::root();
        let frame = Env::block(&root);
        frame.declare(&name("i"), Value::Number(0.0), true);
        let copy = frame.snapshot();
        copy.assign("i", Value::Number(1.0)).unwrap();
        assert_eq!(frame.lookup("i").unwrap().to_number(), 0.0);
        assert_eq!(copy.lookup("i").unwrap().to_number(), 1.0);
    }
}
