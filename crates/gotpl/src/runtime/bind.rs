//! Binding a template's free variables to data and scope.

use std::rc::Rc;

use tracing::trace;

use super::env::Env;
use crate::compiler::VariableSet;
use crate::value::{Callable, Scope, Value};

/// Name under which every template sees the inclusion function.
pub(crate) const INCLUDE: &str = "include";

/// Creates the root frame of a render.
///
/// Each variable resolves to `data[name]` when the data object has that key
/// (a JSON `null` counts), otherwise to `scope[name]`, otherwise to
/// `undefined`. `include` is always the inclusion function. Data that is not
/// a JSON object binds like an empty object.
pub(crate) fn bind(variables: &VariableSet, data: &serde_json::Value, scope: &Scope) -> Rc<Env> {
    let root = Env::root();
    let fields = data.as_object();

    for name in variables.iter().filter(|name| *name != INCLUDE) {
        let value = match fields.and_then(|fields| fields.get(name)) {
            Some(json) => Value::from_json(json),
            None => scope.get(name).map(|global| global.to_value()).unwrap_or_default(),
        };
        root.declare(&name.into(), value, true);
    }
    root.declare(&INCLUDE.into(), Value::Function(Callable::Include), true);

    trace!(variables = variables.len(), "bound template variables");
    root
}
