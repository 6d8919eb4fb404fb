//! The compiled form of a template.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::compiler::ast::Script;
use crate::compiler::{generate, parser, CompileSettings, VariableSet};
use crate::error::{Error, Result};
use crate::runtime::{bind, debug as annotator, Host, Interpreter};
use crate::value::Scope;

/// A parsed template, ready to be rendered any number of times.
///
/// Compiled templates are immutable and shared between threads through the
/// engine's cache.
#[derive(Debug)]
pub struct CompiledTemplate {
    source: Arc<str>,
    script: Script,
    variables: VariableSet,
    debug: bool,
}

impl CompiledTemplate {
    /// Compiles `source`. With `debug` set, syntax errors carry a source
    /// excerpt around the offending line.
    pub fn compile(source: &str, settings: &CompileSettings) -> Result<Self> {
        debug!(len = source.len(), debug = settings.debug, "compiling template");
        let program = generate(source, settings)
            .map_err(|err| annotate_syntax(err, source, settings.debug))?;
        trace!(listing = %program, "generated program");

        let script = parser::parse_program(&program)
            .map_err(|err| annotate_syntax(err, source, settings.debug))?;
        let variables = program.variables().clone();
        debug!(variables = variables.len(), "compiled template");

        Ok(Self {
            source: Arc::from(source),
            script,
            variables,
            debug: settings.debug,
        })
    }

    /// The free variables the template reads.
    pub fn variables(&self) -> &VariableSet {
        &self.variables
    }

    /// The template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the template tracks lines for error reporting.
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Binds `data` and `scope` and runs the template.
    pub(crate) fn invoke(
        &self,
        data: &serde_json::Value,
        scope: &Scope,
        host: &dyn Host,
    ) -> Result<String> {
        let root = bind::bind(&self.variables, data, scope);
        Interpreter::new(host)
            .run(&self.script, root)
            .map_err(|failure| match failure.line {
                Some(line) if self.debug => annotator::annotate(failure.error, &self.source, line),
                _ => failure.error,
            })
    }
}

fn annotate_syntax(err: Error, source: &str, debug: bool) -> Error {
    match err.line() {
        Some(line) if debug => annotator::annotate(err, source, line),
        _ => err,
    }
}
