//! Fallback scope for names a template's data does not provide.
//!
//! When a template references a variable its data object lacks, the binder
//! looks the name up in the [`Scope`] from the render options. The default
//! scope, [`Scope::standard`], exposes the familiar globals of the scripting
//! language (`Math`, `JSON`, `parseInt`, ...) so templates such as
//! `<%= Math.max(a, b) %>` work without any setup.
//!
//! A scope is immutable once shared. To add helpers, start from
//! [`Scope::with_standard`] (or [`Scope::new`] for an empty one) and wrap the
//! result in an [`Arc`]:
//!
//! ```rust
//! use std::sync::Arc;
//! use gotpl::{Engine, OptionsPatch, Scope, Value};
//! use serde_json::json;
//!
//! let scope = Scope::with_standard()
//!     .with("site", json!({"title": "Docs"}))
//!     .function("shout", |args| {
//!         let text = args.first().cloned().unwrap_or_default();
//!         Ok(Value::from(text.to_js_string().to_uppercase()))
//!     });
//!
//! let engine = Engine::new();
//! let options = OptionsPatch::new().scope(Arc::new(scope));
//! let html = engine
//!     .render_with("<%= shout(site.title) %>", &json!({}), &options)
//!     .unwrap();
//! assert_eq!(html, "DOCS");
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use super::{string_to_number, Value};
use crate::error::{Error, ErrorKind, Result};

type NativeFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// A function implemented in Rust and callable from templates.
///
/// Arguments arrive as a slice; missing arguments are simply absent.
/// Failures are reported with [`Error::render`], and the error class chosen
/// there is what template code sees in a `catch` block.
#[derive(Clone)]
pub struct NativeFunction {
    name: Arc<str>,
    func: Arc<NativeFn>,
    properties: Arc<BTreeMap<String, Global>>,
}

impl NativeFunction {
    /// Wraps a closure as a named native function.
    pub fn new<F>(name: impl Into<Arc<str>>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
            properties: Arc::new(BTreeMap::new()),
        }
    }

    /// Attaches a static property, as in `Number.isInteger`.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Global>) -> Self {
        Arc::make_mut(&mut self.properties).insert(name.into(), value.into());
        self
    }

    /// The function's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a static property.
    pub fn property(&self, name: &str) -> Option<&Global> {
        self.properties.get(name)
    }

    /// Calls the function.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }

    pub(crate) fn same(&self, other: &NativeFunction) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function: {}]", self.name)
    }
}

/// A thread-safe global, converted to a [`Value`] each time a template binds it.
#[derive(Debug, Clone)]
pub enum Global {
    /// Plain data.
    Json(serde_json::Value),
    /// A number, including the non-finite ones JSON cannot hold.
    Number(f64),
    /// A native function.
    Function(NativeFunction),
    /// A namespace object such as `Math`.
    Namespace(BTreeMap<String, Global>),
}

impl Global {
    pub(crate) fn to_value(&self) -> Value {
        match self {
            Global::Json(json) => Value::from_json(json),
            Global::Number(n) => Value::Number(*n),
            Global::Function(native) => {
                Value::Function(super::Callable::Native(native.clone()))
            }
            Global::Namespace(members) => Value::object(
                members
                    .iter()
                    .map(|(name, member)| (name.clone(), member.to_value()))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Global {
    fn from(json: serde_json::Value) -> Self {
        Global::Json(json)
    }
}

impl From<f64> for Global {
    fn from(n: f64) -> Self {
        Global::Number(n)
    }
}

impl From<NativeFunction> for Global {
    fn from(native: NativeFunction) -> Self {
        Global::Function(native)
    }
}

/// Named fallback globals for template variables.
#[derive(Clone, Default)]
pub struct Scope {
    globals: BTreeMap<String, Global>,
}

static STANDARD: Lazy<Arc<Scope>> = Lazy::new(|| Arc::new(Scope::with_standard()));

impl Scope {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared standard scope used by default options.
    pub fn standard() -> Arc<Scope> {
        Arc::clone(&STANDARD)
    }

    /// Creates an owned scope holding the standard globals, ready to extend.
    pub fn with_standard() -> Self {
        let mut scope = Scope::new();
        scope.insert("Math", math());
        scope.insert("JSON", json_namespace());
        scope.insert("Object", object_function());
        scope.insert("Array", array_function());
        scope.insert("String", string_function());
        scope.insert("Number", number_function());
        scope.insert("Boolean", native("Boolean", |args| Ok(Value::Bool(arg(args, 0).truthy()))));
        scope.insert("parseInt", native("parseInt", parse_int));
        scope.insert("parseFloat", native("parseFloat", parse_float));
        scope.insert("isNaN", native("isNaN", |args| Ok(Value::Bool(num(args, 0).is_nan()))));
        scope.insert(
            "isFinite",
            native("isFinite", |args| Ok(Value::Bool(num(args, 0).is_finite()))),
        );
        scope.insert("encodeURIComponent", native("encodeURIComponent", |args| {
            Ok(Value::from(encode_uri_component(&arg(args, 0).to_js_string())))
        }));
        scope.insert("decodeURIComponent", native("decodeURIComponent", |args| {
            decode_uri_component(&arg(args, 0).to_js_string()).map(Value::from)
        }));
        for kind in [ErrorKind::Error, ErrorKind::TypeError, ErrorKind::RangeError] {
            scope.insert(kind.name(), error_constructor(kind));
        }
        scope.insert("NaN", f64::NAN);
        scope.insert("Infinity", f64::INFINITY);
        scope
    }

    /// Adds or replaces a global, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Global>) -> Option<Global> {
        self.globals.insert(name.into(), value.into())
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Global>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds a native function under `name`.
    pub fn function<F>(self, name: &str, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.with(name, NativeFunction::new(name, func))
    }

    /// Looks up a global.
    pub fn get(&self, name: &str) -> Option<&Global> {
        self.globals.get(name)
    }

    /// Returns `true` if `name` is defined.
    pub fn contains(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    /// Names of all globals, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.globals.keys().map(String::as_str)
    }

    /// Number of globals.
    pub fn len(&self) -> usize {
        self.globals.len()
    }

    /// Returns `true` if the scope defines nothing.
    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.globals.keys()).finish()
    }
}

fn native<F>(name: &str, func: F) -> NativeFunction
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
{
    NativeFunction::new(name, func)
}

pub(crate) fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn num(args: &[Value], index: usize) -> f64 {
    args.get(index).map_or(f64::NAN, Value::to_number)
}

fn math() -> Global {
    let mut members: BTreeMap<String, Global> = BTreeMap::new();

    let unary: [(&str, fn(f64) -> f64); 18] = [
        ("abs", f64::abs),
        ("acos", f64::acos),
        ("asin", f64::asin),
        ("atan", f64::atan),
        ("cbrt", f64::cbrt),
        ("ceil", f64::ceil),
        ("cos", f64::cos),
        ("exp", f64::exp),
        ("floor", f64::floor),
        ("log", f64::ln),
        ("log10", f64::log10),
        ("log2", f64::log2),
        ("round", round),
        ("sign", sign),
        ("sin", f64::sin),
        ("sqrt", f64::sqrt),
        ("tan", f64::tan),
        ("trunc", f64::trunc),
    ];
    for (name, op) in unary {
        members.insert(
            name.to_string(),
            native(name, move |args| Ok(Value::Number(op(num(args, 0))))).into(),
        );
    }

    members.insert(
        "max".to_string(),
        native("max", |args| Ok(Value::Number(fold(args, f64::NEG_INFINITY, f64::max)))).into(),
    );
    members.insert(
        "min".to_string(),
        native("min", |args| Ok(Value::Number(fold(args, f64::INFINITY, f64::min)))).into(),
    );
    members.insert(
        "pow".to_string(),
        native("pow", |args| Ok(Value::Number(pow(num(args, 0), num(args, 1))))).into(),
    );
    members.insert(
        "atan2".to_string(),
        native("atan2", |args| Ok(Value::Number(num(args, 0).atan2(num(args, 1))))).into(),
    );
    members.insert(
        "hypot".to_string(),
        native("hypot", |args| {
            let sum: f64 = args.iter().map(|a| a.to_number().powi(2)).sum();
            Ok(Value::Number(sum.sqrt()))
        })
        .into(),
    );

    let constants = [
        ("E", std::f64::consts::E),
        ("LN10", std::f64::consts::LN_10),
        ("LN2", std::f64::consts::LN_2),
        ("LOG10E", std::f64::consts::LOG10_E),
        ("LOG2E", std::f64::consts::LOG2_E),
        ("PI", std::f64::consts::PI),
        ("SQRT1_2", std::f64::consts::FRAC_1_SQRT_2),
        ("SQRT2", std::f64::consts::SQRT_2),
    ];
    for (name, value) in constants {
        members.insert(name.to_string(), Global::Number(value));
    }

    Global::Namespace(members)
}

/// Rounds half-way cases towards positive infinity.
fn round(n: f64) -> f64 {
    if !n.is_finite() || n.fract() == 0.0 {
        n
    } else {
        (n + 0.5).floor()
    }
}

fn sign(n: f64) -> f64 {
    if n.is_nan() || n == 0.0 {
        n
    } else {
        n.signum()
    }
}

fn pow(base: f64, exp: f64) -> f64 {
    if exp.is_nan() || (base.abs() == 1.0 && exp.is_infinite()) {
        f64::NAN
    } else {
        base.powf(exp)
    }
}

/// `Math.max`/`Math.min`: any `NaN` argument makes the result `NaN`.
fn fold(args: &[Value], init: f64, op: fn(f64, f64) -> f64) -> f64 {
    let mut acc = init;
    for value in args {
        let n = value.to_number();
        if n.is_nan() {
            return f64::NAN;
        }
        acc = op(acc, n);
    }
    acc
}

fn json_namespace() -> Global {
    let mut members: BTreeMap<String, Global> = BTreeMap::new();
    members.insert(
        "stringify".to_string(),
        native("stringify", |args| stringify(&arg(args, 0), args.get(2))).into(),
    );
    members.insert(
        "parse".to_string(),
        native("parse", |args| {
            let text = arg(args, 0).to_js_string();
            serde_json::from_str::<serde_json::Value>(&text)
                .map(|json| Value::from_json(&json))
                .map_err(|e| Error::render(ErrorKind::SyntaxError, format!("JSON.parse: {}", e)))
        })
        .into(),
    );
    Global::Namespace(members)
}

fn stringify(value: &Value, space: Option<&Value>) -> Result<Value> {
    use serde::Serialize;

    let json = match value.json_at(0) {
        Ok(Some(json)) => json,
        Ok(None) => return Ok(Value::Undefined),
        Err(()) => {
            return Err(Error::render(
                ErrorKind::TypeError,
                "Converting circular structure to JSON",
            ))
        }
    };

    let indent = match space {
        Some(Value::Number(n)) if *n >= 1.0 => " ".repeat(n.min(10.0) as usize),
        Some(Value::String(s)) => s.chars().take(10).collect(),
        _ => String::new(),
    };

    let text = if indent.is_empty() {
        serde_json::to_string(&json)?
    } else {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        json.serialize(&mut serializer)?;
        String::from_utf8_lossy(&buf).into_owned()
    };
    Ok(Value::from(text))
}

fn object_function() -> Global {
    native("Object", |args| match arg(args, 0) {
        value @ (Value::Object(_) | Value::Array(_) | Value::Function(_)) => Ok(value),
        _ => Ok(Value::object(BTreeMap::new())),
    })
    .with_property("keys", native("keys", |args| Ok(Value::array(keys(&arg(args, 0))))))
    .with_property(
        "values",
        native("values", |args| {
            let target = arg(args, 0);
            Ok(Value::array(entries(&target).into_iter().map(|(_, v)| v).collect()))
        }),
    )
    .with_property(
        "entries",
        native("entries", |args| {
            let target = arg(args, 0);
            let pairs = entries(&target)
                .into_iter()
                .map(|(k, v)| Value::array(vec![k, v]))
                .collect();
            Ok(Value::array(pairs))
        }),
    )
    .with_property(
        "assign",
        native("assign", |args| {
            let target = arg(args, 0);
            let Value::Object(map) = &target else {
                return Err(Error::render(
                    ErrorKind::TypeError,
                    "Object.assign target must be an object",
                ));
            };
            for source in args.iter().skip(1) {
                for (key, value) in entries(source) {
                    map.borrow_mut().insert(key.to_js_string(), value);
                }
            }
            Ok(target)
        }),
    )
    .into()
}

/// Own enumerable keys, as strings.
pub(crate) fn keys(value: &Value) -> Vec<Value> {
    match value {
        Value::Object(map) => map.borrow().keys().map(|k| Value::from(k.as_str())).collect(),
        Value::Array(items) => (0..items.borrow().len())
            .map(|i| Value::from(i.to_string()))
            .collect(),
        Value::String(s) => (0..s.chars().count())
            .map(|i| Value::from(i.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

fn entries(value: &Value) -> Vec<(Value, Value)> {
    match value {
        Value::Object(map) => map
            .borrow()
            .iter()
            .map(|(k, v)| (Value::from(k.as_str()), v.clone()))
            .collect(),
        Value::Array(items) => items
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::from(i.to_string()), v.clone()))
            .collect(),
        Value::String(s) => s
            .chars()
            .enumerate()
            .map(|(i, c)| (Value::from(i.to_string()), Value::from(c.to_string())))
            .collect(),
        _ => Vec::new(),
    }
}

fn array_function() -> Global {
    native("Array", |args| match args {
        [Value::Number(n)] => {
            if n.fract() != 0.0 || *n < 0.0 || *n > u32::MAX as f64 {
                return Err(Error::render(ErrorKind::RangeError, "Invalid array length"));
            }
            Ok(Value::array(vec![Value::Undefined; *n as usize]))
        }
        _ => Ok(Value::array(args.to_vec())),
    })
    .with_property(
        "isArray",
        native("isArray", |args| Ok(Value::Bool(matches!(arg(args, 0), Value::Array(_))))),
    )
    .with_property(
        "from",
        native("from", |args| {
            let items = match arg(args, 0) {
                Value::Array(items) => items.borrow().clone(),
                Value::String(s) => s.chars().map(|c| Value::from(c.to_string())).collect(),
                Value::Object(map) => {
                    let len = map.borrow().get("length").map_or(0.0, Value::to_number);
                    let len = if len.is_finite() && len > 0.0 { len as usize } else { 0 };
                    vec![Value::Undefined; len]
                }
                _ => Vec::new(),
            };
            Ok(Value::array(items))
        }),
    )
    .with_property("of", native("of", |args| Ok(Value::array(args.to_vec()))))
    .into()
}

fn string_function() -> Global {
    native("String", |args| {
        Ok(match args.first() {
            Some(value) => Value::from(value.to_js_string()),
            None => Value::from(""),
        })
    })
    .with_property(
        "fromCharCode",
        native("fromCharCode", |args| {
            let units: Vec<u16> = args
                .iter()
                .map(|a| super::to_uint32(a.to_number()) as u16)
                .collect();
            Ok(Value::from(String::from_utf16_lossy(&units)))
        }),
    )
    .into()
}

fn number_function() -> Global {
    native("Number", |args| {
        Ok(Value::Number(args.first().map_or(0.0, Value::to_number)))
    })
    .with_property(
        "isInteger",
        native("isInteger", |args| {
            let value = arg(args, 0);
            Ok(Value::Bool(
                matches!(value, Value::Number(n) if n.is_finite() && n.fract() == 0.0),
            ))
        }),
    )
    .with_property(
        "isFinite",
        native("isFinite", |args| {
            Ok(Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_finite())))
        }),
    )
    .with_property(
        "isNaN",
        native("isNaN", |args| {
            Ok(Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_nan())))
        }),
    )
    .with_property("parseInt", native("parseInt", parse_int))
    .with_property("parseFloat", native("parseFloat", parse_float))
    .with_property("EPSILON", f64::EPSILON)
    .with_property("MAX_SAFE_INTEGER", 9_007_199_254_740_991.0)
    .with_property("MIN_SAFE_INTEGER", -9_007_199_254_740_991.0)
    .with_property("MAX_VALUE", f64::MAX)
    .with_property("POSITIVE_INFINITY", f64::INFINITY)
    .with_property("NEGATIVE_INFINITY", f64::NEG_INFINITY)
    .into()
}

fn parse_int(args: &[Value]) -> Result<Value> {
    let text = arg(args, 0).to_js_string();
    let mut s = text.trim_start();
    let negative = s.starts_with('-');
    if s.starts_with(['-', '+']) {
        s = &s[1..];
    }

    let mut radix = match args.get(1) {
        Some(value) if !value.is_nullish() => super::to_int32(value.to_number()),
        _ => 0,
    };
    if radix == 0 || radix == 16 {
        if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            s = rest;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return Ok(Value::Number(f64::NAN));
    }

    let mut result = 0.0;
    let mut any = false;
    for c in s.chars() {
        match c.to_digit(radix as u32) {
            Some(d) => {
                result = result * f64::from(radix) + f64::from(d);
                any = true;
            }
            None => break,
        }
    }
    if !any {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(Value::Number(if negative { -result } else { result }))
}

fn parse_float(args: &[Value]) -> Result<Value> {
    let text = arg(args, 0).to_js_string();
    let s = text.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    if s[end..].starts_with("Infinity") {
        let value = if s.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY };
        return Ok(Value::Number(value));
    }

    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - digits_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        end = frac_end;
    }
    if digits == 0 {
        return Ok(Value::Number(f64::NAN));
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && matches!(bytes[exp_end], b'+' | b'-') {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    Ok(Value::Number(string_to_number(&s[..end])))
}

fn encode_uri_component(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        if byte.is_ascii_alphanumeric() || b"-_.!~*'()".contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn decode_uri_component(text: &str) -> Result<String> {
    let malformed = || Error::render(ErrorKind::Error, "URI malformed");
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = text.get(i + 1..i + 3).ok_or_else(malformed)?;
            out.push(u8::from_str_radix(hex, 16).map_err(|_| malformed())?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| malformed())
}

fn error_constructor(kind: ErrorKind) -> NativeFunction {
    native(kind.name(), move |args| {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Value::from(kind.name()));
        let message = match args.first() {
            Some(value) if !matches!(value, Value::Undefined) => value.to_js_string(),
            _ => String::new(),
        };
        fields.insert("message".to_string(), Value::from(message));
        Ok(Value::object(fields))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(scope: &Scope, path: &[&str], args: &[Value]) -> Value {
        let mut global = scope.get(path[0]).unwrap().clone();
        for name in &path[1..] {
            global = match global {
                Global::Namespace(members) => members.get(*name).unwrap().clone(),
                Global::Function(native) => native.property(name).unwrap().clone(),
                other => panic!("no member {} on {:?}", name, other),
            };
        }
        match global {
            Global::Function(native) => native.call(args).unwrap(),
            other => panic!("{:?} is not callable", other),
        }
    }

    #[test]
    fn test_math_max_and_min() {
        let scope = Scope::with_standard();
        let max = call(&scope, &["Math", "max"], &[Value::Number(0.0), Value::Number(1.0)]);
        assert_eq!(max.to_number(), 1.0);
        let min = call(&scope, &["Math", "min"], &[]);
        assert_eq!(min.to_number(), f64::INFINITY);
        let nan = call(&scope, &["Math", "max"], &[Value::from("x")]);
        assert!(nan.to_number().is_nan());
    }

    #[test]
    fn test_math_round_ties_up() {
        assert_eq!(round(2.5), 3.0);
        assert_eq!(round(-2.5), -2.0);
        assert_eq!(round(1.2), 1.0);
    }

    #[test]
    fn test_json_stringify_and_parse() {
        let scope = Scope::with_standard();
        let data = Value::from_json(&json!({"b": [1, 2], "a": "x"}));
        let text = call(&scope, &["JSON", "stringify"], &[data]);
        assert_eq!(text.to_js_string(), r#"{"a":"x","b":[1,2]}"#);

        let pretty = call(
            &scope,
            &["JSON", "stringify"],
            &[Value::from_json(&json!([1])), Value::Null, Value::Number(2.0)],
        );
        assert_eq!(pretty.to_js_string(), "[\n  1\n]");

        let parsed = call(&scope, &["JSON", "parse"], &[Value::from("[1,\"a\"]")]);
        assert_eq!(parsed.to_json(), Some(json!([1, "a"])));
    }

    #[test]
    fn test_json_parse_error_is_syntax_error() {
        let scope = Scope::with_standard();
        let Some(Global::Namespace(json)) = scope.get("JSON") else {
            panic!("JSON missing");
        };
        let Some(Global::Function(parse)) = json.get("parse") else {
            panic!("parse missing");
        };
        let err = parse.call(&[Value::from("{")]).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::SyntaxError));
    }

    #[test]
    fn test_parse_int() {
        let parse = |s: &str| parse_int(&[Value::from(s)]).unwrap().to_number();
        assert_eq!(parse("42px"), 42.0);
        assert_eq!(parse("  -17"), -17.0);
        assert_eq!(parse("0x1A"), 26.0);
        assert!(parse("px").is_nan());
        let binary = parse_int(&[Value::from("101"), Value::Number(2.0)]).unwrap();
        assert_eq!(binary.to_number(), 5.0);
    }

    #[test]
    fn test_parse_float() {
        let parse = |s: &str| parse_float(&[Value::from(s)]).unwrap().to_number();
        assert_eq!(parse("3.14abc"), 3.14);
        assert_eq!(parse("1e3x"), 1000.0);
        assert_eq!(parse("2e"), 2.0);
        assert_eq!(parse(".5"), 0.5);
        assert_eq!(parse("-Infinity"), f64::NEG_INFINITY);
        assert!(parse("abc").is_nan());
    }

    #[test]
    fn test_uri_component_round_trip() {
        let encoded = encode_uri_component("a b&c/é");
        assert_eq!(encoded, "a%20b%26c%2F%C3%A9");
        assert_eq!(decode_uri_component(&encoded).unwrap(), "a b&c/é");
        assert!(decode_uri_component("%E0%A4%A").is_err());
    }

    #[test]
    fn test_object_helpers() {
        let scope = Scope::with_standard();
        let data = Value::from_json(&json!({"b": 2, "a": 1}));
        let keys = call(&scope, &["Object", "keys"], &[data.clone()]);
        assert_eq!(keys.to_js_string(), "a,b");

        let target = Value::from_json(&json!({"a": 0}));
        call(&scope, &["Object", "assign"], &[target.clone(), data]);
        assert_eq!(target.to_json(), Some(json!({"a": 1, "b": 2})));
    }

    #[test]
    fn test_error_constructor_builds_object() {
        let scope = Scope::with_standard();
        let err = call(&scope, &["TypeError"], &[Value::from("bad")]);
        assert_eq!(err.to_json(), Some(json!({"name": "TypeError", "message": "bad"})));
    }

    #[test]
    fn test_standard_scope_is_shared() {
        let a = Scope::standard();
        let b = Scope::standard();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.contains("Math"));
        assert!(!Scope::new().contains("Math"));
    }
}
