//! Runtime values of the template language.
//!
//! Template logic runs on [`Value`]s. Data passed to a render call arrives as
//! JSON (anything implementing [`serde::Serialize`] is converted through
//! [`serde_json::Value`]) and is turned into values with [`Value::from_json`].
//! Arrays and objects are shared references, so a template that mutates an
//! object sees the change through every binding of it, just like the
//! scripting language the syntax is borrowed from.
//!
//! Values are confined to the thread running the render. What crosses thread
//! boundaries is the [`Scope`]: a `Send + Sync` description of fallback
//! globals that is turned into values each time a template binds them.
//!
//! ## Coercions
//!
//! | Operation | Method |
//! |-----------|--------|
//! | string form used by output tags and `+` | [`Value::to_js_string`] |
//! | numeric form used by arithmetic | [`Value::to_number`] |
//! | truthiness used by `if` and `&&` | [`Value::truthy`] |
//! | `typeof` | [`Value::type_of`] |
//! | `===` / `==` | [`Value::strict_equals`] / [`Value::loose_equals`] |

mod scope;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::compiler::ast::FunctionDef;
use crate::runtime::env::Env;

pub use scope::{Global, NativeFunction, Scope};
pub(crate) use scope::{arg, keys};

/// Shared, mutable array storage.
pub type Array = Rc<RefCell<Vec<Value>>>;

/// Shared, mutable object storage. Keys iterate in sorted order.
pub type Object = Rc<RefCell<BTreeMap<String, Value>>>;

/// Nesting limit for conversions that walk arrays and objects.
const MAX_NESTING: usize = 256;

/// A value manipulated by template logic.
#[derive(Clone, Default)]
pub enum Value {
    /// The value of missing variables and properties.
    #[default]
    Undefined,
    /// JSON `null`.
    Null,
    /// A boolean.
    Bool(bool),
    /// A double-precision number.
    Number(f64),
    /// An immutable string.
    String(Rc<str>),
    /// An array, shared by reference.
    Array(Array),
    /// An object, shared by reference.
    Object(Object),
    /// A callable function.
    Function(Callable),
    /// A compiled regular expression literal.
    Regex(Arc<RegexValue>),
}

/// Anything a template can call.
#[derive(Clone)]
pub enum Callable {
    /// A function implemented in Rust.
    Native(NativeFunction),
    /// A function defined by template code, with its captured environment.
    Closure(Rc<Closure>),
    /// The `include` function bound into every template.
    Include,
    /// A builtin method read off a value, such as `items.push`.
    Bound(Rc<BoundMethod>),
}

/// A function defined by template code.
pub struct Closure {
    pub(crate) def: Arc<FunctionDef>,
    pub(crate) env: Rc<Env>,
}

/// A builtin method together with the value it was read from.
pub struct BoundMethod {
    pub(crate) receiver: Value,
    pub(crate) name: Rc<str>,
}

/// A regular expression literal such as `/\d+/g`.
#[derive(Debug, Clone)]
pub struct RegexValue {
    pub(crate) source: Arc<str>,
    pub(crate) flags: Arc<str>,
    pub(crate) regex: regex::Regex,
}

impl RegexValue {
    /// Compiles a regex literal body with its flags.
    ///
    /// The flags `i`, `m` and `s` become inline flags of the compiled
    /// expression; `g` selects replace-all behaviour; `u` and `y` are accepted
    /// and ignored.
    pub fn new(source: &str, flags: &str) -> Result<Self, String> {
        let mut inline = String::new();
        for flag in flags.chars() {
            match flag {
                'i' | 'm' | 's' => {
                    if inline.contains(flag) {
                        return Err(format!("Invalid flags supplied to RegExp: '{}'", flags));
                    }
                    inline.push(flag);
                }
                'g' | 'u' | 'y' => {}
                _ => return Err(format!("Invalid flags supplied to RegExp: '{}'", flags)),
            }
        }

        let pattern = if inline.is_empty() {
            source.to_string()
        } else {
            format!("(?{}){}", inline, source)
        };
        let regex = regex::Regex::new(&pattern)
            .map_err(|_| format!("Invalid regular expression: /{}/", source))?;

        Ok(Self {
            source: source.into(),
            flags: flags.into(),
            regex,
        })
    }

    /// The pattern text between the slashes.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The flags after the closing slash.
    pub fn flags(&self) -> &str {
        &self.flags
    }

    /// Returns `true` for a `g` regex.
    pub fn is_global(&self) -> bool {
        self.flags.contains('g')
    }
}

impl Callable {
    /// The function's name, or an empty string for anonymous functions.
    pub fn name(&self) -> &str {
        match self {
            Callable::Native(native) => native.name(),
            Callable::Closure(closure) => closure.def.name.as_deref().unwrap_or(""),
            Callable::Include => "include",
            Callable::Bound(bound) => &bound.name,
        }
    }

    fn same(&self, other: &Callable) -> bool {
        match (self, other) {
            (Callable::Native(a), Callable::Native(b)) => a.same(b),
            (Callable::Closure(a), Callable::Closure(b)) => Rc::ptr_eq(a, b),
            (Callable::Include, Callable::Include) => true,
            (Callable::Bound(a), Callable::Bound(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function: {}]", self.name())
    }
}

impl Value {
    /// Creates an array value.
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    /// Creates an object value.
    pub fn object(entries: BTreeMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(entries)))
    }

    /// Converts JSON data into a value. JSON objects become objects with
    /// sorted keys.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.as_str().into()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts the value to JSON the way `JSON.stringify` sees it.
    ///
    /// Returns `None` for values JSON cannot represent (`undefined`,
    /// functions) and for structures nested too deeply, which includes
    /// self-referencing ones. Non-finite numbers become `null`; object
    /// properties holding unrepresentable values are skipped and array
    /// elements become `null`.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        self.json_at(0).ok().flatten()
    }

    /// Like [`to_json`](Self::to_json), but reports excessive nesting.
    pub(crate) fn json_at(&self, depth: usize) -> Result<Option<serde_json::Value>, ()> {
        if depth > MAX_NESTING {
            return Err(());
        }
        Ok(Some(match self {
            Value::Undefined | Value::Function(_) => return Ok(None),
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Regex(_) => serde_json::Value::Object(serde_json::Map::new()),
            Value::Array(items) => {
                let items = items.borrow();
                let mut out = Vec::with_capacity(items.len());
                for item in items.iter() {
                    out.push(item.json_at(depth + 1)?.unwrap_or(serde_json::Value::Null));
                }
                serde_json::Value::Array(out)
            }
            Value::Object(map) => {
                let map = map.borrow();
                let mut out = serde_json::Map::new();
                for (key, value) in map.iter() {
                    if let Some(json) = value.json_at(depth + 1)? {
                        out.insert(key.clone(), json);
                    }
                }
                serde_json::Value::Object(out)
            }
        }))
    }

    /// Returns `true` for `undefined` and `null`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Truthiness as used by conditions and logical operators.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// The result of the `typeof` operator.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) | Value::Regex(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
        }
    }

    /// Numeric conversion as used by arithmetic operators.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Array(_) | Value::Object(_) => string_to_number(&self.to_js_string()),
            Value::Function(_) | Value::Regex(_) => f64::NAN,
        }
    }

    /// String conversion as used by output tags and string concatenation.
    pub fn to_js_string(&self) -> String {
        self.string_at(0)
    }

    fn string_at(&self, depth: usize) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::Array(items) => {
                if depth > MAX_NESTING {
                    return String::new();
                }
                let items = items.borrow();
                let parts: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.string_at(depth + 1),
                    })
                    .collect();
                parts.join(",")
            }
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(callable) => match callable {
                Callable::Closure(_) => format!("function {}() {{ [code] }}", callable.name()),
                _ => format!("function {}() {{ [native code] }}", callable.name()),
            },
            Value::Regex(re) => format!("/{}/{}", re.source, re.flags),
        }
    }

    /// Converts arrays, objects, functions and regexes to their string form
    /// and leaves primitives alone.
    pub(crate) fn to_primitive(&self) -> Value {
        match self {
            Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Regex(_) => {
                Value::String(self.to_js_string().into())
            }
            other => other.clone(),
        }
    }

    /// The `===` operator.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a.same(b),
            (Value::Regex(a), Value::Regex(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Equality used by `includes`, where `NaN` equals itself.
    pub(crate) fn same_value_zero(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }

    /// The `==` operator.
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => {
                if matches!(self, Value::Bool(_) | Value::Number(_) | Value::String(_))
                    && matches!(other, Value::Bool(_) | Value::Number(_) | Value::String(_))
                {
                    self.to_number() == other.to_number()
                } else {
                    self.to_primitive().loose_equals(&other.to_primitive())
                }
            }
            (
                Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Regex(_),
                Value::Number(_) | Value::String(_),
            )
            | (
                Value::Number(_) | Value::String(_),
                Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Regex(_),
            ) => self.to_primitive().loose_equals(&other.to_primitive()),
            _ => self.strict_equals(other),
        }
    }

    /// String form used as a property key.
    pub(crate) fn to_property_key(&self) -> String {
        self.to_js_string()
    }

    /// Returns the string contents, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Array(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Value::Object(map) => f.debug_map().entries(map.borrow().iter()).finish(),
            Value::Function(callable) => write!(f, "{:?}", callable),
            Value::Regex(re) => write!(f, "/{}/{}", re.source, re.flags),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_js_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        serde_json::Value::Null
    } else if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

/// Formats a number the way templates print it: integers without a
/// fraction, `NaN` and `Infinity` by name, and an exponent for very large or
/// very small magnitudes.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }

    let abs = n.abs();
    if !(1e-6..1e21).contains(&abs) {
        let formatted = format!("{:e}", n);
        return match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => formatted,
        };
    }
    if n.fract() == 0.0 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

/// Parses a string the way numeric conversion does: surrounding whitespace
/// is ignored, the empty string is zero, and anything malformed is `NaN`.
pub(crate) fn string_to_number(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }
    let radix = match s.get(..2) {
        Some("0x") | Some("0X") => Some(16),
        Some("0o") | Some("0O") => Some(8),
        Some("0b") | Some("0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        return u64::from_str_radix(&s[2..], radix)
            .map(|n| n as f64)
            .unwrap_or(f64::NAN);
    }
    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return f64::NAN;
    }
    s.parse::<f64>().unwrap_or(f64::NAN)
}

/// The 32-bit integer conversion used by bitwise operators.
pub(crate) fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    (n.trunc() % 4_294_967_296.0) as i64 as u32 as i32
}

pub(crate) fn to_uint32(n: f64) -> u32 {
    to_int32(n) as u32
}
