//! Properties and builtin methods of values.
//!
//! Reading a method name off a value yields a [`BoundMethod`] that remembers
//! the receiver; calling it dispatches here by receiver type and name.
//! Strings are indexed by Unicode scalar values, so `length`, `charAt` and
//! `slice` count characters rather than UTF-16 code units.

use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::Arc;

use regex::Captures;

use super::{Exec, Interpreter, Throw};
use crate::error::ErrorKind;
use crate::value::{
    arg, format_number, to_uint32, Array, BoundMethod, Callable, Object, RegexValue, Value,
};

const STRING_METHODS: &[&str] = &[
    "at",
    "charAt",
    "charCodeAt",
    "codePointAt",
    "concat",
    "endsWith",
    "includes",
    "indexOf",
    "lastIndexOf",
    "localeCompare",
    "match",
    "padEnd",
    "padStart",
    "repeat",
    "replace",
    "replaceAll",
    "search",
    "slice",
    "split",
    "startsWith",
    "substr",
    "substring",
    "toLowerCase",
    "toString",
    "toUpperCase",
    "trim",
    "trimEnd",
    "trimStart",
];

const ARRAY_METHODS: &[&str] = &[
    "at",
    "concat",
    "every",
    "fill",
    "filter",
    "find",
    "findIndex",
    "flat",
    "forEach",
    "includes",
    "indexOf",
    "join",
    "lastIndexOf",
    "map",
    "pop",
    "push",
    "reduce",
    "reduceRight",
    "reverse",
    "shift",
    "slice",
    "some",
    "sort",
    "splice",
    "toString",
    "unshift",
];

const NUMBER_METHODS: &[&str] = &["toFixed", "toString"];

const REGEX_METHODS: &[&str] = &["exec", "test", "toString"];

/// Parses a canonical array index such as `"3"` (not `"03"` or `"-1"`).
pub(crate) fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

/// Largest index an assignment may grow an array to.
const MAX_ARRAY_GROWTH: usize = 1 << 24;

fn bound(receiver: &Value, name: &str) -> Value {
    Value::Function(Callable::Bound(Rc::new(BoundMethod {
        receiver: receiver.clone(),
        name: name.into(),
    })))
}

fn integer(value: &Value) -> f64 {
    let n = value.to_number();
    if n.is_nan() {
        0.0
    } else {
        n.trunc()
    }
}

/// Resolves a possibly negative position against `len`, as `slice` does.
fn relative(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = integer(value);
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

/// Clamps a position into `0..=len`, as `substring` does.
fn clamped(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    integer(value).clamp(0.0, len as f64) as usize
}

fn char_index(text: &str, byte: usize) -> usize {
    text[..byte].chars().count()
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices().nth(chars).map_or(text.len(), |(i, _)| i)
}

/// Converts the argument of `match` and `search` to a regex; strings are
/// used as patterns.
fn to_regex(value: &Value) -> Exec<Arc<RegexValue>> {
    match value {
        Value::Regex(re) => Ok(re.clone()),
        other => {
            let source = if other.is_nullish() {
                String::new()
            } else {
                other.to_js_string()
            };
            RegexValue::new(&source, "")
                .map(Arc::new)
                .map_err(|message| Throw::new(ErrorKind::SyntaxError, message))
        }
    }
}

fn match_array(caps: &Captures<'_>) -> Value {
    Value::array(
        caps.iter()
            .map(|group| group.map_or(Value::Undefined, |m| Value::from(m.as_str())))
            .collect(),
    )
}

/// One match found by `replace`.
struct Found {
    start: usize,
    end: usize,
    groups: Vec<Option<String>>,
}

fn find_all(text: &str, pattern: &Value, all: bool) -> Vec<Found> {
    match pattern {
        Value::Regex(re) => {
            let captures = re.regex.captures_iter(text).map(|caps| {
                let whole = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
                Found {
                    start: whole.0,
                    end: whole.1,
                    groups: caps
                        .iter()
                        .skip(1)
                        .map(|group| group.map(|m| m.as_str().to_string()))
                        .collect(),
                }
            });
            if all {
                captures.collect()
            } else {
                captures.take(1).collect()
            }
        }
        other => {
            let needle = other.to_js_string();
            let found = text.match_indices(needle.as_str()).map(|(start, m)| Found {
                start,
                end: start + m.len(),
                groups: Vec::new(),
            });
            if all {
                found.collect()
            } else {
                found.take(1).collect()
            }
        }
    }
}

/// Expands `$$`, `$&`, `` $` ``, `$'` and `$n` in a replacement string.
fn expand_replacement(template: &str, text: &str, found: &Found) -> String {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('&') => {
                chars.next();
                out.push_str(&text[found.start..found.end]);
            }
            Some('`') => {
                chars.next();
                out.push_str(&text[..found.start]);
            }
            Some('\'') => {
                chars.next();
                out.push_str(&text[found.end..]);
            }
            Some(d) if d.is_ascii_digit() => {
                let mut digits = String::new();
                digits.push(d);
                chars.next();
                if let Some(next) = chars.peek().copied().filter(char::is_ascii_digit) {
                    let two: usize = format!("{}{}", d, next).parse().unwrap_or(0);
                    if two >= 1 && two <= found.groups.len() {
                        digits.push(next);
                        chars.next();
                    }
                }
                let index: usize = digits.parse().unwrap_or(0);
                match found.groups.get(index.wrapping_sub(1)) {
                    Some(group) if index >= 1 => out.push_str(group.as_deref().unwrap_or("")),
                    _ => {
                        out.push('$');
                        out.push_str(&digits);
                    }
                }
            }
            _ => out.push('$'),
        }
    }
    out
}

fn callback(args: &[Value], index: usize, method: &str) -> Exec<Callable> {
    match args.get(index) {
        Some(Value::Function(callable)) => Ok(callable.clone()),
        Some(other) => Err(Throw::type_error(format!(
            "{} is not a function",
            other.to_js_string()
        ))),
        None => Err(Throw::type_error(format!(
            "undefined is not a function (in {})",
            method
        ))),
    }
}

fn sort_order(n: f64) -> Ordering {
    if n < 0.0 {
        Ordering::Less
    } else if n > 0.0 {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

/// Stable merge sort with a fallible comparator.
///
/// Unlike `slice::sort_by`, an inconsistent comparator cannot panic here; it
/// only produces an unspecified order.
fn merge_sort<F>(mut items: Vec<Value>, compare: &mut F) -> Exec<Vec<Value>>
where
    F: FnMut(&Value, &Value) -> Exec<Ordering>,
{
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let mut left = merge_sort(items, compare)?;
    let mut right = merge_sort(right, compare)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        if compare(&right[j], &left[i])? == Ordering::Less {
            merged.push(std::mem::take(&mut right[j]));
            j += 1;
        } else {
            merged.push(std::mem::take(&mut left[i]));
            i += 1;
        }
    }
    merged.extend(left.drain(i..));
    merged.extend(right.drain(j..));
    Ok(merged)
}

fn flatten(items: &[Value], depth: f64, out: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::Array(inner) if depth >= 1.0 => flatten(&inner.borrow(), depth - 1.0, out),
            other => out.push(other.clone()),
        }
    }
}

/// `Number.prototype.toFixed`, rounding exact ties away from zero.
pub(crate) fn to_fixed(n: f64, digits: usize) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.abs() >= 1e21 || n.is_infinite() {
        return format_number(n);
    }

    let abs = n.abs();
    // The exact decimal expansion of a double has at most 1074 fraction digits.
    let exact = format!("{:.1074}", abs);
    let exact = exact.trim_end_matches('0');
    let fraction = exact.split_once('.').map_or("", |(_, f)| f);
    let tie = fraction.len() == digits + 1 && fraction.ends_with('5');

    let mut text = if tie {
        round_up(&exact[..exact.len() - 1])
    } else {
        format!("{:.*}", digits, abs)
    };
    if text.ends_with('.') {
        text.pop();
    }
    if n < 0.0 {
        text.insert(0, '-');
    }
    text
}

/// Adds one unit in the last place of a decimal string.
fn round_up(decimal: &str) -> String {
    let mut digits: Vec<u8> = decimal.bytes().collect();
    let mut i = digits.len();
    loop {
        if i == 0 {
            digits.insert(0, b'1');
            break;
        }
        i -= 1;
        match digits[i] {
            b'.' => continue,
            b'9' => digits[i] = b'0',
            d => {
                digits[i] = d + 1;
                break;
            }
        }
    }
    String::from_utf8(digits).unwrap_or_default()
}

fn radix_string(n: f64, radix: u32) -> String {
    if !n.is_finite() {
        return format_number(n);
    }
    let negative = n < 0.0;
    let mut int = n.abs().trunc();
    let mut frac = n.abs() - int;

    let mut digits = Vec::new();
    if int == 0.0 {
        digits.push('0');
    }
    while int >= 1.0 {
        let d = (int % f64::from(radix)) as u32;
        digits.push(std::char::from_digit(d, radix).unwrap_or('0'));
        int = (int / f64::from(radix)).trunc();
    }
    if negative {
        digits.push('-');
    }
    let mut out: String = digits.into_iter().rev().collect();

    if frac > 0.0 {
        out.push('.');
        for _ in 0..20 {
            frac *= f64::from(radix);
            let d = frac.trunc() as u32;
            out.push(std::char::from_digit(d, radix).unwrap_or('0'));
            frac -= frac.trunc();
            if frac == 0.0 {
                break;
            }
        }
    }
    out
}

impl<'h> Interpreter<'h> {
    /// Reads `target[key]`.
    pub(crate) fn get_property(&mut self, target: &Value, key: &str) -> Exec<Value> {
        Ok(match target {
            Value::Undefined | Value::Null => {
                return Err(Throw::type_error(format!(
                    "Cannot read properties of {} (reading '{}')",
                    target.to_js_string(),
                    key
                )))
            }
            Value::String(text) => {
                if key == "length" {
                    Value::Number(text.chars().count() as f64)
                } else if let Some(index) = array_index(key) {
                    text.chars()
                        .nth(index)
                        .map_or(Value::Undefined, |c| Value::from(c.to_string()))
                } else if STRING_METHODS.contains(&key) {
                    bound(target, key)
                } else {
                    Value::Undefined
                }
            }
            Value::Array(items) => {
                if key == "length" {
                    Value::Number(items.borrow().len() as f64)
                } else if let Some(index) = array_index(key) {
                    items.borrow().get(index).cloned().unwrap_or_default()
                } else if ARRAY_METHODS.contains(&key) {
                    bound(target, key)
                } else {
                    Value::Undefined
                }
            }
            Value::Object(map) => match map.borrow().get(key) {
                Some(value) => value.clone(),
                None if key == "hasOwnProperty" || key == "toString" => bound(target, key),
                None => Value::Undefined,
            },
            Value::Number(_) if NUMBER_METHODS.contains(&key) => bound(target, key),
            Value::Bool(_) if key == "toString" => bound(target, key),
            Value::Regex(re) => match key {
                "source" => Value::from(re.source()),
                "flags" => Value::from(re.flags()),
                "global" => Value::Bool(re.is_global()),
                "lastIndex" => Value::Number(0.0),
                _ if REGEX_METHODS.contains(&key) => bound(target, key),
                _ => Value::Undefined,
            },
            Value::Function(callable) => match (key, callable) {
                ("name", _) => Value::from(callable.name()),
                (_, Callable::Native(native)) => {
                    native.property(key).map_or(Value::Undefined, |g| g.to_value())
                }
                _ => Value::Undefined,
            },
            _ => Value::Undefined,
        })
    }

    /// Writes `target[key] = value`.
    pub(crate) fn set_property(&mut self, target: &Value, key: &str, value: Value) -> Exec<()> {
        match target {
            Value::Object(map) => {
                map.borrow_mut().insert(key.to_string(), value);
                Ok(())
            }
            Value::Array(items) => set_array_property(items, key, value),
            Value::Undefined | Value::Null => Err(Throw::type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                target.to_js_string(),
                key
            ))),
            other => Err(Throw::type_error(format!(
                "Cannot create property '{}' on {} '{}'",
                key,
                other.type_of(),
                other.to_js_string()
            ))),
        }
    }

    /// Implements `delete target[key]`.
    pub(crate) fn delete_property(&mut self, target: &Value, key: &str) -> Exec<()> {
        match target {
            Value::Object(map) => {
                map.borrow_mut().remove(key);
            }
            Value::Array(items) => {
                if let Some(index) = array_index(key) {
                    if let Some(slot) = items.borrow_mut().get_mut(index) {
                        *slot = Value::Undefined;
                    }
                }
            }
            Value::Undefined | Value::Null => {
                return Err(Throw::type_error(format!(
                    "Cannot convert undefined or null to object (deleting '{}')",
                    key
                )))
            }
            _ => {}
        }
        Ok(())
    }

    /// Calls a builtin method read off `receiver`.
    pub(crate) fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
    ) -> Exec<Value> {
        match receiver {
            Value::String(text) => self.string_method(text, name, &args),
            Value::Array(items) => self.array_method(receiver, items, name, args),
            Value::Object(map) => Ok(object_method(map, name, &args)),
            Value::Number(n) => number_method(*n, name, &args),
            Value::Bool(b) => Ok(Value::from(b.to_string())),
            Value::Regex(re) => Ok(regex_method(re, name, &args)),
            other => Err(Throw::type_error(format!(
                "{}.{} is not a function",
                other.to_js_string(),
                name
            ))),
        }
    }

    fn string_method(&mut self, text: &Rc<str>, name: &str, args: &[Value]) -> Exec<Value> {
        let len = text.chars().count();
        let search = || arg(args, 0).to_js_string();

        Ok(match name {
            "toString" => Value::String(text.clone()),
            "at" => {
                let n = integer(&arg(args, 0));
                let index = if n < 0.0 { len as f64 + n } else { n };
                if index < 0.0 {
                    Value::Undefined
                } else {
                    text.chars()
                        .nth(index as usize)
                        .map_or(Value::Undefined, |c| Value::from(c.to_string()))
                }
            }
            "charAt" => {
                let n = integer(&arg(args, 0));
                if n < 0.0 {
                    Value::from("")
                } else {
                    Value::from(text.chars().nth(n as usize).map(String::from).unwrap_or_default())
                }
            }
            "charCodeAt" | "codePointAt" => {
                let n = integer(&arg(args, 0));
                let c = if n < 0.0 { None } else { text.chars().nth(n as usize) };
                match (c, name) {
                    (Some(c), _) => Value::Number(f64::from(u32::from(c))),
                    (None, "charCodeAt") => Value::Number(f64::NAN),
                    (None, _) => Value::Undefined,
                }
            }
            "indexOf" => {
                let needle = search();
                let from = clamped(&arg(args, 1), len, 0);
                let start = byte_offset(text, from);
                text[start..]
                    .find(needle.as_str())
                    .map_or(Value::Number(-1.0), |i| {
                        Value::Number(char_index(text, start + i) as f64)
                    })
            }
            "lastIndexOf" => {
                let needle = search();
                text.rfind(needle.as_str())
                    .map_or(Value::Number(-1.0), |i| Value::Number(char_index(text, i) as f64))
            }
            "includes" => {
                let start = byte_offset(text, clamped(&arg(args, 1), len, 0));
                Value::Bool(text[start..].contains(search().as_str()))
            }
            "startsWith" => {
                let start = byte_offset(text, clamped(&arg(args, 1), len, 0));
                Value::Bool(text[start..].starts_with(search().as_str()))
            }
            "endsWith" => {
                let end = byte_offset(text, clamped(&arg(args, 1), len, len));
                Value::Bool(text[..end].ends_with(search().as_str()))
            }
            "slice" => {
                let start = relative(&arg(args, 0), len, 0);
                let end = relative(&arg(args, 1), len, len);
                let count = end.saturating_sub(start);
                Value::from(text.chars().skip(start).take(count).collect::<String>())
            }
            "substring" => {
                let a = clamped(&arg(args, 0), len, 0);
                let b = clamped(&arg(args, 1), len, len);
                let (start, end) = if a <= b { (a, b) } else { (b, a) };
                Value::from(text.chars().skip(start).take(end - start).collect::<String>())
            }
            "substr" => {
                let start = relative(&arg(args, 0), len, 0);
                let count = match arg(args, 1) {
                    Value::Undefined => len,
                    other => integer(&other).max(0.0) as usize,
                };
                Value::from(text.chars().skip(start).take(count).collect::<String>())
            }
            "toUpperCase" => Value::from(text.to_uppercase()),
            "toLowerCase" => Value::from(text.to_lowercase()),
            "trim" => Value::from(text.trim()),
            "trimStart" => Value::from(text.trim_start()),
            "trimEnd" => Value::from(text.trim_end()),
            "padStart" | "padEnd" => {
                let target = integer(&arg(args, 0)).max(0.0) as usize;
                let fill = match arg(args, 1) {
                    Value::Undefined => " ".to_string(),
                    other => other.to_js_string(),
                };
                if target <= len || fill.is_empty() {
                    Value::String(text.clone())
                } else {
                    let padding: String = fill.chars().cycle().take(target - len).collect();
                    if name == "padStart" {
                        Value::from(padding + &**text)
                    } else {
                        Value::from(text.to_string() + &padding)
                    }
                }
            }
            "repeat" => {
                let count = arg(args, 0).to_number();
                if count < 0.0 || count.is_infinite() {
                    return Err(Throw::range_error(format!(
                        "Invalid count value: {}",
                        format_number(count)
                    )));
                }
                let count = if count.is_nan() { 0 } else { count as usize };
                if text.len().saturating_mul(count) > MAX_ARRAY_GROWTH * 16 {
                    return Err(Throw::range_error("Invalid string length"));
                }
                Value::from(text.repeat(count))
            }
            "concat" => {
                let mut out = text.to_string();
                for value in args {
                    out.push_str(&value.to_js_string());
                }
                Value::from(out)
            }
            "localeCompare" => {
                let other = search();
                Value::Number(match (**text).cmp(other.as_str()) {
                    Ordering::Less => -1.0,
                    Ordering::Equal => 0.0,
                    Ordering::Greater => 1.0,
                })
            }
            "split" => self.split(text, args),
            "replace" | "replaceAll" => {
                let pattern = arg(args, 0);
                let all = match &pattern {
                    Value::Regex(re) if name == "replaceAll" && !re.is_global() => {
                        return Err(Throw::type_error(
                            "replaceAll must be called with a global RegExp",
                        ))
                    }
                    Value::Regex(re) => re.is_global(),
                    _ => name == "replaceAll",
                };
                self.replace(text, &pattern, all, &arg(args, 1))?
            }
            "match" => {
                let re = to_regex(&arg(args, 0))?;
                if re.is_global() {
                    let found: Vec<Value> = re
                        .regex
                        .find_iter(text)
                        .map(|m| Value::from(m.as_str()))
                        .collect();
                    if found.is_empty() {
                        Value::Null
                    } else {
                        Value::array(found)
                    }
                } else {
                    re.regex
                        .captures(text)
                        .map_or(Value::Null, |caps| match_array(&caps))
                }
            }
            "search" => {
                to_regex(&arg(args, 0))?
                    .regex
                    .find(text)
                    .map_or(Value::Number(-1.0), |m| {
                        Value::Number(char_index(text, m.start()) as f64)
                    })
            }
            _ => return Err(Throw::type_error(format!("{} is not a function", name))),
        })
    }

    fn split(&mut self, text: &str, args: &[Value]) -> Value {
        let limit = match arg(args, 1) {
            Value::Undefined => usize::MAX,
            other => to_uint32(other.to_number()) as usize,
        };
        let parts: Vec<Value> = match arg(args, 0) {
            Value::Undefined => vec![Value::from(text)],
            Value::Regex(re) => re.regex.split(text).map(Value::from).collect(),
            separator => {
                let separator = separator.to_js_string();
                if separator.is_empty() {
                    text.chars().map(|c| Value::from(c.to_string())).collect()
                } else {
                    text.split(separator.as_str()).map(Value::from).collect()
                }
            }
        };
        Value::array(parts.into_iter().take(limit).collect())
    }

    fn replace(
        &mut self,
        text: &str,
        pattern: &Value,
        all: bool,
        replacement: &Value,
    ) -> Exec<Value> {
        let found = find_all(text, pattern, all);
        if found.is_empty() {
            return Ok(Value::from(text));
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for hit in &found {
            out.push_str(&text[last..hit.start]);
            match replacement {
                Value::Function(callable) => {
                    let mut args = vec![Value::from(&text[hit.start..hit.end])];
                    args.extend(
                        hit.groups
                            .iter()
                            .map(|g| g.as_deref().map_or(Value::Undefined, Value::from)),
                    );
                    args.push(Value::Number(char_index(text, hit.start) as f64));
                    args.push(Value::from(text));
                    let value = self.call(callable, args)?;
                    out.push_str(&value.to_js_string());
                }
                other => out.push_str(&expand_replacement(&other.to_js_string(), text, hit)),
            }
            last = hit.end;
        }
        out.push_str(&text[last..]);
        Ok(Value::from(out))
    }

    fn array_method(
        &mut self,
        receiver: &Value,
        items: &Array,
        name: &str,
        args: Vec<Value>,
    ) -> Exec<Value> {
        let len = items.borrow().len();
        Ok(match name {
            "push" => {
                let mut items = items.borrow_mut();
                items.extend(args);
                Value::Number(items.len() as f64)
            }
            "pop" => items.borrow_mut().pop().unwrap_or_default(),
            "shift" => {
                let mut items = items.borrow_mut();
                if items.is_empty() {
                    Value::Undefined
                } else {
                    items.remove(0)
                }
            }
            "unshift" => {
                let mut items = items.borrow_mut();
                items.splice(0..0, args);
                Value::Number(items.len() as f64)
            }
            "slice" => {
                let start = relative(&arg(&args, 0), len, 0);
                let end = relative(&arg(&args, 1), len, len);
                let items = items.borrow();
                Value::array(items[start..end.max(start)].to_vec())
            }
            "splice" => {
                let start = relative(&arg(&args, 0), len, 0);
                let count = match args.len() {
                    0 => 0,
                    1 => len - start,
                    _ => (integer(&args[1]).max(0.0) as usize).min(len - start),
                };
                let inserted: Vec<Value> = args.into_iter().skip(2).collect();
                let removed: Vec<Value> = items
                    .borrow_mut()
                    .splice(start..start + count, inserted)
                    .collect();
                Value::array(removed)
            }
            "concat" => {
                let mut out = items.borrow().clone();
                for value in args {
                    match value {
                        Value::Array(other) => out.extend(other.borrow().iter().cloned()),
                        other => out.push(other),
                    }
                }
                Value::array(out)
            }
            "join" | "toString" => {
                let separator = match arg(&args, 0) {
                    Value::Undefined => ",".to_string(),
                    other if name == "join" => other.to_js_string(),
                    _ => ",".to_string(),
                };
                if separator == "," {
                    Value::from(receiver.to_js_string())
                } else {
                    let parts: Vec<String> = items
                        .borrow()
                        .iter()
                        .map(|item| match item {
                            Value::Undefined | Value::Null => String::new(),
                            other => other.to_js_string(),
                        })
                        .collect();
                    Value::from(parts.join(&separator))
                }
            }
            "reverse" => {
                items.borrow_mut().reverse();
                receiver.clone()
            }
            "indexOf" => {
                let needle = arg(&args, 0);
                let from = relative(&arg(&args, 1), len, 0);
                let items = items.borrow();
                items
                    .iter()
                    .enumerate()
                    .skip(from)
                    .find(|(_, item)| item.strict_equals(&needle))
                    .map_or(Value::Number(-1.0), |(i, _)| Value::Number(i as f64))
            }
            "lastIndexOf" => {
                let needle = arg(&args, 0);
                let items = items.borrow();
                items
                    .iter()
                    .rposition(|item| item.strict_equals(&needle))
                    .map_or(Value::Number(-1.0), |i| Value::Number(i as f64))
            }
            "includes" => {
                let needle = arg(&args, 0);
                Value::Bool(items.borrow().iter().any(|item| item.same_value_zero(&needle)))
            }
            "at" => {
                let n = integer(&arg(&args, 0));
                let index = if n < 0.0 { len as f64 + n } else { n };
                if index < 0.0 {
                    Value::Undefined
                } else {
                    items.borrow().get(index as usize).cloned().unwrap_or_default()
                }
            }
            "fill" => {
                let value = arg(&args, 0);
                let start = relative(&arg(&args, 1), len, 0);
                let end = relative(&arg(&args, 2), len, len);
                for slot in items.borrow_mut().iter_mut().take(end).skip(start) {
                    *slot = value.clone();
                }
                receiver.clone()
            }
            "flat" => {
                let depth = match arg(&args, 0) {
                    Value::Undefined => 1.0,
                    other => integer(&other),
                };
                let mut out = Vec::new();
                flatten(&items.borrow(), depth, &mut out);
                Value::array(out)
            }
            "sort" => {
                let snapshot = items.borrow().clone();
                let sorted = match args.first() {
                    None | Some(Value::Undefined) => {
                        let (defined, undefined): (Vec<Value>, Vec<Value>) = snapshot
                            .into_iter()
                            .partition(|item| !matches!(item, Value::Undefined));
                        let mut by_string = |a: &Value, b: &Value| -> Exec<Ordering> {
                            Ok(a.to_js_string().cmp(&b.to_js_string()))
                        };
                        let mut sorted = merge_sort(defined, &mut by_string)?;
                        sorted.extend(undefined);
                        sorted
                    }
                    Some(_) => {
                        let compare = callback(&args, 0, "sort")?;
                        merge_sort(snapshot, &mut |a: &Value, b: &Value| -> Exec<Ordering> {
                            let result = self.call(&compare, vec![a.clone(), b.clone()])?;
                            Ok(sort_order(result.to_number()))
                        })?
                    }
                };
                *items.borrow_mut() = sorted;
                receiver.clone()
            }
            "map" | "filter" | "forEach" | "some" | "every" | "find" | "findIndex" => {
                self.iterate(receiver, items, name, &args, len)?
            }
            "reduce" | "reduceRight" => self.reduce(receiver, items, name, &args, len)?,
            _ => return Err(Throw::type_error(format!("{} is not a function", name))),
        })
    }

    fn iterate(
        &mut self,
        receiver: &Value,
        items: &Array,
        name: &str,
        args: &[Value],
        len: usize,
    ) -> Exec<Value> {
        let function = callback(args, 0, name)?;
        let mut mapped = Vec::new();

        for index in 0..len {
            let Some(item) = items.borrow().get(index).cloned() else {
                break;
            };
            let result = self.call(
                &function,
                vec![item.clone(), Value::Number(index as f64), receiver.clone()],
            )?;
            match name {
                "map" => mapped.push(result),
                "filter" if result.truthy() => mapped.push(item),
                "some" if result.truthy() => return Ok(Value::Bool(true)),
                "every" if !result.truthy() => return Ok(Value::Bool(false)),
                "find" if result.truthy() => return Ok(item),
                "findIndex" if result.truthy() => return Ok(Value::Number(index as f64)),
                _ => {}
            }
        }

        Ok(match name {
            "map" | "filter" => Value::array(mapped),
            "some" => Value::Bool(false),
            "every" => Value::Bool(true),
            "findIndex" => Value::Number(-1.0),
            _ => Value::Undefined,
        })
    }

    fn reduce(
        &mut self,
        receiver: &Value,
        items: &Array,
        name: &str,
        args: &[Value],
        len: usize,
    ) -> Exec<Value> {
        let function = callback(args, 0, name)?;
        let indices: Vec<usize> = if name == "reduce" {
            (0..len).collect()
        } else {
            (0..len).rev().collect()
        };
        let mut indices = indices.into_iter();

        let mut accumulator = match args.get(1) {
            Some(initial) => initial.clone(),
            None => match indices.next() {
                Some(first) => items.borrow().get(first).cloned().unwrap_or_default(),
                None => {
                    return Err(Throw::type_error(
                        "Reduce of empty array with no initial value",
                    ))
                }
            },
        };
        for index in indices {
            let Some(item) = items.borrow().get(index).cloned() else {
                continue;
            };
            accumulator = self.call(
                &function,
                vec![accumulator, item, Value::Number(index as f64), receiver.clone()],
            )?;
        }
        Ok(accumulator)
    }
}

fn set_array_property(items: &Array, key: &str, value: Value) -> Exec<()> {
    let mut items = items.borrow_mut();
    if key == "length" {
        let n = value.to_number();
        if n < 0.0 || n.fract() != 0.0 || n > (items.len() + MAX_ARRAY_GROWTH) as f64 {
            return Err(Throw::range_error("Invalid array length"));
        }
        items.resize(n as usize, Value::Undefined);
        return Ok(());
    }
    if let Some(index) = array_index(key) {
        if index >= items.len() + MAX_ARRAY_GROWTH {
            return Err(Throw::range_error("Invalid array length"));
        }
        if index >= items.len() {
            items.resize(index + 1, Value::Undefined);
        }
        items[index] = value;
    }
    Ok(())
}

fn object_method(map: &Object, name: &str, args: &[Value]) -> Value {
    match name {
        "hasOwnProperty" => {
            let key = arg(args, 0).to_property_key();
            Value::Bool(map.borrow().contains_key(&key))
        }
        _ => Value::from("[object Object]"),
    }
}

fn number_method(n: f64, name: &str, args: &[Value]) -> Exec<Value> {
    match name {
        "toFixed" => {
            let digits = integer(&arg(args, 0));
            if !(0.0..=100.0).contains(&digits) {
                return Err(Throw::range_error(
                    "toFixed() digits argument must be between 0 and 100",
                ));
            }
            Ok(Value::from(to_fixed(n, digits as usize)))
        }
        _ => {
            let radix = match arg(args, 0) {
                Value::Undefined => 10.0,
                other => integer(&other),
            };
            if !(2.0..=36.0).contains(&radix) {
                return Err(Throw::range_error(
                    "toString() radix must be between 2 and 36",
                ));
            }
            if radix == 10.0 {
                Ok(Value::from(format_number(n)))
            } else {
                Ok(Value::from(radix_string(n, radix as u32)))
            }
        }
    }
}

fn regex_method(re: &RegexValue, name: &str, args: &[Value]) -> Value {
    let text = arg(args, 0).to_js_string();
    match name {
        "test" => Value::Bool(re.regex.is_match(&text)),
        "exec" => re
            .regex
            .captures(&text)
            .map_or(Value::Null, |caps| match_array(&caps)),
        _ => Value::from(format!("/{}/{}", re.source(), re.flags())),
    }
}
