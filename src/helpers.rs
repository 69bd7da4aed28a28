//! Named helper functions callable from templates.
//!
//! Helpers are pure functions over JSON values. They are supplied in [`HelperSet`]s,
//! each of which exposes its functions under a prefix (`trim` in a set with prefix `_`
//! is invoked as `_trim`). The merged [`Helpers`] registry is validated once, when it
//! is built, and is read-only afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Result, SupersequelError};
use crate::registry::OtherHasher;
use crate::value::{stringify, truthy};

lazy_static! {
    static ref HELPER_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_$-]*$").unwrap();
}

/// Names the template language claims for itself.
const RESERVED: [&str; 7] = ["each", "if", "unless", "with", "else", "this", "$history"];

pub type HelperResult = std::result::Result<Value, String>;

/// A helper receives its evaluated arguments and the current context (`this`).
/// When invoked as a block, the rendered block body is prepended to `args`.
pub type HelperFn = Arc<dyn Fn(&[Value], &Value) -> HelperResult + Send + Sync>;

/// A group of helper functions exposed under a common prefix.
#[derive(Clone, Default)]
pub struct HelperSet {
    prefix: String,
    functions: Vec<(String, HelperFn)>,
}

impl HelperSet {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), functions: Vec::new() }
    }

    /// Add a helper that may look at the current context.
    pub fn contextual<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value], &Value) -> HelperResult + Send + Sync + 'static,
    {
        self.functions.push((name.into(), Arc::new(f)));
        self
    }

    /// Add a helper that only looks at its arguments.
    pub fn function<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> HelperResult + Send + Sync + 'static,
    {
        self.contextual(name, move |args, _| f(args))
    }

    /// Re-expose every function of `other` in this set.
    pub fn extend(mut self, other: HelperSet) -> Self {
        self.functions.extend(other.functions);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|(name, _)| name.as_str())
    }
}

impl fmt::Debug for HelperSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HelperSet")
            .field("prefix", &self.prefix)
            .field("functions", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

/// All helpers visible to templates, keyed by their prefixed name.
#[derive(Clone, Default)]
pub struct Helpers {
    functions: HashMap<String, HelperFn, OtherHasher>,
}

impl Helpers {
    pub fn new(sets: Vec<HelperSet>) -> Result<Self> {
        let mut functions = HashMap::<String, HelperFn, OtherHasher>::default();
        for set in sets {
            for (name, f) in set.functions {
                let full = format!("{}{}", set.prefix, name);
                if !HELPER_NAME.is_match(&full) || RESERVED.contains(&full.as_str()) {
                    return Err(SupersequelError::Config(format!("invalid helper name: {full}")));
                }
                if functions.insert(full.clone(), f).is_some() {
                    return Err(SupersequelError::Config(format!("helper registered twice: {full}")));
                }
            }
        }
        Ok(Self { functions })
    }

    pub fn get(&self, name: &str) -> Option<&HelperFn> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for Helpers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("Helpers").field("functions", &names).finish()
    }
}

// ------------- standard set -------------

fn arg(args: &[Value], i: usize) -> &Value {
    args.get(i).unwrap_or(&Value::Null)
}

fn trim_with(args: &[Value], start: bool, end: bool) -> HelperResult {
    let text = stringify(arg(args, 0));
    let trimmed = match args.get(1) {
        Some(Value::String(chars)) => {
            let matches = |c: char| chars.contains(c);
            match (start, end) {
                (true, true) => text.trim_matches(matches),
                (true, false) => text.trim_start_matches(matches),
                _ => text.trim_end_matches(matches),
            }
        }
        _ => match (start, end) {
            (true, true) => text.trim(),
            (true, false) => text.trim_start(),
            _ => text.trim_end(),
        },
    };
    Ok(Value::String(trimmed.to_string()))
}

fn compare(args: &[Value]) -> std::result::Result<std::cmp::Ordering, String> {
    match (arg(args, 0), arg(args, 1)) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b).ok_or_else(|| "numbers are not comparable".to_string())
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (a, b) => Err(format!("cannot compare {a} with {b}")),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => true,
    }
}

fn size(value: &Value) -> usize {
    match value {
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        _ => 0,
    }
}

fn includes(collection: &Value, needle: &Value) -> bool {
    match (collection, needle) {
        (Value::String(s), Value::String(n)) => s.contains(n.as_str()),
        (Value::Array(items), _) => items.contains(needle),
        (Value::Object(map), _) => map.values().any(|v| v == needle),
        _ => false,
    }
}

fn join(values: &Value, separator: &str) -> HelperResult {
    match values {
        Value::Array(items) => Ok(Value::String(
            items.iter().map(stringify).collect::<Vec<_>>().join(separator),
        )),
        Value::Null => Ok(Value::String(String::new())),
        other => Ok(Value::String(stringify(other))),
    }
}

/// A lodash-flavoured set of string, comparison and type-check helpers.
pub fn standard(prefix: impl Into<String>) -> HelperSet {
    HelperSet::new(prefix)
        .function("trim", |args| trim_with(args, true, true))
        .function("trimStart", |args| trim_with(args, true, false))
        .function("trimEnd", |args| trim_with(args, false, true))
        .function("eq", |args| Ok(Value::Bool(arg(args, 0) == arg(args, 1))))
        .function("ne", |args| Ok(Value::Bool(arg(args, 0) != arg(args, 1))))
        .function("gt", |args| Ok(Value::Bool(compare(args)?.is_gt())))
        .function("gte", |args| Ok(Value::Bool(compare(args)?.is_ge())))
        .function("lt", |args| Ok(Value::Bool(compare(args)?.is_lt())))
        .function("lte", |args| Ok(Value::Bool(compare(args)?.is_le())))
        .function("not", |args| Ok(Value::Bool(!truthy(arg(args, 0)))))
        .function("isString", |args| Ok(Value::Bool(arg(args, 0).is_string())))
        .function("isNumber", |args| Ok(Value::Bool(arg(args, 0).is_number())))
        .function("isBoolean", |args| Ok(Value::Bool(arg(args, 0).is_boolean())))
        .function("isArray", |args| Ok(Value::Bool(arg(args, 0).is_array())))
        .function("isObject", |args| {
            Ok(Value::Bool(arg(args, 0).is_object() || arg(args, 0).is_array()))
        })
        .function("isNil", |args| Ok(Value::Bool(arg(args, 0).is_null())))
        .function("isEmpty", |args| Ok(Value::Bool(is_empty(arg(args, 0)))))
        .function("toUpper", |args| Ok(Value::String(stringify(arg(args, 0)).to_uppercase())))
        .function("toLower", |args| Ok(Value::String(stringify(arg(args, 0)).to_lowercase())))
        .function("join", |args| {
            let separator = match args.get(1) {
                Some(Value::String(s)) => s.as_str(),
                _ => ",",
            };
            join(arg(args, 0), separator)
        })
        .function("size", |args| Ok(Value::from(size(arg(args, 0)))))
        .function("includes", |args| Ok(Value::Bool(includes(arg(args, 0), arg(args, 1)))))
        .function("default", |args| match arg(args, 0) {
            Value::Null => Ok(arg(args, 1).clone()),
            other => Ok(other.clone()),
        })
        .function("keys", |args| match arg(args, 0) {
            Value::Object(map) => Ok(Value::Array(map.keys().cloned().map(Value::String).collect())),
            _ => Ok(Value::Array(Vec::new())),
        })
        .function("pick", |args| match arg(args, 0) {
            Value::Object(map) => {
                let picked: Map<String, Value> = args[1..]
                    .iter()
                    .filter_map(|k| k.as_str())
                    .filter_map(|k| map.get(k).map(|v| (k.to_string(), v.clone())))
                    .collect();
                Ok(Value::Object(picked))
            }
            _ => Ok(Value::Object(Map::new())),
        })
}
