// Function registry and the builtin function library.
//
// Every function carries a declared signature that is checked before its
// handler runs, so handlers can assume the argument shapes they declared.
// Handlers receive the evaluator so that higher-order functions can apply
// expression references.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::evaluator::{Evaluator, EvaluatorError};
use crate::signature::{ParamType, Parameter, Signature, SignatureError};
use crate::value::Value;

#[derive(Error, Debug)]
pub enum FunctionError {
    #[error("unknown function: {name}()")]
    UnknownFunction { name: String },

    #[error("{name}(): {message}")]
    InvalidValue { name: String, message: String },

    #[error("{name}(): {message}")]
    InvalidType { name: String, message: String },

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

pub type FunctionHandler =
    Arc<dyn Fn(&mut Evaluator, &[Value]) -> Result<Value, EvaluatorError> + Send + Sync>;

pub struct FunctionEntry {
    pub signature: Signature,
    pub handler: FunctionHandler,
}

/// Immutable snapshot of registered functions. Custom registration builds
/// a new registry from an existing one, so evaluation never takes a lock.
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionEntry>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry {
            functions: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FunctionEntry> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Register (or replace) a function. The signature shape is validated
    /// up front so a malformed declaration fails at registration time, not
    /// at call time.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        signature: Signature,
        handler: FunctionHandler,
    ) -> Result<(), SignatureError> {
        let name = name.into();
        signature.validate(&name)?;
        self.functions.insert(name, FunctionEntry { signature, handler });
        Ok(())
    }

    /// Copy-on-write extension, used by the global registry.
    pub fn extended(
        &self,
        name: impl Into<String>,
        signature: Signature,
        handler: FunctionHandler,
    ) -> Result<Self, SignatureError> {
        let name = name.into();
        signature.validate(&name)?;
        let mut functions: HashMap<String, FunctionEntry> = self
            .functions
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    FunctionEntry {
                        signature: v.signature.clone(),
                        handler: Arc::clone(&v.handler),
                    },
                )
            })
            .collect();
        functions.insert(name, FunctionEntry { signature, handler });
        Ok(FunctionRegistry { functions })
    }

    fn add<F>(&mut self, name: &str, parameters: Vec<Parameter>, f: F)
    where
        F: Fn(&mut Evaluator, &[Value]) -> Result<Value, EvaluatorError> + Send + Sync + 'static,
    {
        self.functions.insert(
            name.to_string(),
            FunctionEntry {
                signature: Signature::new(parameters),
                handler: Arc::new(f),
            },
        );
    }

    pub fn with_builtins() -> Self {
        use builtins::*;
        use ParamType::*;

        let mut r = FunctionRegistry::new();

        // numbers
        r.add("abs", vec![Parameter::required(&[Number])], numbers::abs);
        r.add("avg", vec![Parameter::required(&[ArrayNumber])], numbers::avg);
        r.add("ceil", vec![Parameter::required(&[Number])], numbers::ceil);
        r.add("floor", vec![Parameter::required(&[Number])], numbers::floor);
        r.add("sum", vec![Parameter::required(&[ArrayNumber])], numbers::sum);
        r.add(
            "to_number",
            vec![Parameter::required(&[Any])],
            numbers::to_number,
        );
        r.add(
            "range",
            vec![
                Parameter::required(&[Number]),
                Parameter::optional(&[Number]),
                Parameter::optional(&[String]),
            ],
            numbers::range,
        );

        // strings
        r.add("lower", vec![Parameter::required(&[String])], strings::lower);
        r.add("upper", vec![Parameter::required(&[String])], strings::upper);
        r.add(
            "trim",
            vec![
                Parameter::required(&[String]),
                Parameter::optional(&[String]),
            ],
            strings::trim,
        );
        r.add(
            "trim_left",
            vec![
                Parameter::required(&[String]),
                Parameter::optional(&[String]),
            ],
            strings::trim_left,
        );
        r.add(
            "trim_right",
            vec![
                Parameter::required(&[String]),
                Parameter::optional(&[String]),
            ],
            strings::trim_right,
        );
        r.add(
            "starts_with",
            vec![
                Parameter::required(&[String]),
                Parameter::required(&[String]),
            ],
            strings::starts_with,
        );
        r.add(
            "ends_with",
            vec![
                Parameter::required(&[String]),
                Parameter::required(&[String]),
            ],
            strings::ends_with,
        );
        r.add(
            "find_first",
            vec![
                Parameter::required(&[String]),
                Parameter::required(&[String]),
                Parameter::optional(&[Number]),
                Parameter::optional(&[Number]),
            ],
            strings::find_first,
        );
        r.add(
            "find_last",
            vec![
                Parameter::required(&[String]),
                Parameter::required(&[String]),
                Parameter::optional(&[Number]),
                Parameter::optional(&[Number]),
            ],
            strings::find_last,
        );
        r.add(
            "pad_left",
            vec![
                Parameter::required(&[String]),
                Parameter::required(&[Number]),
                Parameter::optional(&[String]),
            ],
            strings::pad_left,
        );
        r.add(
            "pad_right",
            vec![
                Parameter::required(&[String]),
                Parameter::required(&[Number]),
                Parameter::optional(&[String]),
            ],
            strings::pad_right,
        );
        r.add(
            "replace",
            vec![
                Parameter::required(&[String]),
                Parameter::required(&[String]),
                Parameter::required(&[String]),
                Parameter::optional(&[Number]),
            ],
            strings::replace,
        );
        r.add(
            "split",
            vec![
                Parameter::required(&[String]),
                Parameter::required(&[String]),
                Parameter::optional(&[Number]),
            ],
            strings::split,
        );
        r.add(
            "join",
            vec![
                Parameter::required(&[String]),
                Parameter::required(&[ArrayString]),
            ],
            strings::join,
        );

        // collections
        r.add(
            "length",
            vec![Parameter::required(&[String, Array, Object])],
            collections::length,
        );
        r.add(
            "contains",
            vec![
                Parameter::required(&[Array, String]),
                Parameter::required(&[Any]),
            ],
            collections::contains,
        );
        r.add(
            "reverse",
            vec![Parameter::required(&[String, Array])],
            collections::reverse,
        );
        r.add(
            "max",
            vec![Parameter::required(&[ArrayNumber, ArrayString])],
            collections::max,
        );
        r.add(
            "min",
            vec![Parameter::required(&[ArrayNumber, ArrayString])],
            collections::min,
        );
        r.add(
            "sort",
            vec![Parameter::required(&[ArrayNumber, ArrayString])],
            collections::sort,
        );
        r.add(
            "sort_by",
            vec![
                Parameter::required(&[Array]),
                Parameter::required(&[Expression]),
            ],
            collections::sort_by,
        );
        r.add(
            "max_by",
            vec![
                Parameter::required(&[Array]),
                Parameter::required(&[Expression]),
            ],
            collections::max_by,
        );
        r.add(
            "min_by",
            vec![
                Parameter::required(&[Array]),
                Parameter::required(&[Expression]),
            ],
            collections::min_by,
        );
        r.add(
            "map",
            vec![
                Parameter::required(&[Expression]),
                Parameter::required(&[Array]),
            ],
            collections::map,
        );
        r.add(
            "group_by",
            vec![
                Parameter::required(&[Array]),
                Parameter::required(&[Expression]),
            ],
            collections::group_by,
        );
        // A lone variadic slot so the zero-argument call reaches the
        // handler's degenerate `[]` path.
        r.add("zip", vec![Parameter::variadic(&[Array])], collections::zip);
        r.add(
            "to_array",
            vec![Parameter::required(&[Any])],
            collections::to_array,
        );

        // objects
        r.add("keys", vec![Parameter::required(&[Object])], objects::keys);
        r.add(
            "values",
            vec![Parameter::required(&[Object])],
            objects::values,
        );
        r.add("items", vec![Parameter::required(&[Object])], objects::items);
        r.add(
            "from_items",
            vec![Parameter::required(&[Array])],
            objects::from_items,
        );
        r.add(
            "to_object",
            vec![Parameter::required(&[Array])],
            objects::to_object,
        );
        r.add(
            "merge",
            vec![
                Parameter::required(&[Object]),
                Parameter::variadic(&[Object]),
            ],
            objects::merge,
        );
        r.add(
            "get",
            vec![
                Parameter::required(&[Object]),
                Parameter::required(&[String]),
                Parameter::optional(&[Any]),
            ],
            objects::get,
        );

        // encoding
        r.add(
            "json_serialize",
            vec![Parameter::required(&[Any])],
            encoding::json_serialize,
        );
        r.add(
            "json_parse",
            vec![Parameter::required(&[String])],
            encoding::json_parse,
        );
        r.add(
            "to_string",
            vec![Parameter::required(&[Any])],
            encoding::to_string,
        );
        r.add(
            "sha256",
            vec![Parameter::required(&[String])],
            encoding::sha256_hex,
        );
        r.add(
            "sha512",
            vec![Parameter::required(&[String])],
            encoding::sha512_hex,
        );
        r.add(
            "uuid",
            vec![
                Parameter::required(&[String]),
                Parameter::optional(&[String]),
            ],
            encoding::uuid_v5,
        );

        // regular expressions
        r.add(
            "regex_test",
            vec![
                Parameter::required(&[String]),
                Parameter::required(&[String]),
            ],
            patterns::regex_test,
        );
        r.add(
            "regex_match",
            vec![
                Parameter::required(&[String]),
                Parameter::required(&[String]),
            ],
            patterns::regex_match,
        );
        r.add(
            "regex_match_all",
            vec![
                Parameter::required(&[String]),
                Parameter::required(&[String]),
            ],
            patterns::regex_match_all,
        );
        r.add(
            "regex_replace",
            vec![
                Parameter::required(&[String]),
                Parameter::required(&[String]),
                Parameter::required(&[String]),
            ],
            patterns::regex_replace,
        );

        // control
        r.add(
            "if",
            vec![
                Parameter::required(&[Any]),
                Parameter::required(&[Any]),
                Parameter::optional(&[Any]),
            ],
            control::if_fn,
        );
        r.add(
            "not_null",
            vec![
                Parameter::required(&[Any]),
                Parameter::variadic(&[Any]),
            ],
            control::not_null,
        );
        r.add("type", vec![Parameter::required(&[Any])], control::type_of);

        r
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn invalid_value(name: &str, message: impl Into<String>) -> EvaluatorError {
    FunctionError::InvalidValue {
        name: name.to_string(),
        message: message.into(),
    }
    .into()
}

fn invalid_type(name: &str, message: impl Into<String>) -> EvaluatorError {
    FunctionError::InvalidType {
        name: name.to_string(),
        message: message.into(),
    }
    .into()
}

/// Integral coercion used where a builtin takes an index or count; a
/// fractional value is an invalid value, not a type error.
fn expect_integer(name: &str, value: &Value) -> Result<i64, EvaluatorError> {
    match value.as_i64() {
        Some(n) => Ok(n),
        None => Err(invalid_value(name, "expected an integer value")),
    }
}

mod builtins {
    use super::*;

    pub mod numbers {
        use super::*;

        pub fn abs(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            Ok(Value::Number(args[0].as_f64().unwrap_or(0.0).abs()))
        }

        pub fn ceil(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            Ok(Value::Number(args[0].as_f64().unwrap_or(0.0).ceil()))
        }

        pub fn floor(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            Ok(Value::Number(args[0].as_f64().unwrap_or(0.0).floor()))
        }

        pub fn sum(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let items = args[0].as_array().map(|a| a.as_slice()).unwrap_or(&[]);
            let total: f64 = items.iter().filter_map(Value::as_f64).sum();
            Ok(Value::Number(total))
        }

        pub fn avg(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let items = args[0].as_array().map(|a| a.as_slice()).unwrap_or(&[]);
            if items.is_empty() {
                return Ok(Value::Null);
            }
            let total: f64 = items.iter().filter_map(Value::as_f64).sum();
            Ok(Value::Number(total / items.len() as f64))
        }

        pub fn to_number(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            Ok(match &args[0] {
                Value::Number(n) => Value::Number(*n),
                Value::String(s) => match s.trim().parse::<f64>() {
                    Ok(n) if n.is_finite() => Value::Number(n),
                    _ => Value::Null,
                },
                _ => Value::Null,
            })
        }

        /// `range(stop)`, `range(start, stop)` or `range(start, stop, prefix)`.
        /// The prefixed form yields strings like `prefix1`.
        pub fn range(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let first = expect_integer("range", &args[0])?;
            let (start, stop) = match args.get(1) {
                Some(v) => (first, expect_integer("range", v)?),
                None => (0, first),
            };
            let prefix = args.get(2).and_then(Value::as_str);

            let mut result = Vec::new();
            let mut i = start;
            while i < stop {
                match prefix {
                    Some(p) => result.push(Value::from(format!("{}{}", p, i))),
                    None => result.push(Value::Number(i as f64)),
                }
                i += 1;
            }
            Ok(Value::from(result))
        }
    }

    pub mod strings {
        use super::*;

        fn subject(args: &[Value]) -> &str {
            args[0].as_str().unwrap_or("")
        }

        pub fn lower(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            Ok(Value::from(subject(args).to_lowercase()))
        }

        pub fn upper(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            Ok(Value::from(subject(args).to_uppercase()))
        }

        fn trim_set(args: &[Value]) -> Option<Vec<char>> {
            args.get(1)
                .and_then(Value::as_str)
                .map(|s| s.chars().collect())
        }

        pub fn trim(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let s = subject(args);
            Ok(Value::from(match trim_set(args) {
                Some(set) => s.trim_matches(|c| set.contains(&c)),
                None => s.trim(),
            }))
        }

        pub fn trim_left(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let s = subject(args);
            Ok(Value::from(match trim_set(args) {
                Some(set) => s.trim_start_matches(|c| set.contains(&c)),
                None => s.trim_start(),
            }))
        }

        pub fn trim_right(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let s = subject(args);
            Ok(Value::from(match trim_set(args) {
                Some(set) => s.trim_end_matches(|c| set.contains(&c)),
                None => s.trim_end(),
            }))
        }

        pub fn starts_with(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let prefix = args[1].as_str().unwrap_or("");
            Ok(Value::Bool(subject(args).starts_with(prefix)))
        }

        pub fn ends_with(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let suffix = args[1].as_str().unwrap_or("");
            Ok(Value::Bool(subject(args).ends_with(suffix)))
        }

        /// Search window for find_first/find_last, in code-point indices.
        fn search_window(
            name: &str,
            args: &[Value],
            len: usize,
        ) -> Result<(usize, usize), EvaluatorError> {
            let clamp = |v: i64| -> usize {
                let adjusted = if v < 0 { v + len as i64 } else { v };
                adjusted.clamp(0, len as i64) as usize
            };
            let start = match args.get(2) {
                Some(v) => clamp(expect_integer(name, v)?),
                None => 0,
            };
            let end = match args.get(3) {
                Some(v) => clamp(expect_integer(name, v)?),
                None => len,
            };
            Ok((start, end))
        }

        fn find_in(chars: &[char], search: &[char], range: std::ops::Range<usize>, last: bool) -> Option<usize> {
            if search.is_empty() || search.len() > chars.len() {
                return None;
            }
            let positions: Vec<usize> = range
                .filter(|&i| i + search.len() <= chars.len() && chars[i..i + search.len()] == *search)
                .collect();
            if last {
                positions.last().copied()
            } else {
                positions.first().copied()
            }
        }

        pub fn find_first(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let chars: Vec<char> = subject(args).chars().collect();
            let search: Vec<char> = args[1].as_str().unwrap_or("").chars().collect();
            let (start, end) = search_window("find_first", args, chars.len())?;
            let window = start..end.saturating_sub(search.len().saturating_sub(1)).max(start);
            Ok(match find_in(&chars, &search, window, false) {
                Some(i) => Value::Number(i as f64),
                None => Value::Null,
            })
        }

        pub fn find_last(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let chars: Vec<char> = subject(args).chars().collect();
            let search: Vec<char> = args[1].as_str().unwrap_or("").chars().collect();
            let (start, end) = search_window("find_last", args, chars.len())?;
            let window = start..end.saturating_sub(search.len().saturating_sub(1)).max(start);
            Ok(match find_in(&chars, &search, window, true) {
                Some(i) => Value::Number(i as f64),
                None => Value::Null,
            })
        }

        /// The pad character, when given, must be exactly one code point.
        /// Without it the subject is returned unchanged.
        fn pad_char(name: &str, args: &[Value]) -> Result<Option<char>, EvaluatorError> {
            match args.get(2).and_then(Value::as_str) {
                None => Ok(None),
                Some(p) => {
                    let mut chars = p.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Ok(Some(c)),
                        _ => Err(invalid_value(
                            name,
                            "padding must be a single character",
                        )),
                    }
                }
            }
        }

        pub fn pad_left(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let s = subject(args);
            let width = expect_integer("pad_left", &args[1])?.max(0) as usize;
            Ok(match pad_char("pad_left", args)? {
                Some(c) => {
                    let len = s.chars().count();
                    let mut out = String::new();
                    for _ in len..width {
                        out.push(c);
                    }
                    out.push_str(s);
                    Value::from(out)
                }
                None => Value::from(s),
            })
        }

        pub fn pad_right(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let s = subject(args);
            let width = expect_integer("pad_right", &args[1])?.max(0) as usize;
            Ok(match pad_char("pad_right", args)? {
                Some(c) => {
                    let len = s.chars().count();
                    let mut out = String::from(s);
                    for _ in len..width {
                        out.push(c);
                    }
                    Value::from(out)
                }
                None => Value::from(s),
            })
        }

        pub fn replace(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let s = subject(args);
            let old = args[1].as_str().unwrap_or("");
            let new = args[2].as_str().unwrap_or("");
            if old.is_empty() {
                return Ok(Value::from(s));
            }
            Ok(Value::from(match args.get(3) {
                Some(v) => {
                    let count = expect_integer("replace", v)?.max(0) as usize;
                    s.replacen(old, new, count)
                }
                None => s.replace(old, new),
            }))
        }

        pub fn split(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let s = subject(args);
            let sep = args[1].as_str().unwrap_or("");

            if sep.is_empty() {
                // Split into individual code points.
                let pieces: Vec<Value> =
                    s.chars().map(|c| Value::from(c.to_string())).collect();
                return Ok(Value::from(pieces));
            }

            let pieces: Vec<Value> = match args.get(2) {
                Some(v) => {
                    // At most `count` splits; the remainder stays joined.
                    let count = expect_integer("split", v)?.max(0) as usize;
                    s.splitn(count + 1, sep).map(Value::from).collect()
                }
                None => s.split(sep).map(Value::from).collect(),
            };
            Ok(Value::from(pieces))
        }

        pub fn join(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let glue = subject(args);
            let items = args[1].as_array().map(|a| a.as_slice()).unwrap_or(&[]);
            let pieces: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            Ok(Value::from(pieces.join(glue)))
        }
    }

    pub mod collections {
        use super::*;

        pub fn length(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                _ => 0,
            };
            Ok(Value::Number(n as f64))
        }

        pub fn contains(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            Ok(Value::Bool(match (&args[0], &args[1]) {
                (Value::Array(items), needle) => items.iter().any(|v| v == needle),
                (Value::String(s), Value::String(needle)) => s.contains(needle.as_ref()),
                // Searching a string for a non-string is simply false.
                (Value::String(_), _) => false,
                _ => false,
            }))
        }

        pub fn reverse(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            Ok(match &args[0] {
                Value::String(s) => Value::from(s.chars().rev().collect::<String>()),
                Value::Array(items) => {
                    Value::from(items.iter().rev().cloned().collect::<Vec<_>>())
                }
                _ => Value::Null,
            })
        }

        fn extreme(args: &[Value], want_max: bool) -> Value {
            let items = args[0].as_array().map(|a| a.as_slice()).unwrap_or(&[]);
            let mut best: Option<&Value> = None;
            for item in items {
                best = Some(match best {
                    None => item,
                    Some(current) => {
                        let item_wins = match (current, item) {
                            (Value::Number(a), Value::Number(b)) => {
                                if want_max {
                                    b > a
                                } else {
                                    b < a
                                }
                            }
                            (Value::String(a), Value::String(b)) => {
                                if want_max {
                                    b > a
                                } else {
                                    b < a
                                }
                            }
                            _ => false,
                        };
                        if item_wins {
                            item
                        } else {
                            current
                        }
                    }
                });
            }
            best.cloned().unwrap_or(Value::Null)
        }

        pub fn max(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            Ok(extreme(args, true))
        }

        pub fn min(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            Ok(extreme(args, false))
        }

        pub fn sort(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let items = args[0].as_array().map(|a| a.as_slice()).unwrap_or(&[]);
            let mut sorted = items.to_vec();
            sorted.sort_by(|a, b| match (a, b) {
                (Value::Number(x), Value::Number(y)) => {
                    x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal)
                }
                (Value::String(x), Value::String(y)) => x.cmp(y),
                _ => std::cmp::Ordering::Equal,
            });
            Ok(Value::from(sorted))
        }

        /// Comparable sort key produced by an expression reference.
        enum SortKey {
            Number(f64),
            Text(String),
        }

        fn sort_key(
            name: &str,
            ev: &mut Evaluator,
            expref: &crate::value::ExprRef,
            item: &Value,
        ) -> Result<SortKey, EvaluatorError> {
            match ev.apply_expref(expref, item)? {
                Value::Number(n) => Ok(SortKey::Number(n)),
                Value::String(s) => Ok(SortKey::Text(s.to_string())),
                other => Err(invalid_type(
                    name,
                    format!(
                        "expression produced type {}, expected number or string",
                        other.kind_name()
                    ),
                )),
            }
        }

        fn keyed_items(
            name: &str,
            ev: &mut Evaluator,
            args: &[Value],
        ) -> Result<Vec<(SortKey, Value)>, EvaluatorError> {
            let items = args[0].as_array().map(|a| a.as_slice()).unwrap_or(&[]);
            let expref = match args[1].as_expref() {
                Some(e) => e,
                None => return Err(invalid_type(name, "expected an expression reference")),
            };
            let mut keyed = Vec::with_capacity(items.len());
            let mut numeric: Option<bool> = None;
            for item in items {
                let key = sort_key(name, ev, expref, item)?;
                let is_number = matches!(key, SortKey::Number(_));
                match numeric {
                    None => numeric = Some(is_number),
                    Some(expected) if expected != is_number => {
                        return Err(invalid_type(
                            name,
                            "expression produced mixed key types",
                        ))
                    }
                    _ => {}
                }
                keyed.push((key, item.clone()));
            }
            Ok(keyed)
        }

        fn compare_keys(a: &SortKey, b: &SortKey) -> std::cmp::Ordering {
            match (a, b) {
                (SortKey::Number(x), SortKey::Number(y)) => {
                    x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal)
                }
                (SortKey::Text(x), SortKey::Text(y)) => x.cmp(y),
                (SortKey::Number(_), SortKey::Text(_)) => std::cmp::Ordering::Less,
                (SortKey::Text(_), SortKey::Number(_)) => std::cmp::Ordering::Greater,
            }
        }

        pub fn sort_by(ev: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let mut keyed = keyed_items("sort_by", ev, args)?;
            keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b));
            Ok(Value::from(
                keyed.into_iter().map(|(_, v)| v).collect::<Vec<_>>(),
            ))
        }

        pub fn max_by(ev: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let keyed = keyed_items("max_by", ev, args)?;
            Ok(keyed
                .into_iter()
                .max_by(|(a, _), (b, _)| compare_keys(a, b))
                .map(|(_, v)| v)
                .unwrap_or(Value::Null))
        }

        pub fn min_by(ev: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let keyed = keyed_items("min_by", ev, args)?;
            Ok(keyed
                .into_iter()
                .min_by(|(a, _), (b, _)| compare_keys(a, b))
                .map(|(_, v)| v)
                .unwrap_or(Value::Null))
        }

        /// Unlike projections, map keeps null results so the output lines
        /// up with the input element for element.
        pub fn map(ev: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let expref = match args[0].as_expref() {
                Some(e) => e.clone(),
                None => return Err(invalid_type("map", "expected an expression reference")),
            };
            let items = args[1].as_array().map(|a| a.to_vec()).unwrap_or_default();
            let mut mapped = Vec::with_capacity(items.len());
            for item in &items {
                mapped.push(ev.apply_expref(&expref, item)?);
            }
            Ok(Value::from(mapped))
        }

        /// Buckets keyed by the string the expression produces for each
        /// element, in first-seen order.
        pub fn group_by(ev: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let items = args[0].as_array().map(|a| a.to_vec()).unwrap_or_default();
            let expref = match args[1].as_expref() {
                Some(e) => e.clone(),
                None => return Err(invalid_type("group_by", "expected an expression reference")),
            };
            let mut groups: indexmap::IndexMap<String, Vec<Value>> = indexmap::IndexMap::new();
            for item in &items {
                let key = match ev.apply_expref(&expref, item)? {
                    Value::String(s) => s.to_string(),
                    other => {
                        return Err(invalid_type(
                            "group_by",
                            format!(
                                "expression produced type {}, expected string",
                                other.kind_name()
                            ),
                        ))
                    }
                };
                groups.entry(key).or_insert_with(Vec::new).push(item.clone());
            }
            Ok(Value::object(
                groups
                    .into_iter()
                    .map(|(k, bucket)| (k, Value::from(bucket)))
                    .collect(),
            ))
        }

        /// Tuples of positionally matched elements, truncated to the
        /// shortest input. Fewer than two arrays yields an empty result.
        pub fn zip(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            if args.len() < 2 {
                return Ok(Value::from(Vec::<Value>::new()));
            }
            let arrays: Vec<&[Value]> = args
                .iter()
                .map(|a| a.as_array().map(|v| v.as_slice()).unwrap_or(&[]))
                .collect();
            let shortest = arrays.iter().map(|a| a.len()).min().unwrap_or(0);
            let mut result = Vec::with_capacity(shortest);
            for i in 0..shortest {
                let tuple: Vec<Value> = arrays.iter().map(|a| a[i].clone()).collect();
                result.push(Value::from(tuple));
            }
            Ok(Value::from(result))
        }

        pub fn to_array(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            Ok(match &args[0] {
                Value::Array(_) => args[0].clone(),
                other => Value::from(vec![other.clone()]),
            })
        }
    }

    pub mod objects {
        use super::*;
        use indexmap::IndexMap;

        pub fn keys(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let map = args[0].as_object().cloned().unwrap_or_default();
            Ok(Value::from(
                map.keys().map(|k| Value::from(k.as_str())).collect::<Vec<_>>(),
            ))
        }

        pub fn values(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let map = args[0].as_object().cloned().unwrap_or_default();
            Ok(Value::from(map.values().cloned().collect::<Vec<_>>()))
        }

        pub fn items(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let map = args[0].as_object().cloned().unwrap_or_default();
            Ok(Value::from(
                map.iter()
                    .map(|(k, v)| Value::from(vec![Value::from(k.as_str()), v.clone()]))
                    .collect::<Vec<_>>(),
            ))
        }

        fn pairs_to_object(name: &str, pairs: &[Value]) -> Result<Value, EvaluatorError> {
            let mut map = IndexMap::with_capacity(pairs.len());
            for pair in pairs {
                let items = match pair.as_array() {
                    Some(items) if items.len() == 2 => items,
                    _ => {
                        return Err(invalid_value(
                            name,
                            "each item must be an array of two elements",
                        ))
                    }
                };
                let key = match items[0].as_str() {
                    Some(k) => k.to_string(),
                    None => {
                        return Err(invalid_value(name, "each item key must be a string"))
                    }
                };
                map.insert(key, items[1].clone());
            }
            Ok(Value::object(map))
        }

        pub fn from_items(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let pairs = args[0].as_array().map(|a| a.to_vec()).unwrap_or_default();
            pairs_to_object("from_items", &pairs)
        }

        pub fn to_object(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let pairs = args[0].as_array().map(|a| a.to_vec()).unwrap_or_default();
            pairs_to_object("to_object", &pairs)
        }

        pub fn merge(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let mut merged = IndexMap::new();
            for arg in args {
                if let Some(map) = arg.as_object() {
                    for (k, v) in map.iter() {
                        merged.insert(k.clone(), v.clone());
                    }
                }
            }
            Ok(Value::object(merged))
        }

        /// Member lookup with a fallback: a missing or null member yields
        /// the default (or null).
        pub fn get(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let key = args[1].as_str().unwrap_or("");
            let found = args[0]
                .as_object()
                .and_then(|map| map.get(key))
                .cloned()
                .unwrap_or(Value::Null);
            if found.is_null() {
                Ok(args.get(2).cloned().unwrap_or(Value::Null))
            } else {
                Ok(found)
            }
        }
    }

    pub mod encoding {
        use super::*;
        use sha2::{Digest, Sha256, Sha512};

        pub fn json_serialize(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            Ok(Value::from(crate::serializer::serialize(&args[0])?))
        }

        pub fn json_parse(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let text = args[0].as_str().unwrap_or("");
            serde_json::from_str::<Value>(text)
                .map_err(|e| invalid_value("json_parse", format!("invalid JSON: {}", e)))
        }

        /// Strings pass through unchanged; everything else gets the
        /// deterministic JSON rendering.
        pub fn to_string(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            Ok(match &args[0] {
                Value::String(_) => args[0].clone(),
                other => Value::from(crate::serializer::serialize(other)?),
            })
        }

        fn hex(bytes: &[u8]) -> String {
            let mut out = String::with_capacity(bytes.len() * 2);
            for b in bytes {
                out.push_str(&format!("{:02x}", b));
            }
            out
        }

        pub fn sha256_hex(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let digest = Sha256::digest(args[0].as_str().unwrap_or("").as_bytes());
            Ok(Value::from(hex(&digest)))
        }

        pub fn sha512_hex(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let digest = Sha512::digest(args[0].as_str().unwrap_or("").as_bytes());
            Ok(Value::from(hex(&digest)))
        }

        /// Name-based (version 5) UUID. The namespace defaults to the nil
        /// UUID when not given.
        pub fn uuid_v5(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let name = args[0].as_str().unwrap_or("");
            let namespace = match args.get(1).and_then(Value::as_str) {
                Some(ns) => uuid::Uuid::parse_str(ns)
                    .map_err(|_| invalid_value("uuid", format!("invalid namespace: {}", ns)))?,
                None => uuid::Uuid::nil(),
            };
            Ok(Value::from(
                uuid::Uuid::new_v5(&namespace, name.as_bytes()).to_string(),
            ))
        }
    }

    pub mod patterns {
        use super::*;
        use regex::Regex;

        /// Patterns use the `/body/flags` convention. The `g` flag switches
        /// match-all behavior; `i`, `m` and `s` map onto inline flags; `u`
        /// is accepted and ignored since patterns are Unicode-aware anyway.
        fn compile(name: &str, pattern: &str) -> Result<(Regex, bool), EvaluatorError> {
            let rest = pattern.strip_prefix('/').ok_or_else(|| {
                invalid_value(name, format!("pattern must look like /body/flags: {}", pattern))
            })?;
            let slash = rest.rfind('/').ok_or_else(|| {
                invalid_value(name, format!("pattern must look like /body/flags: {}", pattern))
            })?;
            let body = &rest[..slash];
            let flags = &rest[slash + 1..];

            let mut global = false;
            let mut inline = String::new();
            for flag in flags.chars() {
                match flag {
                    'g' => global = true,
                    'i' | 'm' | 's' => inline.push(flag),
                    'u' => {}
                    other => {
                        return Err(invalid_value(
                            name,
                            format!("unsupported regex flag: {}", other),
                        ))
                    }
                }
            }

            let full = if inline.is_empty() {
                body.to_string()
            } else {
                format!("(?{}){}", inline, body)
            };
            let regex = Regex::new(&full)
                .map_err(|e| invalid_value(name, format!("invalid pattern: {}", e)))?;
            Ok((regex, global))
        }

        pub fn regex_test(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let (regex, _) = compile("regex_test", args[0].as_str().unwrap_or(""))?;
            Ok(Value::Bool(regex.is_match(args[1].as_str().unwrap_or(""))))
        }

        fn captures_to_array(captures: &regex::Captures<'_>) -> Value {
            let groups: Vec<Value> = (0..captures.len())
                .map(|i| match captures.get(i) {
                    Some(m) => Value::from(m.as_str()),
                    None => Value::Null,
                })
                .collect();
            Value::from(groups)
        }

        /// Without `g`: the first match with its capture groups. With `g`:
        /// every full match. No match at all yields null.
        pub fn regex_match(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let (regex, global) = compile("regex_match", args[0].as_str().unwrap_or(""))?;
            let subject = args[1].as_str().unwrap_or("");
            if global {
                let matches: Vec<Value> = regex
                    .find_iter(subject)
                    .map(|m| Value::from(m.as_str()))
                    .collect();
                if matches.is_empty() {
                    Ok(Value::Null)
                } else {
                    Ok(Value::from(matches))
                }
            } else {
                Ok(match regex.captures(subject) {
                    Some(captures) => captures_to_array(&captures),
                    None => Value::Null,
                })
            }
        }

        /// Every match with its capture groups. The pattern must carry
        /// the `g` flag.
        pub fn regex_match_all(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let (regex, global) = compile("regex_match_all", args[0].as_str().unwrap_or(""))?;
            if !global {
                return Err(invalid_value(
                    "regex_match_all",
                    "pattern must use the g flag".to_string(),
                ));
            }
            let subject = args[1].as_str().unwrap_or("");
            let matches: Vec<Value> = regex
                .captures_iter(subject)
                .map(|captures| captures_to_array(&captures))
                .collect();
            Ok(Value::from(matches))
        }

        pub fn regex_replace(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            let (regex, global) = compile("regex_replace", args[0].as_str().unwrap_or(""))?;
            let replacement = args[1].as_str().unwrap_or("");
            let subject = args[2].as_str().unwrap_or("");
            let replaced = if global {
                regex.replace_all(subject, replacement)
            } else {
                regex.replace(subject, replacement)
            };
            Ok(Value::from(replaced.into_owned()))
        }
    }

    pub mod control {
        use super::*;

        /// `if(condition, then)` or `if(condition, then, else)`. The
        /// condition follows the language's truthiness rules.
        pub fn if_fn(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            if args[0].is_truthy() {
                Ok(args[1].clone())
            } else {
                Ok(args.get(2).cloned().unwrap_or(Value::Null))
            }
        }

        pub fn not_null(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            Ok(args
                .iter()
                .find(|v| !v.is_null())
                .cloned()
                .unwrap_or(Value::Null))
        }

        pub fn type_of(_: &mut Evaluator, args: &[Value]) -> Result<Value, EvaluatorError> {
            Ok(Value::from(args[0].kind_name()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use serde_json::json;

    fn eval(expression: &str, data: serde_json::Value) -> Value {
        let ast = parse(expression).unwrap();
        let registry = Arc::new(FunctionRegistry::with_builtins());
        let mut evaluator = Evaluator::new(registry);
        evaluator.evaluate(&ast, &Value::from(data)).unwrap()
    }

    fn eval_err(expression: &str, data: serde_json::Value) -> String {
        let ast = parse(expression).unwrap();
        let registry = Arc::new(FunctionRegistry::with_builtins());
        let mut evaluator = Evaluator::new(registry);
        evaluator
            .evaluate(&ast, &Value::from(data))
            .unwrap_err()
            .to_string()
    }

    #[test]
    fn test_numeric_functions() {
        assert_eq!(eval("abs(`-3`)", json!(null)), Value::from(3));
        assert_eq!(eval("ceil(`1.2`)", json!(null)), Value::from(2));
        assert_eq!(eval("floor(`1.8`)", json!(null)), Value::from(1));
        assert_eq!(eval("sum(@)", json!([1, 2, 3])), Value::from(6));
        assert_eq!(eval("sum(@)", json!([])), Value::from(0));
        assert_eq!(eval("avg(@)", json!([1, 2, 3])), Value::from(2));
        assert_eq!(eval("avg(@)", json!([])), Value::Null);
    }

    #[test]
    fn test_to_number() {
        assert_eq!(eval("to_number('3.5')", json!(null)), Value::Number(3.5));
        assert_eq!(eval("to_number('abc')", json!(null)), Value::Null);
        assert_eq!(eval("to_number(`true`)", json!(null)), Value::Null);
        assert_eq!(eval("to_number(`4`)", json!(null)), Value::from(4));
    }

    #[test]
    fn test_range() {
        assert_eq!(
            eval("range(`5`)", json!(null)),
            Value::from(json!([0, 1, 2, 3, 4]))
        );
        assert_eq!(
            eval("range(`1`, `5`)", json!(null)),
            Value::from(json!([1, 2, 3, 4]))
        );
        assert_eq!(
            eval("range(`1`, `5`, 'item_')", json!(null)),
            Value::from(json!(["item_1", "item_2", "item_3", "item_4"]))
        );
        assert_eq!(eval("range(`0`)", json!(null)), Value::from(json!([])));
    }

    #[test]
    fn test_string_case_and_trim() {
        assert_eq!(eval("upper('abc')", json!(null)), Value::from("ABC"));
        assert_eq!(eval("lower('ABC')", json!(null)), Value::from("abc"));
        assert_eq!(eval("trim('  x  ')", json!(null)), Value::from("x"));
        assert_eq!(eval("trim('--x--', '-')", json!(null)), Value::from("x"));
        assert_eq!(eval("trim_left('  x ')", json!(null)), Value::from("x "));
        assert_eq!(eval("trim_right('  x ')", json!(null)), Value::from("  x"));
    }

    #[test]
    fn test_starts_ends_with() {
        assert_eq!(
            eval("starts_with('foobar', 'foo')", json!(null)),
            Value::Bool(true)
        );
        assert_eq!(
            eval("ends_with('foobar', 'baz')", json!(null)),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_find_first_and_last() {
        assert_eq!(eval("find_first('abcabc', 'b')", json!(null)), Value::from(1));
        assert_eq!(eval("find_last('abcabc', 'b')", json!(null)), Value::from(4));
        assert_eq!(
            eval("find_first('abcabc', 'b', `2`)", json!(null)),
            Value::from(4)
        );
        assert_eq!(eval("find_first('abc', 'z')", json!(null)), Value::Null);
        assert_eq!(eval("find_first('abc', '')", json!(null)), Value::Null);
    }

    #[test]
    fn test_find_rejects_fractional_position() {
        let msg = eval_err("find_last(@, 's', `1.3`)", json!("subject string"));
        assert!(msg.contains("integer"), "unexpected message: {msg}");
    }

    #[test]
    fn test_pad_without_char_is_identity() {
        assert_eq!(eval("pad_left(@, `10`)", json!("")), Value::from(""));
        assert_eq!(eval("pad_right(@, `10`)", json!("ab")), Value::from("ab"));
    }

    #[test]
    fn test_pad_with_char() {
        assert_eq!(
            eval("pad_left('7', `3`, '0')", json!(null)),
            Value::from("007")
        );
        assert_eq!(
            eval("pad_right('ab', `4`, '.')", json!(null)),
            Value::from("ab..")
        );
        // Already wide enough: unchanged.
        assert_eq!(
            eval("pad_left('abcd', `2`, '0')", json!(null)),
            Value::from("abcd")
        );
    }

    #[test]
    fn test_pad_rejects_multi_char_padding() {
        let msg = eval_err("pad_right(@, `1`, '--')", json!("subject string"));
        assert!(msg.contains("single character"), "unexpected message: {msg}");
    }

    #[test]
    fn test_replace() {
        assert_eq!(
            eval("replace('a-b-c', '-', '+')", json!(null)),
            Value::from("a+b+c")
        );
        assert_eq!(
            eval("replace('a-b-c', '-', '+', `1`)", json!(null)),
            Value::from("a+b-c")
        );
    }

    #[test]
    fn test_split_and_join() {
        assert_eq!(
            eval("split('a,b,c', ',')", json!(null)),
            Value::from(json!(["a", "b", "c"]))
        );
        assert_eq!(
            eval("split('a,b,c', ',', `1`)", json!(null)),
            Value::from(json!(["a", "b,c"]))
        );
        assert_eq!(
            eval("split('abc', '')", json!(null)),
            Value::from(json!(["a", "b", "c"]))
        );
        assert_eq!(
            eval("join('-', @)", json!(["a", "b"])),
            Value::from("a-b")
        );
    }

    #[test]
    fn test_length() {
        assert_eq!(eval("length('héllo')", json!(null)), Value::from(5));
        assert_eq!(eval("length(@)", json!([1, 2, 3])), Value::from(3));
        assert_eq!(eval("length(@)", json!({"a": 1})), Value::from(1));
    }

    #[test]
    fn test_length_type_error_message() {
        let msg = eval_err("length(`null`)", json!([]));
        assert_eq!(
            msg,
            "length() expected argument 1 to be type (string | array | object) but received type null instead."
        );
    }

    #[test]
    fn test_contains() {
        assert_eq!(eval("contains(@, `2`)", json!([1, 2])), Value::Bool(true));
        assert_eq!(
            eval("contains('foobar', 'oba')", json!(null)),
            Value::Bool(true)
        );
        // Non-string needle against a string is false, not an error.
        assert_eq!(
            eval("contains('foobar', `1`)", json!(null)),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_reverse() {
        assert_eq!(eval("reverse('abc')", json!(null)), Value::from("cba"));
        assert_eq!(
            eval("reverse(@)", json!([1, 2, 3])),
            Value::from(json!([3, 2, 1]))
        );
    }

    #[test]
    fn test_min_max_sort() {
        assert_eq!(eval("max(@)", json!([1, 3, 2])), Value::from(3));
        assert_eq!(eval("min(@)", json!(["b", "a"])), Value::from("a"));
        assert_eq!(eval("max(@)", json!([])), Value::Null);
        assert_eq!(
            eval("sort(@)", json!([3, 1, 2])),
            Value::from(json!([1, 2, 3]))
        );
        assert_eq!(
            eval("sort(@)", json!(["b", "c", "a"])),
            Value::from(json!(["a", "b", "c"]))
        );
    }

    #[test]
    fn test_sort_by() {
        assert_eq!(
            eval(
                "sort_by(@, &age)",
                json!([{"age": 30}, {"age": 10}, {"age": 20}])
            ),
            Value::from(json!([{"age": 10}, {"age": 20}, {"age": 30}]))
        );
    }

    #[test]
    fn test_sort_by_rejects_mixed_keys() {
        let msg = eval_err("sort_by(@, &k)", json!([{"k": 1}, {"k": "x"}]));
        assert!(msg.contains("mixed"), "unexpected message: {msg}");
    }

    #[test]
    fn test_max_by_min_by() {
        let data = json!([{"n": 2}, {"n": 9}, {"n": 4}]);
        assert_eq!(
            eval("max_by(@, &n)", data.clone()),
            Value::from(json!({"n": 9}))
        );
        assert_eq!(eval("min_by(@, &n)", data), Value::from(json!({"n": 2})));
        assert_eq!(eval("max_by(@, &n)", json!([])), Value::Null);
    }

    #[test]
    fn test_map_keeps_nulls() {
        assert_eq!(
            eval("map(&a, @)", json!([{"a": 1}, {"b": 2}, {"a": 3}])),
            Value::from(json!([1, null, 3]))
        );
    }

    #[test]
    fn test_group_by() {
        let input = json!({
            "items": [
                {"spec": {"nodeName": "node_01", "other": "values_01"}},
                {"spec": {"nodeName": "node_02", "other": "values_02"}},
                {"spec": {"nodeName": "node_03", "other": "values_03"}},
                {"spec": {"nodeName": "node_01", "other": "values_04"}}
            ]
        });
        let result = eval("group_by(items, &spec.nodeName)", input);
        let map = result.as_object().unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["node_01"].as_array().unwrap().len(), 2);
        assert_eq!(map["node_02"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_group_by_empty() {
        let result = eval("group_by(@, &ignored)", json!([]));
        assert_eq!(result.as_object().unwrap().len(), 0);
    }

    #[test]
    fn test_group_by_rejects_non_string_keys() {
        assert!(eval_err("group_by(@, &`false`)", json!([{}, {}])).contains("string"));
        assert!(eval_err("group_by(@, &a)", json!([{"a": 42}, {"a": 42}])).contains("string"));
    }

    #[test]
    fn test_group_by_requires_array() {
        let msg = eval_err("group_by(@, &`false`)", json!({}));
        assert!(msg.contains("expected argument 1 to be type (array)"));
    }

    #[test]
    fn test_zip() {
        assert_eq!(eval("zip()", json!({})), Value::from(json!([])));
        assert_eq!(eval("zip(@)", json!([1, 2])), Value::from(json!([])));
        let input = json!({
            "people": ["Monika", "Alice"],
            "country": ["Germany", "USA", "France"]
        });
        assert_eq!(
            eval("zip(people, country)", input),
            Value::from(json!([["Monika", "Germany"], ["Alice", "USA"]]))
        );
    }

    #[test]
    fn test_to_array() {
        assert_eq!(eval("to_array(`1`)", json!(null)), Value::from(json!([1])));
        assert_eq!(
            eval("to_array(@)", json!([1, 2])),
            Value::from(json!([1, 2]))
        );
    }

    #[test]
    fn test_object_functions() {
        assert_eq!(
            eval("keys(@)", json!({"foo": 1, "baz": 2})),
            Value::from(json!(["foo", "baz"]))
        );
        assert_eq!(
            eval("values(@)", json!({"foo": 1, "baz": 2})),
            Value::from(json!([1, 2]))
        );
        assert_eq!(
            eval("items(@)", json!({"foo": "bar", "baz": "qux"})),
            Value::from(json!([["foo", "bar"], ["baz", "qux"]]))
        );
    }

    #[test]
    fn test_from_items() {
        assert_eq!(
            eval("from_items(@)", json!([["foo", "bar"], ["baz", "qux"]])),
            Value::from(json!({"foo": "bar", "baz": "qux"}))
        );
        assert_eq!(
            eval("from_items(@)", json!([])),
            Value::from(json!({}))
        );
        assert!(eval_err("from_items(@)", json!([[]])).contains("two elements"));
        assert!(eval_err("from_items(@)", json!([[1, "one"]])).contains("string"));
    }

    #[test]
    fn test_to_object_from_zipped_keys() {
        assert_eq!(
            eval(
                "to_object(zip(range(`1`, `3`, 'key'), @))",
                json!(["value1", "value2"])
            ),
            Value::from(json!({"key1": "value1", "key2": "value2"}))
        );
    }

    #[test]
    fn test_merge() {
        assert_eq!(
            eval("merge(@, `{\"b\": 3}`)", json!({"a": 1, "b": 2})),
            Value::from(json!({"a": 1, "b": 3}))
        );
    }

    #[test]
    fn test_get() {
        assert_eq!(
            eval("get(@, 'foo')", json!({"foo": "bar"})),
            Value::from("bar")
        );
        assert_eq!(eval("get(@, 'missing')", json!({"foo": "bar"})), Value::Null);
        assert_eq!(
            eval("get(@, 'missing', 'default')", json!({"foo": "bar"})),
            Value::from("default")
        );
        // A null member falls back the same way a missing one does.
        assert_eq!(
            eval("get(@, 'foo', 'default')", json!({"foo": null})),
            Value::from("default")
        );
    }

    #[test]
    fn test_json_serialize_and_parse() {
        assert_eq!(
            eval("json_serialize(@)", json!({"foo": "bar"})),
            Value::from(r#"{"foo":"bar"}"#)
        );
        assert_eq!(
            eval("json_parse(@)", json!(r#"{"foo":"bar"}"#)),
            Value::from(json!({"foo": "bar"}))
        );
    }

    #[test]
    fn test_to_string() {
        assert_eq!(eval("to_string('x')", json!(null)), Value::from("x"));
        assert_eq!(eval("to_string(`2`)", json!(null)), Value::from("2"));
        assert_eq!(
            eval("to_string(@)", json!({"b": 1, "a": 2})),
            Value::from(r#"{"a":2,"b":1}"#)
        );
    }

    #[test]
    fn test_sha_digests() {
        assert_eq!(
            eval("sha256(@)", json!("hello world")),
            Value::from("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
        );
        assert_eq!(
            eval("sha512(@)", json!("hello world")),
            Value::from(
                "309ecc489c12d6eb4cc40f50c902f2b4d0ed77ee511a7c7a9bcd3ca86d4cd86f\
                 989dd35bc5ff499670da34255b45b0cfd830e81f605dcf7dc5542e93ae9cd76f"
            )
        );
    }

    #[test]
    fn test_uuid_v5() {
        assert_eq!(
            eval("uuid('example')", json!(null)),
            Value::from("feb54431-301b-52bb-a6dd-e1e93e81bb9e")
        );
        assert_eq!(
            eval(
                "uuid('example', '6ba7b810-9dad-11d1-80b4-00c04fd430c8')",
                json!(null)
            ),
            Value::from("7cb48787-6d91-5b9f-bc60-f30298ea5736")
        );
        assert!(eval_err("uuid('x', 'not-a-uuid')", json!(null)).contains("namespace"));
    }

    #[test]
    fn test_regex_test() {
        assert_eq!(
            eval("regex_test('/^hello/', @)", json!("hello world")),
            Value::Bool(true)
        );
        assert_eq!(
            eval("regex_test('/^hello/', @)", json!("HELLO world")),
            Value::Bool(false)
        );
        assert_eq!(
            eval("regex_test('/^hello/i', @)", json!("HELLO world")),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_regex_match() {
        assert_eq!(
            eval(r"regex_match('/^hello (\w+)/', @)", json!("hello world")),
            Value::from(json!(["hello world", "world"]))
        );
        assert_eq!(
            eval(r"regex_match('/\w+/g', @)", json!("hello world")),
            Value::from(json!(["hello", "world"]))
        );
        assert_eq!(
            eval(r"regex_match('/\d+/', @)", json!("no digits")),
            Value::Null
        );
    }

    #[test]
    fn test_regex_match_all() {
        assert_eq!(
            eval(r"regex_match_all('/(\w+)=(\d+)/g', @)", json!("foo=24 bar=99")),
            Value::from(json!([["foo=24", "foo", "24"], ["bar=99", "bar", "99"]]))
        );
    }

    #[test]
    fn test_regex_match_all_requires_global_flag() {
        assert!(eval_err("regex_match_all('/a/', @)", json!("aaa")).contains("g flag"));
    }

    #[test]
    fn test_regex_match_all_pipeline() {
        assert_eq!(
            eval(
                r"regex_match_all('/(\w+)=(\d+)/g', @) | map(&[[1],[2]], @) | to_object(@)",
                json!("foo=24 bar=99")
            ),
            Value::from(json!({"foo": "24", "bar": "99"}))
        );
    }

    #[test]
    fn test_regex_replace() {
        assert_eq!(
            eval(r"regex_replace('/w\w+d/', 'planet', @)", json!("hello world")),
            Value::from("hello planet")
        );
        assert_eq!(
            eval("regex_replace('/[aeoiu]/g', '*', @)", json!("hello world")),
            Value::from("h*ll* w*rld")
        );
    }

    #[test]
    fn test_regex_rejects_bad_pattern() {
        assert!(eval_err("regex_test('no-slashes', @)", json!("x")).contains("/body/flags"));
        assert!(eval_err("regex_test('/(/', @)", json!("x")).contains("invalid pattern"));
    }

    #[test]
    fn test_if() {
        assert_eq!(
            eval("if(cond, 'yes', 'no')", json!({"cond": true})),
            Value::from("yes")
        );
        assert_eq!(
            eval("if(cond, 'yes', 'no')", json!({"cond": false})),
            Value::from("no")
        );
        assert_eq!(
            eval("if(cond, 'ok')", json!({"cond": true})),
            Value::from("ok")
        );
        assert_eq!(eval("if(cond, 'ok')", json!({"cond": false})), Value::Null);
    }

    #[test]
    fn test_not_null() {
        assert_eq!(
            eval("not_null(a, b, c)", json!({"b": 2, "c": 3})),
            Value::from(2)
        );
        assert_eq!(eval("not_null(a)", json!({})), Value::Null);
    }

    #[test]
    fn test_type_of() {
        assert_eq!(eval("type(`null`)", json!(null)), Value::from("null"));
        assert_eq!(eval("type(`1`)", json!(null)), Value::from("number"));
        assert_eq!(eval("type('x')", json!(null)), Value::from("string"));
        assert_eq!(eval("type(`[]`)", json!(null)), Value::from("array"));
        assert_eq!(eval("type(`{}`)", json!(null)), Value::from("object"));
        assert_eq!(eval("type(&a)", json!(null)), Value::from("expression"));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = FunctionRegistry::with_builtins();
        registry
            .register(
                "plusplus",
                Signature::new(vec![Parameter::required(&[ParamType::Number])]),
                Arc::new(|_: &mut Evaluator, args: &[Value]| {
                    Ok(Value::Number(args[0].as_f64().unwrap_or(0.0) + 1.0))
                }),
            )
            .unwrap();
        let ast = parse("let $n = index in plusplus($n)").unwrap();
        let mut evaluator = Evaluator::new(Arc::new(registry));
        let result = evaluator
            .evaluate(&ast, &Value::from(json!({"index": 0})))
            .unwrap();
        assert_eq!(result, Value::from(1));
    }

    #[test]
    fn test_register_rejects_bad_signature() {
        let mut registry = FunctionRegistry::new();
        let err = registry.register(
            "broken",
            Signature::new(vec![
                Parameter::variadic(&[ParamType::Any]),
                Parameter::required(&[ParamType::Any]),
            ]),
            Arc::new(|_: &mut Evaluator, _: &[Value]| Ok(Value::Null)),
        );
        assert!(err.is_err());
    }
}
