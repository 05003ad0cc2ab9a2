// Function signatures: declared parameter types plus arity and
// type validation for function calls.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::Value;

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("invalid signature for {name}(): {reason}")]
    InvalidSignature { name: String, reason: String },

    #[error("{name}() takes {expected} but received {received}")]
    Arity {
        name: String,
        expected: String,
        received: usize,
    },

    #[error("{name}() expected argument {position} to be type ({expected}) but received type {actual} instead.")]
    TypeMismatch {
        name: String,
        /// 1-based argument position.
        position: usize,
        /// The declared alternatives joined with " | ".
        expected: String,
        actual: String,
    },
}

/// Declarable parameter types. The `ArrayNumber` and `ArrayString` kinds
/// validate every element of the array, not just the outer shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    Any,
    Null,
    Number,
    String,
    Boolean,
    Array,
    Object,
    Expression,
    ArrayNumber,
    ArrayString,
}

impl ParamType {
    pub fn name(&self) -> &'static str {
        match self {
            ParamType::Any => "any",
            ParamType::Null => "null",
            ParamType::Number => "number",
            ParamType::String => "string",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Expression => "expression",
            ParamType::ArrayNumber => "array-number",
            ParamType::ArrayString => "array-string",
        }
    }

    /// Whether a value satisfies this parameter type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::Any => true,
            ParamType::Null => value.is_null(),
            ParamType::Number => value.is_number(),
            ParamType::String => value.is_string(),
            ParamType::Boolean => value.is_bool(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Expression => value.is_expref(),
            ParamType::ArrayNumber => match value {
                Value::Array(items) => items.iter().all(|v| v.is_number()),
                _ => false,
            },
            ParamType::ArrayString => match value {
                Value::Array(items) => items.iter().all(|v| v.is_string()),
                _ => false,
            },
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single declared parameter: one or more acceptable types, optionally
/// optional or variadic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub types: Vec<ParamType>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub variadic: bool,
}

impl Parameter {
    pub fn required(types: &[ParamType]) -> Self {
        Parameter {
            types: types.to_vec(),
            optional: false,
            variadic: false,
        }
    }

    pub fn optional(types: &[ParamType]) -> Self {
        Parameter {
            types: types.to_vec(),
            optional: true,
            variadic: false,
        }
    }

    pub fn variadic(types: &[ParamType]) -> Self {
        Parameter {
            types: types.to_vec(),
            optional: false,
            variadic: true,
        }
    }

    fn alternatives(&self) -> String {
        self.types
            .iter()
            .map(|t| t.name())
            .collect::<Vec<_>>()
            .join(" | ")
    }

    fn matches(&self, value: &Value) -> bool {
        self.types.iter().any(|t| t.matches(value))
    }
}

/// A function signature: the ordered parameter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub parameters: Vec<Parameter>,
}

impl Signature {
    pub fn new(parameters: Vec<Parameter>) -> Self {
        Signature { parameters }
    }

    /// Validate the declared shape: every parameter needs at least one
    /// type, optional parameters must be trailing, and a variadic
    /// parameter must be last.
    pub fn validate(&self, name: &str) -> Result<(), SignatureError> {
        let mut seen_optional = false;
        for (i, param) in self.parameters.iter().enumerate() {
            if param.types.is_empty() {
                return Err(SignatureError::InvalidSignature {
                    name: name.to_string(),
                    reason: format!("parameter {} declares no types", i + 1),
                });
            }
            if param.variadic && i != self.parameters.len() - 1 {
                return Err(SignatureError::InvalidSignature {
                    name: name.to_string(),
                    reason: "variadic parameter must be last".to_string(),
                });
            }
            if param.optional {
                seen_optional = true;
            } else if seen_optional && !param.variadic {
                return Err(SignatureError::InvalidSignature {
                    name: name.to_string(),
                    reason: "required parameter follows an optional one".to_string(),
                });
            }
        }
        Ok(())
    }

    fn min_arity(&self) -> usize {
        self.parameters
            .iter()
            .filter(|p| !p.optional && !p.variadic)
            .count()
    }

    fn is_variadic(&self) -> bool {
        self.parameters.last().map_or(false, |p| p.variadic)
    }

    fn arity_description(&self) -> String {
        let min = self.min_arity();
        let max = self.parameters.len();
        let plural = |n: usize| if n == 1 { "argument" } else { "arguments" };
        if self.is_variadic() {
            // The variadic slot itself admits zero or more values.
            let n = min.max(max.saturating_sub(1));
            format!("at least {} {}", n, plural(n))
        } else if min == max {
            format!("{} {}", min, plural(min))
        } else {
            format!("{} to {} arguments", min, max)
        }
    }

    /// Check a concrete argument list against the signature. Arity is
    /// checked first, then each argument's type in order.
    pub fn check(&self, name: &str, args: &[Value]) -> Result<(), SignatureError> {
        let min = if self.is_variadic() {
            self.min_arity().max(self.parameters.len() - 1)
        } else {
            self.min_arity()
        };
        let arity_ok = if self.is_variadic() {
            args.len() >= min
        } else {
            args.len() >= min && args.len() <= self.parameters.len()
        };
        if !arity_ok {
            return Err(SignatureError::Arity {
                name: name.to_string(),
                expected: self.arity_description(),
                received: args.len(),
            });
        }

        for (i, arg) in args.iter().enumerate() {
            let param = match self.parameters.get(i) {
                Some(param) => param,
                // Past the declared list means the trailing variadic.
                None => match self.parameters.last() {
                    Some(param) => param,
                    None => break,
                },
            };
            if !param.matches(arg) {
                return Err(SignatureError::TypeMismatch {
                    name: name.to_string(),
                    position: i + 1,
                    expected: param.alternatives(),
                    actual: arg.kind_name().to_string(),
                });
            }
        }
        Ok(())
    }
}
