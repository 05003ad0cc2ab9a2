// Tree-walking evaluator. Evaluation never mutates the input document;
// every node produces a fresh value (cheaply, via shared Rc containers).

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use thiserror::Error;

use crate::ast::{AstNode, Comparator, Slice};
use crate::functions::{FunctionError, FunctionRegistry};
use crate::value::{ExprRef, Value};

#[derive(Error, Debug)]
pub enum EvaluatorError {
    #[error("undefined variable ${name}")]
    UndefinedVariable { name: String },

    #[error("maximum recursion depth exceeded")]
    RecursionLimit,

    #[error("slice step cannot be zero")]
    SliceStepZero,

    #[error(transparent)]
    Function(#[from] FunctionError),

    #[error(transparent)]
    Serialize(#[from] crate::serializer::SerializeError),
}

/// One frame of lexical bindings introduced by a `let` expression.
#[derive(Debug)]
pub struct ScopeFrame {
    bindings: HashMap<String, Value>,
    parent: Scope,
}

/// The scope chain: innermost frame first, `None` at top level. Cloning a
/// scope clones an `Rc`, so expression references capture it cheaply.
pub type Scope = Option<Rc<ScopeFrame>>;

impl ScopeFrame {
    pub fn new(bindings: HashMap<String, Value>, parent: Scope) -> Self {
        ScopeFrame { bindings, parent }
    }

    /// Innermost-first lookup through the chain.
    pub fn lookup(scope: &Scope, name: &str) -> Option<Value> {
        let mut frame = scope.as_deref();
        while let Some(f) = frame {
            if let Some(value) = f.bindings.get(name) {
                return Some(value.clone());
            }
            frame = f.parent.as_deref();
        }
        None
    }
}

const DEFAULT_MAX_RECURSION_DEPTH: usize = 400;

/// Evaluator for parsed expressions
pub struct Evaluator {
    registry: Arc<FunctionRegistry>,
    recursion_depth: usize,
    max_recursion_depth: usize,
}

impl Evaluator {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Evaluator {
            registry,
            recursion_depth: 0,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
        }
    }

    /// Evaluate an expression against a document with an empty scope.
    pub fn evaluate(&mut self, node: &AstNode, data: &Value) -> Result<Value, EvaluatorError> {
        self.evaluate_in_scope(node, data, &None)
    }

    /// Evaluate with an explicit scope chain. Expression references pass
    /// their captured scope back in through here.
    pub fn evaluate_in_scope(
        &mut self,
        node: &AstNode,
        data: &Value,
        scope: &Scope,
    ) -> Result<Value, EvaluatorError> {
        self.recursion_depth += 1;
        if self.recursion_depth > self.max_recursion_depth {
            self.recursion_depth -= 1;
            return Err(EvaluatorError::RecursionLimit);
        }
        let result = self.evaluate_node(node, data, scope);
        self.recursion_depth -= 1;
        result
    }

    /// Apply an expression reference to a value, in the lexical scope the
    /// reference captured. Higher-order builtins go through this.
    pub fn apply_expref(
        &mut self,
        expref: &ExprRef,
        value: &Value,
    ) -> Result<Value, EvaluatorError> {
        self.evaluate_in_scope(&expref.ast, value, &expref.scope)
    }

    fn evaluate_node(
        &mut self,
        node: &AstNode,
        data: &Value,
        scope: &Scope,
    ) -> Result<Value, EvaluatorError> {
        match node {
            AstNode::Current => Ok(data.clone()),

            AstNode::Field(name) => Ok(match data {
                Value::Object(map) => map.get(name.as_str()).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            }),

            AstNode::Index(index) => Ok(match data {
                Value::Array(items) => {
                    let len = items.len() as i64;
                    let i = if *index < 0 { index + len } else { *index };
                    if i >= 0 && i < len {
                        items[i as usize].clone()
                    } else {
                        Value::Null
                    }
                }
                _ => Value::Null,
            }),

            AstNode::Slice(slice) => match data {
                Value::Array(items) => Ok(Value::from(slice_array(items, slice)?)),
                _ => Ok(Value::Null),
            },

            AstNode::Literal(value) => Ok(value.clone()),

            AstNode::Subexpression { lhs, rhs } => {
                let left = self.evaluate_in_scope(lhs, data, scope)?;
                // Navigation through null yields null without evaluating
                // the right-hand side.
                if left.is_null() {
                    return Ok(Value::Null);
                }
                self.evaluate_in_scope(rhs, &left, scope)
            }

            AstNode::Pipe { lhs, rhs } => {
                let left = self.evaluate_in_scope(lhs, data, scope)?;
                self.evaluate_in_scope(rhs, &left, scope)
            }

            AstNode::Or { lhs, rhs } => {
                let left = self.evaluate_in_scope(lhs, data, scope)?;
                if left.is_truthy() {
                    Ok(left)
                } else {
                    self.evaluate_in_scope(rhs, data, scope)
                }
            }

            AstNode::And { lhs, rhs } => {
                let left = self.evaluate_in_scope(lhs, data, scope)?;
                if left.is_truthy() {
                    self.evaluate_in_scope(rhs, data, scope)
                } else {
                    Ok(left)
                }
            }

            AstNode::Not(inner) => {
                let value = self.evaluate_in_scope(inner, data, scope)?;
                Ok(Value::Bool(!value.is_truthy()))
            }

            AstNode::Comparison { op, lhs, rhs } => {
                let left = self.evaluate_in_scope(lhs, data, scope)?;
                let right = self.evaluate_in_scope(rhs, data, scope)?;
                Ok(compare(*op, &left, &right))
            }

            AstNode::Flatten(inner) => {
                let value = self.evaluate_in_scope(inner, data, scope)?;
                Ok(match value {
                    Value::Array(items) => {
                        let mut flattened = Vec::with_capacity(items.len());
                        for item in items.iter() {
                            match item {
                                Value::Array(nested) => {
                                    flattened.extend(nested.iter().cloned());
                                }
                                other => flattened.push(other.clone()),
                            }
                        }
                        Value::from(flattened)
                    }
                    _ => Value::Null,
                })
            }

            AstNode::Projection { lhs, rhs } => {
                let base = self.evaluate_in_scope(lhs, data, scope)?;
                let items = match base {
                    Value::Array(items) => items,
                    _ => return Ok(Value::Null),
                };
                let mut collected = Vec::with_capacity(items.len());
                for item in items.iter() {
                    let result = self.evaluate_in_scope(rhs, item, scope)?;
                    if !result.is_null() {
                        collected.push(result);
                    }
                }
                Ok(Value::from(collected))
            }

            AstNode::ValueProjection { lhs, rhs } => {
                let base = self.evaluate_in_scope(lhs, data, scope)?;
                let map = match base {
                    Value::Object(map) => map,
                    _ => return Ok(Value::Null),
                };
                let mut collected = Vec::with_capacity(map.len());
                for value in map.values() {
                    let result = self.evaluate_in_scope(rhs, value, scope)?;
                    if !result.is_null() {
                        collected.push(result);
                    }
                }
                Ok(Value::from(collected))
            }

            AstNode::FilterProjection {
                lhs,
                rhs,
                condition,
            } => {
                let base = self.evaluate_in_scope(lhs, data, scope)?;
                let items = match base {
                    Value::Array(items) => items,
                    _ => return Ok(Value::Null),
                };
                let mut collected = Vec::new();
                for item in items.iter() {
                    let keep = self.evaluate_in_scope(condition, item, scope)?;
                    if keep.is_truthy() {
                        let result = self.evaluate_in_scope(rhs, item, scope)?;
                        if !result.is_null() {
                            collected.push(result);
                        }
                    }
                }
                Ok(Value::from(collected))
            }

            AstNode::MultiSelectList(expressions) => {
                if data.is_null() {
                    return Ok(Value::Null);
                }
                let mut collected = Vec::with_capacity(expressions.len());
                for expr in expressions {
                    // Unlike projections, multi-selects keep nulls so the
                    // output shape stays fixed.
                    collected.push(self.evaluate_in_scope(expr, data, scope)?);
                }
                Ok(Value::from(collected))
            }

            AstNode::MultiSelectHash(pairs) => {
                if data.is_null() {
                    return Ok(Value::Null);
                }
                let mut map = indexmap::IndexMap::with_capacity(pairs.len());
                for (key, expr) in pairs {
                    map.insert(key.clone(), self.evaluate_in_scope(expr, data, scope)?);
                }
                Ok(Value::object(map))
            }

            AstNode::Function { name, args } => {
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.evaluate_in_scope(arg, data, scope)?);
                }
                self.call_function(name, &arg_values)
            }

            AstNode::Expref(inner) => Ok(Value::expref((**inner).clone(), scope.clone())),

            AstNode::Let { bindings, body } => {
                // Binding expressions see the outer scope, not each other.
                let mut frame = HashMap::with_capacity(bindings.len());
                for (name, expr) in bindings {
                    frame.insert(name.clone(), self.evaluate_in_scope(expr, data, scope)?);
                }
                let inner: Scope = Some(Rc::new(ScopeFrame::new(frame, scope.clone())));
                self.evaluate_in_scope(body, data, &inner)
            }

            AstNode::Variable(name) => ScopeFrame::lookup(scope, name)
                .ok_or_else(|| EvaluatorError::UndefinedVariable { name: name.clone() }),
        }
    }

    /// Look the function up in the registry snapshot, type-check the
    /// arguments, and invoke the handler.
    pub fn call_function(
        &mut self,
        name: &str,
        args: &[Value],
    ) -> Result<Value, EvaluatorError> {
        let registry = Arc::clone(&self.registry);
        let entry = registry
            .get(name)
            .ok_or_else(|| FunctionError::UnknownFunction {
                name: name.to_string(),
            })?;
        entry
            .signature
            .check(name, args)
            .map_err(FunctionError::from)?;
        (entry.handler)(self, args)
    }
}

fn compare(op: Comparator, left: &Value, right: &Value) -> Value {
    match op {
        Comparator::Equal => Value::Bool(left == right),
        Comparator::NotEqual => Value::Bool(left != right),
        // Ordering is defined for numbers only; anything else is null.
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Value::Bool(match op {
                Comparator::LessThan => a < b,
                Comparator::LessThanOrEqual => a <= b,
                Comparator::GreaterThan => a > b,
                Comparator::GreaterThanOrEqual => a >= b,
                _ => unreachable!(),
            }),
            _ => Value::Null,
        },
    }
}

/// Python-style slicing with an optional step.
fn slice_array(items: &[Value], slice: &Slice) -> Result<Vec<Value>, EvaluatorError> {
    let step = slice.step.unwrap_or(1);
    if step == 0 {
        return Err(EvaluatorError::SliceStepZero);
    }
    let len = items.len() as i64;

    let clamp = |value: i64| -> i64 {
        let adjusted = if value < 0 { value + len } else { value };
        if step > 0 {
            adjusted.clamp(0, len)
        } else {
            adjusted.clamp(-1, len - 1)
        }
    };

    let start = match slice.start {
        Some(v) => clamp(v),
        None if step > 0 => 0,
        None => len - 1,
    };
    let stop = match slice.stop {
        Some(v) => clamp(v),
        None if step > 0 => len,
        None => -1,
    };

    let mut result = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        result.push(items[i as usize].clone());
        i += step;
    }
    Ok(result)
}
