//! A query and transformation language for JSON documents.
//!
//! Expressions select and reshape values: field access and indexing,
//! projections over arrays and objects, filters, multi-selects, pipes,
//! lexical `let` bindings, and a type-checked function library that can
//! be extended at runtime.
//!
//! ```
//! use jmesquery::{search, Value};
//!
//! let data = Value::from(serde_json::json!({
//!     "machines": [
//!         {"name": "a", "state": "running"},
//!         {"name": "b", "state": "stopped"},
//!         {"name": "c", "state": "running"}
//!     ]
//! }));
//! let result = search("machines[?state=='running'].name", &data).unwrap();
//! assert_eq!(result, Value::from(serde_json::json!(["a", "c"])));
//! ```
//!
//! An expression can be compiled once and evaluated against many
//! documents:
//!
//! ```
//! use jmesquery::{compile, Value};
//!
//! let expr = compile("items[0].id").unwrap();
//! for doc in [serde_json::json!({"items": [{"id": 1}]})] {
//!     let result = expr.search(&Value::from(doc)).unwrap();
//!     assert_eq!(result, Value::from(1));
//! }
//! ```

use std::sync::{Arc, LazyLock, RwLock};

use thiserror::Error;

pub mod ast;
pub mod evaluator;
pub mod functions;
pub mod parser;
pub mod serializer;
pub mod signature;
pub mod value;

pub use ast::{AstNode, Comparator, Slice};
pub use evaluator::{Evaluator, EvaluatorError, Scope, ScopeFrame};
pub use functions::{FunctionEntry, FunctionError, FunctionHandler, FunctionRegistry};
pub use parser::{parse, ParseError};
pub use serializer::{serialize, SerializeError};
pub use signature::{ParamType, Parameter, Signature, SignatureError};
pub use value::{ExprRef, Value};

/// Any failure surfaced by the top-level API.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Evaluation(#[from] EvaluatorError),

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

// The global registry holds an immutable snapshot behind the lock.
// Evaluation clones the Arc and never holds the lock while running, so a
// slow query cannot block registration and vice versa.
static GLOBAL_REGISTRY: LazyLock<RwLock<Arc<FunctionRegistry>>> =
    LazyLock::new(|| RwLock::new(Arc::new(FunctionRegistry::with_builtins())));

fn registry_snapshot() -> Arc<FunctionRegistry> {
    let guard = GLOBAL_REGISTRY.read().unwrap_or_else(|e| e.into_inner());
    Arc::clone(&guard)
}

/// Register a custom function in the global registry, replacing any
/// existing function with the same name. Expressions compiled before or
/// after the call see the updated registry on their next evaluation.
pub fn register_function(
    name: impl Into<String>,
    signature: Signature,
    handler: FunctionHandler,
) -> Result<(), Error> {
    let mut guard = GLOBAL_REGISTRY.write().unwrap_or_else(|e| e.into_inner());
    let extended = guard.extended(name, signature, handler)?;
    *guard = Arc::new(extended);
    Ok(())
}

/// A compiled expression, reusable across documents.
pub struct Expression {
    source: String,
    ast: AstNode,
}

impl Expression {
    /// The expression text this was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &AstNode {
        &self.ast
    }

    /// Evaluate against a document using the global function registry.
    pub fn search(&self, data: &Value) -> Result<Value, Error> {
        let mut evaluator = Evaluator::new(registry_snapshot());
        Ok(evaluator.evaluate(&self.ast, data)?)
    }

    /// Evaluate with an explicit registry instead of the global one.
    pub fn search_with_registry(
        &self,
        data: &Value,
        registry: Arc<FunctionRegistry>,
    ) -> Result<Value, Error> {
        let mut evaluator = Evaluator::new(registry);
        Ok(evaluator.evaluate(&self.ast, data)?)
    }
}

/// Compile an expression for repeated evaluation.
pub fn compile(expression: &str) -> Result<Expression, Error> {
    let ast = parser::parse(expression)?;
    Ok(Expression {
        source: expression.to_string(),
        ast,
    })
}

/// Parse and evaluate an expression against a document in one step.
pub fn search(expression: &str, data: &Value) -> Result<Value, Error> {
    compile(expression)?.search(data)
}
