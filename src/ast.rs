// Abstract Syntax Tree definitions

use serde::{Deserialize, Serialize};

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

/// A slice expression `[start:stop:step]` with Python clamp semantics.
/// Missing components stay `None` and are resolved against the array length
/// at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

/// AST node types
///
/// Projections are encoded structurally: a `Projection` (or
/// `ValueProjection`/`FilterProjection`) node pairs the expression producing
/// the sequence with the expression applied per element, so the evaluator
/// needs no hidden "current projection" state. A `Pipe` node is the sequential
/// boundary that stops that per-element context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AstNode {
    /// The current node, `@` (also the implicit right-hand side of a bare
    /// projection such as `foo[*]`).
    Current,

    /// Field access by name (unquoted or quoted identifier).
    Field(String),

    /// Array index; negative counts from the end.
    Index(i64),

    /// Slice `[start:stop:step]`.
    Slice(Slice),

    /// Literal value: backtick raw-JSON, raw string, or bare number.
    Literal(crate::value::Value),

    /// `lhs` then `rhs` evaluated against its result (dot chains, index
    /// application). Null from `lhs` short-circuits.
    Subexpression {
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },

    /// Sequential composition: evaluate `lhs`, then `rhs` against the result.
    /// Unlike `Subexpression` this resets projection context and does not
    /// short-circuit on null.
    Pipe {
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },

    Or {
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },

    And {
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },

    Not(Box<AstNode>),

    Comparison {
        op: Comparator,
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },

    /// Merge one nesting level of `child`'s array-of-arrays result.
    Flatten(Box<AstNode>),

    /// List projection: `lhs` yields an array, `rhs` is applied per element;
    /// null per-element results are dropped.
    Projection {
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },

    /// Object value projection (`.*`): projects over an object's values.
    ValueProjection {
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },

    /// Filter projection `lhs[?condition].rhs`.
    FilterProjection {
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
        condition: Box<AstNode>,
    },

    /// Multi-select list `[expr, expr, ...]`; per-element nulls are kept.
    MultiSelectList(Vec<AstNode>),

    /// Multi-select hash `{key: expr, ...}`; keys keep source order.
    MultiSelectHash(Vec<(String, AstNode)>),

    /// Function call by name; arguments are evaluated eagerly left to right.
    Function {
        name: String,
        args: Vec<AstNode>,
    },

    /// Expression reference `&expr`: evaluates to a deferred (AST, scope)
    /// value, never evaluated until a higher-order function invokes it.
    Expref(Box<AstNode>),

    /// `let $a = e1, $b = e2 in body`. Binding right-hand sides are evaluated
    /// in the enclosing scope; only `body` sees the new bindings.
    Let {
        bindings: Vec<(String, AstNode)>,
        body: Box<AstNode>,
    },

    /// Variable reference `$name`, resolved innermost-first through the
    /// scope chain.
    Variable(String),
}

impl AstNode {
    /// Create a field access node
    pub fn field(name: impl Into<String>) -> Self {
        AstNode::Field(name.into())
    }

    /// Create a literal node
    pub fn literal(value: impl Into<crate::value::Value>) -> Self {
        AstNode::Literal(value.into())
    }

    /// Create a variable reference node
    pub fn variable(name: impl Into<String>) -> Self {
        AstNode::Variable(name.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_ast_node_creation() {
        assert!(matches!(AstNode::field("foo"), AstNode::Field(_)));
        assert!(matches!(AstNode::literal(42.0), AstNode::Literal(_)));
        assert!(matches!(AstNode::variable("x"), AstNode::Variable(_)));
    }

    #[test]
    fn test_literal_holds_value() {
        let node = AstNode::literal("hello");
        assert_eq!(node, AstNode::Literal(Value::string("hello")));
    }
}
