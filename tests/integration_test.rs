// Integration tests for the full pipeline: parse, evaluate, serialize.
//
// These exercise complete expressions through the public API the way an
// application would use it.

use std::sync::Arc;

use jmesquery::{
    compile, register_function, search, Error, Evaluator, EvaluatorError, ParamType, Parameter,
    Signature, Value,
};
use serde_json::json;

fn run(expression: &str, data: serde_json::Value) -> Value {
    search(expression, &Value::from(data)).unwrap()
}

#[test]
fn test_simple_field_access() {
    let data = json!({"name": "Alice", "age": 30});
    assert_eq!(run("name", data), Value::from("Alice"));
}

#[test]
fn test_nested_field_access() {
    let data = json!({
        "user": {
            "profile": {
                "name": "Bob"
            }
        }
    });
    assert_eq!(run("user.profile.name", data), Value::from("Bob"));
}

#[test]
fn test_missing_fields_are_null() {
    assert_eq!(run("a.b.c", json!({})), Value::Null);
    assert_eq!(run("a.b.c", json!({"a": {"b": 1}})), Value::Null);
}

#[test]
fn test_index_and_slice() {
    let data = json!({"items": [10, 20, 30, 40]});
    assert_eq!(run("items[1]", data.clone()), Value::from(20));
    assert_eq!(run("items[-1]", data.clone()), Value::from(40));
    assert_eq!(run("items[99]", data.clone()), Value::Null);
    assert_eq!(run("items[1:3]", data.clone()), Value::from(json!([20, 30])));
    assert_eq!(run("items[::-1]", data), Value::from(json!([40, 30, 20, 10])));
}

#[test]
fn test_projection_pipeline() {
    let data = json!({
        "reservations": [
            {"instances": [{"state": "running"}, {"state": "stopped"}]},
            {"instances": [{"state": "terminated"}]}
        ]
    });
    assert_eq!(
        run("reservations[].instances[].state", data),
        Value::from(json!(["running", "stopped", "terminated"]))
    );
}

#[test]
fn test_filter_with_comparison() {
    let data = json!({
        "people": [
            {"name": "a", "age": 35},
            {"name": "b", "age": 25},
            {"name": "c", "age": 40}
        ]
    });
    assert_eq!(
        run("people[?age > `30`].name", data),
        Value::from(json!(["a", "c"]))
    );
}

#[test]
fn test_pipe_resets_projection() {
    let data = json!({"people": [{"first": "a"}, {"first": "b"}]});
    assert_eq!(run("people[*].first | [0]", data), Value::from("a"));
}

#[test]
fn test_multi_select_shapes() {
    let data = json!({"a": 1, "c": 3});
    assert_eq!(run("[a, b, c]", data.clone()), Value::from(json!([1, null, 3])));
    assert_eq!(
        run("{first: a, missing: b}", data),
        Value::from(json!({"first": 1, "missing": null}))
    );
}

#[test]
fn test_let_binding_survives_pipe() {
    let data = json!({"prefix": ">> ", "lines": ["one", "two"]});
    assert_eq!(
        run(
            "let $p = prefix in lines | join($p, @)",
            data
        ),
        Value::from("one>> two")
    );
}

#[test]
fn test_let_binding_in_projection() {
    // The bound variable stays visible inside the projected elements.
    let data = json!({"threshold": 3, "values": [{"v": 1}, {"v": 4}, {"v": 5}]});
    assert_eq!(
        run("let $t = threshold in values[?v > $t].v", data),
        Value::from(json!([4, 5]))
    );
}

#[test]
fn test_expression_reference_functions() {
    let input = json!({
        "items": [
            {"spec": {"nodeName": "node_01", "other": "values_01"}},
            {"spec": {"nodeName": "node_02", "other": "values_02"}},
            {"spec": {"nodeName": "node_03", "other": "values_03"}},
            {"spec": {"nodeName": "node_01", "other": "values_04"}}
        ]
    });
    let result = run("group_by(items, &spec.nodeName)", input);
    assert_eq!(
        serde_json::Value::from(&result),
        json!({
            "node_01": [
                {"spec": {"nodeName": "node_01", "other": "values_01"}},
                {"spec": {"nodeName": "node_01", "other": "values_04"}}
            ],
            "node_02": [{"spec": {"nodeName": "node_02", "other": "values_02"}}],
            "node_03": [{"spec": {"nodeName": "node_03", "other": "values_03"}}]
        })
    );
}

#[test]
fn test_regex_extraction_pipeline() {
    assert_eq!(
        run(
            r"regex_match_all('/(\w+)=(\d+)/g', @) | map(&[[1],[2]], @) | to_object(@)",
            json!("foo=24 bar=99")
        ),
        Value::from(json!({"foo": "24", "bar": "99"}))
    );
}

#[test]
fn test_hash_and_uuid_round() {
    assert_eq!(
        run("sha256(@)", json!("hello world")),
        Value::from("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
    );
    assert_eq!(
        run("uuid('example')", json!(null)),
        Value::from("feb54431-301b-52bb-a6dd-e1e93e81bb9e")
    );
}

#[test]
fn test_serialize_parse_round() {
    // Deterministic serialization sorts keys, so re-parsing then
    // re-serializing is a fixed point.
    let first = run("json_serialize(@)", json!({"z": 1, "a": {"y": 2, "b": 3}}));
    assert_eq!(first, Value::from(r#"{"a":{"b":3,"y":2},"z":1}"#));
    let again = search(
        "json_serialize(json_parse(@))",
        &first,
    )
    .unwrap();
    assert_eq!(again, first);
}

#[test]
fn test_truthiness_in_expressions() {
    // 0 is truthy; empty string, array, object, null and false are not.
    assert_eq!(run("a || 'fallback'", json!({"a": 0})), Value::from(0));
    assert_eq!(run("a || 'fallback'", json!({"a": ""})), Value::from("fallback"));
    assert_eq!(run("a || 'fallback'", json!({"a": []})), Value::from("fallback"));
    assert_eq!(run("a || 'fallback'", json!({"a": {}})), Value::from("fallback"));
    assert_eq!(run("a || 'fallback'", json!({"a": false})), Value::from("fallback"));
}

#[test]
fn test_raw_string_and_literal() {
    assert_eq!(run("'[?]'", json!(null)), Value::from("[?]"));
    assert_eq!(run("`[1, 2]`[0]", json!(null)), Value::from(1));
}

#[test]
fn test_custom_function_in_let_body() {
    register_function(
        "plusplus",
        Signature::new(vec![Parameter::required(&[ParamType::Number])]),
        Arc::new(|_: &mut Evaluator, args: &[Value]| {
            Ok(Value::Number(args[0].as_f64().unwrap_or(0.0) + 1.0))
        }),
    )
    .unwrap();
    assert_eq!(
        run("let $n = index in plusplus($n)", json!({"index": 0})),
        Value::from(1)
    );
}

#[test]
fn test_compiled_expression_reuse() {
    let expr = compile("users[?active].name").unwrap();
    let a = expr
        .search(&Value::from(json!({"users": [{"name": "x", "active": true}]})))
        .unwrap();
    let b = expr
        .search(&Value::from(json!({"users": [{"name": "y", "active": false}]})))
        .unwrap();
    assert_eq!(a, Value::from(json!(["x"])));
    assert_eq!(b, Value::from(json!([])));
}

#[test]
fn test_type_errors_carry_full_message() {
    let err = search("length(`null`)", &Value::from(json!([]))).unwrap_err();
    match err {
        Error::Evaluation(EvaluatorError::Function(inner)) => {
            assert_eq!(
                inner.to_string(),
                "length() expected argument 1 to be type (string | array | object) but received type null instead."
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_syntax_errors_carry_offsets() {
    let err = search("foo # bar", &Value::Null).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("position 4"), "unexpected message: {message}");
}

#[test]
fn test_undefined_variable_is_an_error() {
    let err = search("$nope", &Value::Null).unwrap_err();
    assert!(matches!(
        err,
        Error::Evaluation(EvaluatorError::UndefinedVariable { .. })
    ));
}
