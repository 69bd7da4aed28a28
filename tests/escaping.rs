use serde_json::json;
use supersequel::SupersequelError;
use supersequel::escape::{html_escape, html_literal, identifier, literal, quote};

#[test]
fn literal_quotes_strings_and_escapes_quotes() {
    assert_eq!(literal(&json!(r#"["user"]"#)).unwrap(), r#"'["user"]'"#);
    assert_eq!(literal(&json!("O'Brien")).unwrap(), r"'O\'Brien'");
    assert_eq!(literal(&json!("OR 1=1; 'OR 1=1;'")).unwrap(), r"'OR 1=1; \'OR 1=1;\''");
}

#[test]
fn literal_escapes_backslashes_before_quotes() {
    // a trailing backslash must not be able to swallow the closing quote
    assert_eq!(quote(r"a\"), r"'a\\'");
    assert_eq!(literal(&json!(r"\' OR 1=1 --")).unwrap(), r"'\\\' OR 1=1 --'");
}

#[test]
fn literal_scalars_and_lists() {
    assert_eq!(literal(&json!(3)).unwrap(), "3");
    assert_eq!(literal(&json!(-1.5)).unwrap(), "-1.5");
    assert_eq!(literal(&json!(true)).unwrap(), "true");
    assert_eq!(literal(&json!(null)).unwrap(), "NULL");
    assert_eq!(literal(&json!([1, "two", null])).unwrap(), "1, 'two', NULL");
    assert_eq!(literal(&json!([[1, 2], [3, 4]])).unwrap(), "(1, 2), (3, 4)");
}

#[test]
fn literal_rejects_objects() {
    let err = literal(&json!({"a": 1})).unwrap_err();
    assert!(matches!(err, SupersequelError::UnescapableValue(_)));
}

#[test]
fn identifier_wildcards_are_bare() {
    assert_eq!(identifier(&json!("*")).unwrap(), "*");
    assert_eq!(identifier(&json!(["*"])).unwrap(), "*");
}

#[test]
fn identifier_wraps_in_backticks() {
    assert_eq!(identifier(&json!("id")).unwrap(), "`id`");
    assert_eq!(identifier(&json!(["DELETE FROM users"])).unwrap(), "`DELETE FROM users`");
    assert_eq!(identifier(&json!(["id", "name"])).unwrap(), "`id`, `name`");
    assert_eq!(identifier(&json!("a`b")).unwrap(), "`a``b`");
}

#[test]
fn identifier_rejects_non_names() {
    assert!(matches!(identifier(&json!(null)), Err(SupersequelError::UnescapableValue(_))));
    assert!(matches!(identifier(&json!({"a": 1})), Err(SupersequelError::UnescapableValue(_))));
    assert!(matches!(identifier(&json!([])), Err(SupersequelError::UnescapableValue(_))));
    assert!(matches!(identifier(&json!(["id", ["nested"]])), Err(SupersequelError::UnescapableValue(_))));
}

#[test]
fn html_then_literal() {
    assert_eq!(
        html_literal(&json!("<script src='thing.com' />")).unwrap(),
        "'&lt;script src&#x3D;&#x27;thing.com&#x27; /&gt;'"
    );
    assert_eq!(html_escape(r#"a & "b" `c`"#), "a &amp; &quot;b&quot; &#x60;c&#x60;");
    assert_eq!(html_literal(&json!(7)).unwrap(), "'7'");
    assert!(html_literal(&json!(["x"])).is_err());
}
