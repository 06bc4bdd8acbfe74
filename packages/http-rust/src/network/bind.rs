//! Maps a configured `bind` value to the host string a listener binds on.

use serde_json::Value;

/// Address that listens on every interface.
pub const ANY_INTERFACE: &str = "0.0.0.0";

/// Address used when the configured value is falsy or not a string.
pub const LOOPBACK: &str = "localhost";

/// Resolves a configured bind value.
///
/// - `0`, `true`, `"0"` and `"0.0.0.0"` mean every interface.
/// - Any other non-empty string is used as-is.
/// - Everything else (missing, `false`, `""`, other numbers, arrays, objects)
///   falls back to the loopback host.
#[must_use]
pub fn resolve_bind(value: &Value) -> String {
    let host = match value {
        Value::Bool(true) => ANY_INTERFACE,
        Value::Number(n) if n.as_f64() == Some(0.0) => ANY_INTERFACE,
        Value::String(s) if s == "0" || s == ANY_INTERFACE => ANY_INTERFACE,
        Value::String(s) if !s.is_empty() => s.as_str(),
        _ => LOOPBACK,
    };
    host.to_string()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn any_interface_tokens() {
        for token in [json!(0), json!(0.0), json!(true), json!("0"), json!("0.0.0.0")] {
            assert_eq!(resolve_bind(&token), ANY_INTERFACE, "token {token}");
        }
    }

    #[test]
    fn falsy_and_non_string_values_fall_back_to_loopback() {
        for value in [
            Value::Null,
            json!(false),
            json!(""),
            json!(8080),
            json!(-1.5),
            json!([]),
            json!({ "host": "example.com" }),
        ] {
            assert_eq!(resolve_bind(&value), LOOPBACK, "value {value}");
        }
    }

    #[test]
    fn strings_pass_through() {
        assert_eq!(resolve_bind(&json!("127.0.0.1")), "127.0.0.1");
        assert_eq!(resolve_bind(&json!("::1")), "::1");
        assert_eq!(resolve_bind(&json!("api.internal")), "api.internal");
    }

    proptest! {
        #[test]
        fn other_strings_are_unchanged(host in "\\PC{1,40}") {
            prop_assume!(host != "0" && host != ANY_INTERFACE);
            prop_assert_eq!(resolve_bind(&Value::String(host.clone())), host);
        }

        #[test]
        fn nonzero_numbers_resolve_to_loopback(n in any::<i64>()) {
            prop_assume!(n != 0);
            prop_assert_eq!(resolve_bind(&json!(n)), LOOPBACK);
        }
    }
}
