//! JSON rendering for assertions and diagnostics.

use serde::Serialize;

pub trait ToJson {
    /// Compact JSON.
    fn to_json(&self) -> String;

    /// Pretty JSON, for test output.
    fn to_diagnostic_json(&self) -> String;
}

impl<T: Serialize + ?Sized> ToJson for T {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("<unserializable: {e}>"))
    }

    fn to_diagnostic_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("<unserializable: {e}>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compact_and_pretty() {
        let value = json!({"userName": "Vitalik"});
        assert_eq!(value.to_json(), r#"{"userName":"Vitalik"}"#);
        assert_eq!(value.to_diagnostic_json(), "{\n  \"userName\": \"Vitalik\"\n}");
    }
}
