//! `${NAME}` token substitution over workflow documents.
//!
//! Substitution is single-pass and non-recursive: every string is scanned
//! once, known tokens are replaced, and replacement text is never re-scanned.
//! A value that itself contains `${...}` therefore lands verbatim. Unknown
//! tokens are left in place untouched.

use serde_json::Value;
use std::collections::HashMap;

/// The replacement table applied to a workflow document.
#[derive(Debug, Default, Clone)]
pub struct Substitutions {
    replacements: HashMap<String, String>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `${name}` to `value`. Later bindings win.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.replacements.insert(name.into(), value.into());
    }

    /// Bind `name` only if nothing bound it yet. Used to layer parent vars
    /// under a child's own vars.
    pub fn set_default(&mut self, name: &str, value: impl Into<String>) {
        self.replacements.entry(name.to_string()).or_insert_with(|| value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.replacements.get(name).map(String::as_str)
    }

    /// Replace every known `${token}` in `input`, in one pass.
    pub fn apply_str(&self, input: &str) -> String {
        let mut output = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            let (before, from_token) = rest.split_at(start);
            output.push_str(before);
            let Some(end) = from_token.find('}') else {
                // Unterminated token: keep the tail verbatim.
                output.push_str(from_token);
                return output;
            };
            let token = &from_token[2..end];
            match self.replacements.get(token) {
                Some(value) => output.push_str(value),
                None => output.push_str(&from_token[..=end]),
            }
            rest = &from_token[end + 1..];
        }
        output.push_str(rest);
        output
    }

    /// Apply [`Substitutions::apply_str`] to every string in a JSON tree,
    /// including object keys.
    pub fn apply_value(&self, value: &mut Value) {
        match value {
            Value::String(text) => *text = self.apply_str(text),
            Value::Array(items) => {
                for item in items {
                    self.apply_value(item);
                }
            }
            Value::Object(map) => {
                let entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
                for (key, mut nested) in entries {
                    self.apply_value(&mut nested);
                    map.insert(self.apply_str(&key), nested);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subs() -> Substitutions {
        let mut subs = Substitutions::new();
        subs.set("NAME", "wf");
        subs.set("ID", "abcde");
        subs
    }

    #[test]
    fn replaces_known_tokens() {
        assert_eq!(subs().apply_str("disk-${NAME}-${ID}"), "disk-wf-abcde");
    }

    #[test]
    fn unknown_tokens_are_left_alone() {
        assert_eq!(subs().apply_str("keep-${MYSTERY}"), "keep-${MYSTERY}");
    }

    #[test]
    fn substitution_is_single_pass_and_non_recursive() {
        let mut subs = Substitutions::new();
        subs.set("ID", "abcde");
        subs.set("outer", "${ID}");
        // ${outer} expands to the literal text "${ID}", which is not
        // re-scanned.
        assert_eq!(subs.apply_str("x-${outer}"), "x-${ID}");
    }

    #[test]
    fn unterminated_token_is_kept_verbatim() {
        assert_eq!(subs().apply_str("oops-${NAME"), "oops-${NAME");
    }

    #[test]
    fn walks_nested_documents() {
        let mut doc = json!({
            "Steps": {
                "make-${NAME}": {
                    "CreateDisks": [{"Name": "d-${ID}", "SizeGb": 10}]
                }
            }
        });
        subs().apply_value(&mut doc);
        let steps = doc.get("Steps").unwrap().as_object().unwrap();
        assert!(steps.contains_key("make-wf"));
        let disk = &steps["make-wf"]["CreateDisks"][0];
        assert_eq!(disk["Name"], "d-abcde");
        assert_eq!(disk["SizeGb"], 10);
    }

    #[test]
    fn set_default_does_not_override() {
        let mut subs = subs();
        subs.set_default("NAME", "other");
        assert_eq!(subs.get("NAME"), Some("wf"));
    }
}
