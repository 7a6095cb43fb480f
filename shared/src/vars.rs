//! `${VAR}` expansion for configuration text.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z][A-Za-z0-9_]*)\}").expect("variable pattern is valid")
});

/// Replaces every `${NAME}` with `vars[NAME]`. Unknown names are left as-is.
pub fn expand_vars(vars: &HashMap<String, String>, value: &str) -> String {
    VAR_RE
        .replace_all(value, |caps: &Captures<'_>| match vars.get(&caps[1]) {
            Some(repl) => repl.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Expands against the process environment.
pub fn expand_env_vars(value: &str) -> String {
    let vars: HashMap<String, String> = std::env::vars().collect();
    expand_vars(&vars, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> HashMap<String, String> {
        HashMap::from([
            ("HOST".to_string(), "example.com".to_string()),
            ("PORT".to_string(), "8080".to_string()),
            ("EMPTY".to_string(), String::new()),
        ])
    }

    #[test]
    fn test_no_vars() {
        assert_eq!(expand_vars(&vars(), "plain text"), "plain text");
    }

    #[test]
    fn test_expansion() {
        assert_eq!(
            expand_vars(&vars(), "http://${HOST}:${PORT}/path"),
            "http://example.com:8080/path"
        );
        assert_eq!(expand_vars(&vars(), "${HOST}${HOST}"), "example.comexample.com");
        assert_eq!(expand_vars(&vars(), "a${EMPTY}b"), "ab");
    }

    #[test]
    fn test_unknown_and_malformed() {
        assert_eq!(expand_vars(&vars(), "${MISSING}/${HOST}"), "${MISSING}/example.com");
        assert_eq!(expand_vars(&vars(), "${1BAD} $HOST ${HOST"), "${1BAD} $HOST ${HOST");
    }
}
