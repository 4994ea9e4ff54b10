//! Field extraction for entity ids and display names.
//!
//! Two forms are supported:
//!
//! - [`FieldPath`]: a dotted property path such as `#result.id` or
//!   `#request.title`. Only `[A-Za-z0-9_]` segments are accepted; there is no
//!   evaluation beyond walking objects and indexing arrays.
//! - A closure registered next to the audited operation ([`Extractor::func`]).
//!
//! Both are evaluated against two scopes: the call's named input arguments and
//! the call's result (under the reserved name `result`). Any evaluation
//! failure yields `None`.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::AuditError;

/// Reserved scope name for the wrapped call's return value.
pub const RESULT_SCOPE: &str = "result";

/// Named input arguments of an audited call, serialized to JSON.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: Vec<(String, Value)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument. A value that fails to serialize is recorded as null.
    pub fn with(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let name = name.into();
        let value = serde_json::to_value(value).unwrap_or_else(|e| {
            tracing::debug!(argument = %name, error = %e, "argument not serializable");
            Value::Null
        });
        self.values.push((name, value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A parsed `#scope.segment.segment` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    scope: String,
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(expression: &str) -> Result<Self, AuditError> {
        let invalid = |reason: &str| AuditError::InvalidExpression {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let body = expression
            .trim()
            .strip_prefix('#')
            .ok_or_else(|| invalid("must start with '#'"))?;

        let mut parts = body.split('.');
        let scope = parts.next().unwrap_or_default();
        if !is_valid_segment(scope) {
            return Err(invalid("scope must be a non-empty identifier"));
        }

        let segments: Vec<String> = parts.map(str::to_string).collect();
        if segments.iter().any(|s| !is_valid_segment(s)) {
            return Err(invalid("path segments may only contain [A-Za-z0-9_]"));
        }

        Ok(Self {
            scope: scope.to_string(),
            segments,
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Resolve against the call scopes. `result` is `None` before the call runs.
    pub fn evaluate(&self, args: &Arguments, result: Option<&Value>) -> Option<Value> {
        let found = if self.scope == RESULT_SCOPE {
            walk(result?, &self.segments)
        } else if let Some(arg) = args.get(&self.scope) {
            walk(arg, &self.segments)
        } else {
            // bare property of the result, e.g. `#title`
            let root = result?.get(&self.scope)?;
            walk(root, &self.segments)
        };

        found.filter(|v| !v.is_null()).cloned()
    }
}

impl FromStr for FieldPath {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.scope)?;
        for segment in &self.segments {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn walk<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

type ExtractFn = dyn Fn(&Arguments, Option<&Value>) -> Option<Value> + Send + Sync;

/// How an entity id or display name is derived from a call.
#[derive(Clone)]
pub enum Extractor {
    Path(FieldPath),
    Func(Arc<ExtractFn>),
}

impl Extractor {
    /// Parse a path expression.
    pub fn path(expression: &str) -> Result<Self, AuditError> {
        FieldPath::parse(expression).map(Self::Path)
    }

    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&Arguments, Option<&Value>) -> Option<Value> + Send + Sync + 'static,
    {
        Self::Func(Arc::new(f))
    }

    pub fn evaluate(&self, args: &Arguments, result: Option<&Value>) -> Option<Value> {
        match self {
            Self::Path(path) => path.evaluate(args, result),
            Self::Func(f) => match catch_unwind(AssertUnwindSafe(|| f(args, result))) {
                Ok(value) => value.filter(|v| !v.is_null()),
                Err(_) => {
                    tracing::warn!("field extractor panicked; treating as unresolved");
                    None
                }
            },
        }
    }

    /// Evaluate and render as text: strings verbatim, scalars via `to_string`.
    pub fn evaluate_string(&self, args: &Arguments, result: Option<&Value>) -> Option<String> {
        self.evaluate(args, result).map(|value| match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(&path.to_string()).finish(),
            Self::Func(_) => f.write_str("Func(..)"),
        }
    }
}

impl From<FieldPath> for Extractor {
    fn from(path: FieldPath) -> Self {
        Self::Path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args() -> Arguments {
        Arguments::new()
            .with("id", 42)
            .with("request", json!({ "title": "Portfolio v2", "tags": ["rust", "axum"] }))
    }

    #[test]
    fn test_parses_and_displays() {
        let path = FieldPath::parse("#result.owner.name").unwrap();
        assert_eq!(path.scope(), "result");
        assert_eq!(path.to_string(), "#result.owner.name");
    }

    #[test]
    fn test_rejects_non_path_syntax() {
        for expr in ["result.id", "#", "#a..b", "#a.b()", "#a.b[0]", "#a.b + 1", "#T(java.lang.System)"] {
            assert!(
                matches!(FieldPath::parse(expr), Err(AuditError::InvalidExpression { .. })),
                "{expr} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolves_arguments_before_call() {
        let id = FieldPath::parse("#id").unwrap();
        assert_eq!(id.evaluate(&args(), None), Some(json!(42)));

        let title = FieldPath::parse("#request.title").unwrap();
        assert_eq!(title.evaluate(&args(), None), Some(json!("Portfolio v2")));

        let tag = FieldPath::parse("#request.tags.1").unwrap();
        assert_eq!(tag.evaluate(&args(), None), Some(json!("axum")));
    }

    #[test]
    fn test_result_scope_needs_result() {
        let path = FieldPath::parse("#result.id").unwrap();
        assert_eq!(path.evaluate(&args(), None), None);

        let result = json!({ "id": 7, "title": "Shop" });
        assert_eq!(path.evaluate(&args(), Some(&result)), Some(json!(7)));
    }

    #[test]
    fn test_unknown_scope_falls_back_to_result_root() {
        let result = json!({ "title": "Shop" });
        let path = FieldPath::parse("#title").unwrap();
        assert_eq!(path.evaluate(&Arguments::new(), Some(&result)), Some(json!("Shop")));
        assert_eq!(path.evaluate(&Arguments::new(), None), None);
    }

    #[test]
    fn test_missing_or_null_yields_none() {
        let result = json!({ "id": null });
        let path = FieldPath::parse("#result.id").unwrap();
        assert_eq!(path.evaluate(&args(), Some(&result)), None);

        let deep = FieldPath::parse("#request.title.length").unwrap();
        assert_eq!(deep.evaluate(&args(), None), None);
    }

    #[test]
    fn test_closure_extractor_and_panic_containment() {
        let ok = Extractor::func(|args, _| args.get("id").cloned());
        assert_eq!(ok.evaluate_string(&args(), None), Some("42".to_string()));

        let boom = Extractor::func(|_, _| panic!("bad extractor"));
        assert_eq!(boom.evaluate(&args(), None), None);
    }

    #[test]
    fn test_evaluate_string_keeps_strings_unquoted() {
        let path = Extractor::path("#request.title").unwrap();
        assert_eq!(path.evaluate_string(&args(), None).as_deref(), Some("Portfolio v2"));
    }
}
