use serde::{Deserialize, Serialize};
use serde_json::Value;

const EXPRESSION_KEYS: [&str; 6] = ["lit", "ref", "not", "all", "any", "eq"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expression {
    Lit {
        lit: Value,
    },
    Ref {
        #[serde(rename = "ref")]
        path: String,
    },
    Not {
        not: Box<Expression>,
    },
    All {
        all: Vec<Expression>,
    },
    Any {
        any: Vec<Expression>,
    },
    Eq {
        eq: Vec<Expression>,
    },
}

impl Expression {
    pub fn lit(value: impl Into<Value>) -> Self {
        Self::Lit { lit: value.into() }
    }

    pub fn reference(path: impl Into<String>) -> Self {
        Self::Ref { path: path.into() }
    }

    pub fn refs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_refs(self, &mut out);
        out
    }
}

fn collect_refs<'a>(expression: &'a Expression, out: &mut Vec<&'a str>) {
    match expression {
        Expression::Lit { .. } => {}
        Expression::Ref { path } => out.push(path.as_str()),
        Expression::Not { not } => collect_refs(not, out),
        Expression::All { all: items } | Expression::Any { any: items } | Expression::Eq { eq: items } => {
            for item in items {
                collect_refs(item, out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    #[error("reference `{path}` is not bound")]
    MissingRef { path: String },
    #[error("reference `{path}` lookup failed: {reason}")]
    Lookup { path: String, reason: String },
    #[error("`{op}` expects {expected}, got {actual}")]
    TypeMismatch {
        op: &'static str,
        expected: &'static str,
        actual: String,
    },
    #[error("`{op}` expects {expected} operands, got {actual}")]
    Arity {
        op: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("invalid expression at `{path}`: {reason}")]
    Invalid { path: String, reason: String },
}

pub trait RefLookup {
    /// `Ok(None)` means the path is well formed but nothing is bound to it.
    fn lookup(&self, path: &str) -> Result<Option<Value>, ExpressionError>;
}

impl RefLookup for Value {
    fn lookup(&self, path: &str) -> Result<Option<Value>, ExpressionError> {
        Ok(select_path(self, path).cloned())
    }
}

pub fn evaluate(expression: &Expression, lookup: &dyn RefLookup) -> Result<Value, ExpressionError> {
    match expression {
        Expression::Lit { lit } => Ok(lit.clone()),
        Expression::Ref { path } => lookup
            .lookup(path)?
            .ok_or_else(|| ExpressionError::MissingRef { path: path.clone() }),
        Expression::Not { not } => Ok(Value::Bool(!expect_bool("not", evaluate(not, lookup)?)?)),
        Expression::All { all } => {
            for item in all {
                if !expect_bool("all", evaluate(item, lookup)?)? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        Expression::Any { any } => {
            for item in any {
                if expect_bool("any", evaluate(item, lookup)?)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Expression::Eq { eq } => {
            if eq.len() != 2 {
                return Err(ExpressionError::Arity {
                    op: "eq",
                    expected: 2,
                    actual: eq.len(),
                });
            }
            let left = evaluate(&eq[0], lookup)?;
            let right = evaluate(&eq[1], lookup)?;
            Ok(Value::Bool(left == right))
        }
    }
}

pub fn evaluate_condition(expression: &Expression, lookup: &dyn RefLookup) -> Result<bool, ExpressionError> {
    expect_bool("condition", evaluate(expression, lookup)?)
}

/// Replaces every single-key expression object (`{"ref": ..}`, `{"lit": ..}`, ...) inside
/// `value` with its evaluated result.
pub fn materialize_value(value: &Value, lookup: &dyn RefLookup) -> Result<Value, ExpressionError> {
    materialize_at(value, lookup, &mut Vec::new())
}

fn materialize_at(
    value: &Value,
    lookup: &dyn RefLookup,
    path: &mut Vec<String>,
) -> Result<Value, ExpressionError> {
    match value {
        Value::Object(object) => {
            if object.len() == 1 && object.keys().all(|key| EXPRESSION_KEYS.contains(&key.as_str())) {
                let expression: Expression =
                    serde_json::from_value(value.clone()).map_err(|error| ExpressionError::Invalid {
                        path: render_path(path),
                        reason: error.to_string(),
                    })?;
                return evaluate(&expression, lookup);
            }
            let mut out = serde_json::Map::new();
            for (key, child) in object {
                path.push(key.clone());
                let materialized = materialize_at(child, lookup, path);
                path.pop();
                out.insert(key.clone(), materialized?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                path.push(index.to_string());
                let materialized = materialize_at(item, lookup, path);
                path.pop();
                out.push(materialized?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

/// Walks a dotted path (`a.b.0.c`); numeric segments index into arrays.
pub fn select_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|segment| !segment.is_empty()) {
        current = match current {
            Value::Object(object) => object.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn expect_bool(op: &'static str, value: Value) -> Result<bool, ExpressionError> {
    match value {
        Value::Bool(flag) => Ok(flag),
        other => Err(ExpressionError::TypeMismatch {
            op,
            expected: "bool",
            actual: type_name(&other).to_string(),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn render_path(path: &[String]) -> String {
    if path.is_empty() {
        return "$".to_string();
    }
    format!("$.{}", path.join("."))
}

#[cfg(test)]
#[path = "expression_test.rs"]
mod tests;
