use super::output::{Resolver, ResolverError};
use pms_core::{select_path, Ambiance, ExpressionError, RefLookup};
use serde_json::Value;

/// Reference lookup for expressions evaluated on behalf of one node.
///
/// Roots: `inputs.*` (execution inputs), `output.<name>` (sweeping outputs),
/// `outcome.<name>` (step outcomes) and `ambiance.fqn` / `ambiance.identifier`.
pub struct ExecutionLookup<'a> {
    ambiance: &'a Ambiance,
    inputs: &'a Value,
    sweeping_outputs: &'a dyn Resolver,
    outcomes: &'a dyn Resolver,
}

impl<'a> ExecutionLookup<'a> {
    pub fn new(
        ambiance: &'a Ambiance,
        inputs: &'a Value,
        sweeping_outputs: &'a dyn Resolver,
        outcomes: &'a dyn Resolver,
    ) -> Self {
        Self {
            ambiance,
            inputs,
            sweeping_outputs,
            outcomes,
        }
    }

    fn from_resolver(
        &self,
        resolver: &dyn Resolver,
        full_path: &str,
        rest: &str,
    ) -> Result<Option<Value>, ExpressionError> {
        let (name, path) = rest.split_once('.').unwrap_or((rest, ""));
        let value = resolver
            .find(self.ambiance, name)
            .map_err(|error: ResolverError| ExpressionError::Lookup {
                path: full_path.to_string(),
                reason: error.to_string(),
            })?;
        Ok(value.and_then(|value| select_path(&value, path).cloned()))
    }
}

impl RefLookup for ExecutionLookup<'_> {
    fn lookup(&self, path: &str) -> Result<Option<Value>, ExpressionError> {
        let (root, rest) = path.split_once('.').unwrap_or((path, ""));
        match root {
            "inputs" => Ok(select_path(self.inputs, rest).cloned()),
            "output" => self.from_resolver(self.sweeping_outputs, path, rest),
            "outcome" => self.from_resolver(self.outcomes, path, rest),
            "ambiance" => Ok(match rest {
                "fqn" => Some(Value::String(self.ambiance.fqn())),
                "identifier" => self
                    .ambiance
                    .step_identifier()
                    .map(|identifier| Value::String(identifier.to_string())),
                "plan_execution_id" => Some(Value::String(self.ambiance.plan_execution_id.clone())),
                _ => None,
            }),
            _ => Err(ExpressionError::Invalid {
                path: path.to_string(),
                reason: format!("unknown reference root `{root}`"),
            }),
        }
    }
}

#[cfg(test)]
#[path = "lookup_test.rs"]
mod tests;
