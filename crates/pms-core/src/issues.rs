use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Location of an issue inside a plan or config document, rendered as `$.nodes[2].identifier`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssuePath(Vec<PathSegment>);

impl IssuePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.0.push(PathSegment::Key(key.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathSegment::Index(index));
        self
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn from_json_pointer(pointer: &str) -> Self {
        let mut path = Self::root();
        for raw in pointer.trim_start_matches('/').split('/') {
            if raw.is_empty() {
                continue;
            }
            let decoded = raw.replace("~1", "/").replace("~0", "~");
            path = match decoded.parse::<usize>() {
                Ok(index) => path.index(index),
                Err(_) => path.key(decoded),
            };
        }
        path
    }
}

impl Display for IssuePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("$")?;
        for segment in &self.0 {
            match segment {
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanIssue {
    pub kind: String,
    pub severity: IssueSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub path: IssuePath,
    pub message: String,
}

impl PlanIssue {
    pub fn error(kind: impl Into<String>, path: IssuePath, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            severity: IssueSeverity::Error,
            node_id: None,
            path,
            message: message.into(),
        }
    }

    pub fn warning(kind: impl Into<String>, path: IssuePath, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            ..Self::error(kind, path, message)
        }
    }

    pub fn for_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == IssueSeverity::Error
    }

    pub fn sort_stable(issues: &mut [Self]) {
        issues.sort_by(|left, right| {
            (
                left.severity,
                &left.kind,
                &left.node_id,
                &left.path,
                &left.message,
            )
                .cmp(&(
                    right.severity,
                    &right.kind,
                    &right.node_id,
                    &right.path,
                    &right.message,
                ))
        });
    }
}

impl Display for PlanIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            IssueSeverity::Error => "error",
            IssueSeverity::Warning => "warning",
        };
        write!(f, "{severity} [{}] {}: {}", self.kind, self.path, self.message)
    }
}

#[cfg(test)]
#[path = "issues_test.rs"]
mod tests;
