//! Project collaborator trait.

use std::collections::HashMap;

/// A hosted project, as seen by an SCM backend.
///
/// The hosting application owns the real project model; backends only
/// need a URL-safe short identifier to locate the repository and a
/// read-only configuration lookup scoped to the project.
pub trait Project {
    /// The short, URL-safe identifier of the project.
    fn shortname(&self) -> &str;

    /// Looks up a per-project configuration value.
    fn config_value(&self, key: &str) -> Option<String>;
}

/// A [`Project`] backed by an in-memory key/value map.
///
/// Useful for tests and for embedders without a configuration store.
#[derive(Debug, Clone, Default)]
pub struct StaticProject {
    shortname: String,
    values: HashMap<String, String>,
}

impl StaticProject {
    /// Creates a project with the given shortname and no configuration.
    pub fn new(shortname: impl Into<String>) -> Self {
        Self {
            shortname: shortname.into(),
            values: HashMap::new(),
        }
    }

    /// Sets a configuration value, returning the project for chaining.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl Project for StaticProject {
    fn shortname(&self) -> &str {
        &self.shortname
    }

    fn config_value(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_project_lookup() {
        let project = StaticProject::new("hello").with_value("master_branch", "com.example.hello");
        assert_eq!(project.shortname(), "hello");
        assert_eq!(
            project.config_value("master_branch").as_deref(),
            Some("com.example.hello")
        );
        assert_eq!(project.config_value("missing"), None);
    }
}
