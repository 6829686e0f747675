//! Stage inputs with strictness enforcement.

use crate::errors::UndeclaredDependencyError;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// What a stage's work receives: the run inputs plus upstream payloads.
///
/// Only declared dependencies are readable; asking for any other stage is an
/// [`UndeclaredDependencyError`].
#[derive(Debug, Clone)]
pub struct StageInputs {
    run_id: String,
    stage_name: String,
    params: Arc<BTreeMap<String, String>>,
    upstream: HashMap<String, serde_json::Value>,
    declared_dependencies: HashSet<String>,
}

impl StageInputs {
    /// Creates new stage inputs.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        stage_name: impl Into<String>,
        params: Arc<BTreeMap<String, String>>,
        upstream: HashMap<String, serde_json::Value>,
        declared_dependencies: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            stage_name: stage_name.into(),
            params,
            upstream,
            declared_dependencies: declared_dependencies.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates inputs for a stage without dependencies.
    #[must_use]
    pub fn root(
        run_id: impl Into<String>,
        stage_name: impl Into<String>,
        params: BTreeMap<String, String>,
    ) -> Self {
        Self::new(
            run_id,
            stage_name,
            Arc::new(params),
            HashMap::new(),
            Vec::<String>::new(),
        )
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Returns the name of the stage receiving these inputs.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Returns a run input parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Returns all run input parameters.
    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Gets the payload of an upstream stage.
    ///
    /// # Errors
    ///
    /// Returns `UndeclaredDependencyError` if the stage is not a declared
    /// dependency.
    pub fn upstream(&self, stage: &str) -> Result<Option<&serde_json::Value>, UndeclaredDependencyError> {
        if !self.declared_dependencies.contains(stage) {
            return Err(UndeclaredDependencyError::new(&self.stage_name, stage));
        }
        Ok(self.upstream.get(stage))
    }

    /// Gets a field of an upstream payload object.
    ///
    /// # Errors
    ///
    /// Returns `UndeclaredDependencyError` if the stage is not a declared
    /// dependency.
    pub fn upstream_value(
        &self,
        stage: &str,
        key: &str,
    ) -> Result<Option<&serde_json::Value>, UndeclaredDependencyError> {
        Ok(self.upstream(stage)?.and_then(|payload| payload.get(key)))
    }

    /// Returns the names of upstream stages with available payloads.
    #[must_use]
    pub fn upstream_stages(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.upstream.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs() -> StageInputs {
        let mut params = BTreeMap::new();
        params.insert("product".to_string(), "course".to_string());
        let mut upstream = HashMap::new();
        upstream.insert("research".to_string(), json!({"sources": 3}));

        StageInputs::new("r1", "report", Arc::new(params), upstream, ["research"])
    }

    #[test]
    fn test_params() {
        let inputs = inputs();
        assert_eq!(inputs.run_id(), "r1");
        assert_eq!(inputs.stage_name(), "report");
        assert_eq!(inputs.param("product"), Some("course"));
        assert_eq!(inputs.param("missing"), None);
    }

    #[test]
    fn test_declared_upstream() {
        let inputs = inputs();
        assert_eq!(inputs.upstream("research").unwrap(), Some(&json!({"sources": 3})));
        assert_eq!(inputs.upstream_value("research", "sources").unwrap(), Some(&json!(3)));
        assert_eq!(inputs.upstream_stages(), vec!["research"]);
    }

    #[test]
    fn test_undeclared_upstream_is_rejected() {
        let inputs = inputs();
        let err = inputs.upstream("drivers").unwrap_err();
        assert_eq!(err.stage, "report");
        assert_eq!(err.key, "drivers");
    }

    #[test]
    fn test_root_inputs_have_no_upstream() {
        let inputs = StageInputs::root("r1", "research", BTreeMap::new());
        assert!(inputs.upstream_stages().is_empty());
        assert!(inputs.upstream("anything").is_err());
    }
}
