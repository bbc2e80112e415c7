//! BuildTemplate and ClusterBuildTemplate resources
//!
//! Both kinds share one spec shape; only the scope differs. Templates carry
//! no status, so the whole document participates in admission.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::build::{validate_steps, BuildStep};
use crate::webhook::patch::PatchList;
use crate::{Error, Result};

/// A namespaced, reusable set of build steps with parameter placeholders
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BuildTemplate {
    /// API version of this resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind tag, always "BuildTemplate"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// The template's steps and parameters
    pub spec: BuildTemplateSpec,
}

/// The cluster-scoped counterpart of [`BuildTemplate`]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ClusterBuildTemplate {
    /// API version of this resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind tag, always "ClusterBuildTemplate"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// The template's steps and parameters
    pub spec: BuildTemplateSpec,
}

/// Spec shared by namespaced and cluster-scoped templates
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BuildTemplateSpec {
    /// Spec version counter, maintained by the admission webhook
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,

    /// Parameters a Build may bind when instantiating this template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<ParameterSpec>>,

    /// The steps a Build instantiated from this template runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<BuildStep>>,
}

/// A substitutable parameter declared by a template
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ParameterSpec {
    /// Parameter name referenced as `${NAME}` in step fields
    pub name: String,

    /// Human-readable description of the parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Value used when a Build does not bind this parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

fn validate_template_spec(spec: &BuildTemplateSpec) -> Result<()> {
    let steps = spec.steps.as_deref().unwrap_or(&[]);
    if steps.is_empty() {
        return Err(Error::validation("template must declare at least one step"));
    }
    validate_steps(steps)?;

    let mut seen = std::collections::HashSet::new();
    for parameter in spec.parameters.as_deref().unwrap_or(&[]) {
        if !seen.insert(parameter.name.as_str()) {
            return Err(Error::validation(format!(
                "duplicate template parameter {:?}",
                parameter.name
            )));
        }
    }
    Ok(())
}

/// Validate a BuildTemplate document
pub fn validate_build_template(
    _patches: &mut PatchList,
    _old: Option<&Value>,
    new: &Value,
) -> Result<()> {
    let template: BuildTemplate = serde_json::from_value(new.clone())
        .map_err(|e| Error::validation(format!("cannot interpret build template: {e}")))?;
    validate_template_spec(&template.spec)
}

/// Validate a ClusterBuildTemplate document
pub fn validate_cluster_build_template(
    _patches: &mut PatchList,
    _old: Option<&Value>,
    new: &Value,
) -> Result<()> {
    let template: ClusterBuildTemplate = serde_json::from_value(new.clone())
        .map_err(|e| Error::validation(format!("cannot interpret cluster build template: {e}")))?;
    validate_template_spec(&template.spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(spec: Value) -> Value {
        json!({
            "apiVersion": "forge.dev/v1alpha1",
            "kind": "BuildTemplate",
            "metadata": {"name": "go-build", "namespace": "default"},
            "spec": spec,
        })
    }

    #[test]
    fn template_with_steps_and_parameters_is_valid() {
        let mut patches = PatchList::new();
        let new = doc(json!({
            "parameters": [
                {"name": "IMAGE", "description": "target image"},
                {"name": "TAG", "default": "latest"},
            ],
            "steps": [{"name": "build", "image": "gcr.io/kaniko/executor"}],
        }));
        assert!(validate_build_template(&mut patches, None, &new).is_ok());
    }

    #[test]
    fn template_without_steps_is_rejected() {
        let mut patches = PatchList::new();
        let err = validate_build_template(&mut patches, None, &doc(json!({}))).unwrap_err();
        assert_eq!(err.to_string(), "template must declare at least one step");
    }

    #[test]
    fn duplicate_parameter_names_are_rejected() {
        let mut patches = PatchList::new();
        let new = doc(json!({
            "parameters": [{"name": "IMAGE"}, {"name": "IMAGE"}],
            "steps": [{"image": "busybox"}],
        }));
        let err = validate_build_template(&mut patches, None, &new).unwrap_err();
        assert!(err.to_string().contains("duplicate template parameter"));
    }

    #[test]
    fn template_step_without_image_is_rejected() {
        let mut patches = PatchList::new();
        let new = doc(json!({"steps": [{"name": "build"}]}));
        let err = validate_build_template(&mut patches, None, &new).unwrap_err();
        assert!(err.to_string().contains("must specify an image"));
    }

    #[test]
    fn cluster_template_shares_the_same_rules() {
        let mut patches = PatchList::new();
        let new = json!({
            "apiVersion": "forge.dev/v1alpha1",
            "kind": "ClusterBuildTemplate",
            "metadata": {"name": "go-build"},
            "spec": {"steps": [{"image": "busybox"}]},
        });
        assert!(validate_cluster_build_template(&mut patches, None, &new).is_ok());
    }

    #[test]
    fn status_field_fails_strict_decode() {
        let new = doc(json!({"steps": [{"image": "busybox"}]}));
        let mut with_status = new.clone();
        with_status["status"] = json!({});
        assert!(serde_json::from_value::<BuildTemplate>(with_status).is_err());
        assert!(serde_json::from_value::<BuildTemplate>(new).is_ok());
    }
}
