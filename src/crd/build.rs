//! The Build resource: a single execution of a build

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::webhook::patch::PatchList;
use crate::{Error, Result};

/// A Build runs an ordered set of steps to completion, either spelled out
/// inline or instantiated from a template.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Build {
    /// API version of this resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind tag, always "Build"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// The desired state of the build
    pub spec: BuildSpec,

    /// Observed state, written by the build controller only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BuildStatus>,
}

/// Desired state of a Build
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BuildSpec {
    /// Spec version counter, maintained by the admission webhook
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,

    /// Where the inputs to the build come from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceSpec>,

    /// Inline build steps; mutually exclusive with `template`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<BuildStep>>,

    /// Template instantiation; mutually exclusive with `steps`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateInstantiationSpec>,

    /// Volumes shared across build steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeSpec>>,

    /// Service account the build pod runs as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Maximum duration the build may run, e.g. "1h"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// One container execution within a build
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BuildStep {
    /// Step name, unique within the build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Container image the step runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Arguments passed to the step's entrypoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    /// Environment variables set in the step container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVar>>,

    /// Working directory for the step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

/// A name/value environment variable pair
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Variable value
    #[serde(default)]
    pub value: String,
}

/// Input source for a build
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SourceSpec {
    /// Git checkout source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSourceSpec>,

    /// Path within the source to use as the build context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
}

/// A git repository to fetch build inputs from
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct GitSourceSpec {
    /// Repository URL
    pub url: String,
    /// Branch, tag, or commit to check out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// Reference to a BuildTemplate or ClusterBuildTemplate plus its arguments
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TemplateInstantiationSpec {
    /// Name of the referenced template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Kind of the referenced template; defaults to BuildTemplate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TemplateKind>,

    /// Values bound to the template's parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<ArgumentSpec>>,
}

/// Kinds a template instantiation may reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum TemplateKind {
    /// Namespaced template
    #[default]
    BuildTemplate,
    /// Cluster-scoped template
    ClusterBuildTemplate,
}

/// A name/value argument binding for a template parameter
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ArgumentSpec {
    /// Parameter name the value binds to
    pub name: String,
    /// Bound value
    pub value: String,
}

/// A named volume available to build steps
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Volume name referenced by steps
    pub name: String,

    /// Ephemeral scratch volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirSpec>,

    /// ConfigMap-backed volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapVolumeSpec>,
}

/// Empty scratch volume source
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EmptyDirSpec {}

/// ConfigMap volume source
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ConfigMapVolumeSpec {
    /// Name of the config map to mount
    pub name: String,
}

/// Observed state of a Build
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BuildStatus {
    /// When the build started executing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    /// When the build finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,

    /// Latest available observations of the build's state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<BuildCondition>>,
}

/// One observation of the build's state
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BuildCondition {
    /// Condition type, e.g. "Succeeded"
    #[serde(rename = "type")]
    pub type_: String,
    /// Condition status: "True", "False", or "Unknown"
    pub status: String,
    /// Machine-readable reason for the condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message for the condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn typed(doc: &Value) -> Result<Build> {
    serde_json::from_value(doc.clone())
        .map_err(|e| Error::validation(format!("cannot interpret build: {e}")))
}

/// Validate a Build document
///
/// A build must carry exactly one of inline `steps` or a `template`
/// reference, every step must name an image, and a template reference must
/// name a template.
pub fn validate_build(_patches: &mut PatchList, _old: Option<&Value>, new: &Value) -> Result<()> {
    let build = typed(new)?;
    match (&build.spec.steps, &build.spec.template) {
        (Some(_), Some(_)) => Err(Error::validation(
            "expected exactly one of steps or template, got both",
        )),
        (None, None) => Err(Error::validation(
            "expected exactly one of steps or template, got neither",
        )),
        (Some(steps), None) => validate_steps(steps),
        (None, Some(template)) => {
            if template.name.as_deref().unwrap_or("").is_empty() {
                return Err(Error::validation("the template name is required"));
            }
            validate_arguments(template.arguments.as_deref().unwrap_or(&[]))
        }
    }
}

/// Check that every step names an image and step names are unique
pub(crate) fn validate_steps(steps: &[BuildStep]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for (index, step) in steps.iter().enumerate() {
        if step.image.as_deref().unwrap_or("").is_empty() {
            let label = step.name.clone().unwrap_or_else(|| index.to_string());
            return Err(Error::validation(format!(
                "build step {label:?} must specify an image"
            )));
        }
        if let Some(name) = &step.name {
            if !seen.insert(name.clone()) {
                return Err(Error::validation(format!(
                    "duplicate step name {name:?}"
                )));
            }
        }
    }
    Ok(())
}

fn validate_arguments(arguments: &[ArgumentSpec]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for argument in arguments {
        if !seen.insert(argument.name.as_str()) {
            return Err(Error::validation(format!(
                "duplicate template argument {:?}",
                argument.name
            )));
        }
    }
    Ok(())
}
