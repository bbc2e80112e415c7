//! Forge resource types served by the admission webhook
//!
//! Every spec struct uses `deny_unknown_fields`: a caller submitting a field
//! the schema does not know about gets a decode denial instead of silently
//! losing that field when the object is stored.

pub mod build;
pub mod template;

pub use build::{Build, BuildSpec, BuildStep};
pub use template::{BuildTemplate, BuildTemplateSpec, ClusterBuildTemplate, ParameterSpec};

use crate::webhook::registry::{Handler, HandlerRegistry};

/// API group of all Forge resources
pub const GROUP: &str = "forge.dev";

/// API version served by this webhook
pub const VERSION: &str = "v1alpha1";

/// Plural resource names routed to the webhook
pub const RESOURCES: [&str; 3] = ["builds", "buildtemplates", "clusterbuildtemplates"];

/// Build the handler table for every kind this webhook admits
///
/// Constructed once at startup, then shared read-only across concurrent
/// requests. Defaulting for these kinds is currently structural (handled by
/// the generation policy), so only validators are registered.
pub fn registry() -> HandlerRegistry {
    HandlerRegistry::builder()
        .register("Build", Handler::new::<Build>(build::validate_build))
        .register(
            "BuildTemplate",
            Handler::new::<BuildTemplate>(template::validate_build_template),
        )
        .register(
            "ClusterBuildTemplate",
            Handler::new::<ClusterBuildTemplate>(template::validate_cluster_build_template),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_all_resources() {
        let registry = registry();
        for kind in ["Build", "BuildTemplate", "ClusterBuildTemplate"] {
            assert!(registry.get(kind).is_some(), "missing handler for {kind}");
        }
        assert!(registry.get("Widget").is_none());
    }
}
