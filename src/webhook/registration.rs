//! Idempotent registration of the MutatingWebhookConfiguration
//!
//! The webhook registers itself: it builds the desired configuration from
//! its options and CA bundle, owner-references it to its own deployment so
//! garbage collection removes it with the deployment, and converges the
//! cluster state toward it without fighting other replicas.

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    WebhookClientConfig,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use tracing::info;

use crate::config::WebhookOptions;
use crate::crd::{GROUP, RESOURCES, VERSION};
use crate::{Error, Result};

/// URL path the API server posts admission reviews to
pub const ADMIT_PATH: &str = "/admit";

/// What [`registration_action`] decided about the existing configuration
#[derive(Debug, PartialEq, Eq)]
pub enum RegistrationAction {
    /// Existing webhooks differ from desired; replace them at this version
    Update {
        /// Resource version the replacement must carry
        resource_version: Option<String>,
    },
    /// Existing configuration already matches
    Unchanged,
}

/// Decide whether an existing configuration needs updating
///
/// Only the webhook list is compared. Metadata the cluster maintains
/// (uid, managed fields, resource version) never forces a write, so the
/// steady state does not generate update traffic.
pub fn registration_action(
    desired: &MutatingWebhookConfiguration,
    existing: &MutatingWebhookConfiguration,
) -> RegistrationAction {
    if existing.webhooks == desired.webhooks {
        RegistrationAction::Unchanged
    } else {
        RegistrationAction::Update {
            resource_version: existing.metadata.resource_version.clone(),
        }
    }
}

/// Build the configuration this webhook wants registered
pub fn desired_configuration(
    options: &WebhookOptions,
    ca_bundle: &[u8],
    owner: Option<OwnerReference>,
) -> MutatingWebhookConfiguration {
    let rule = RuleWithOperations {
        api_groups: Some(vec![GROUP.to_string()]),
        api_versions: Some(vec![VERSION.to_string()]),
        resources: Some(RESOURCES.iter().map(|r| r.to_string()).collect()),
        operations: Some(vec!["CREATE".to_string(), "UPDATE".to_string()]),
        scope: Some("*".to_string()),
    };

    let webhook = MutatingWebhook {
        name: options.webhook_name.clone(),
        admission_review_versions: vec!["v1".to_string()],
        side_effects: "None".to_string(),
        failure_policy: Some("Fail".to_string()),
        rules: Some(vec![rule]),
        client_config: WebhookClientConfig {
            service: Some(ServiceReference {
                name: options.service_name.clone(),
                namespace: options.namespace.clone(),
                path: Some(ADMIT_PATH.to_string()),
                port: Some(443),
            }),
            ca_bundle: Some(ByteString(ca_bundle.to_vec())),
            url: None,
        },
        ..Default::default()
    };

    MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(options.webhook_name.clone()),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        webhooks: Some(vec![webhook]),
    }
}

/// Build an owner reference pointing at the webhook's own deployment
pub fn owner_reference(deployment: &Deployment) -> Result<OwnerReference> {
    let name = deployment
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::registration("owner deployment has no name"))?;
    let uid = deployment
        .metadata
        .uid
        .clone()
        .ok_or_else(|| Error::registration("owner deployment has no uid"))?;
    Ok(OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: "Deployment".to_string(),
        name,
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Converge the cluster's configuration to the desired one
///
/// Create first; on conflict, fetch what won and update it only if the
/// webhook list actually differs, carrying the winner's resource version.
pub async fn reconcile(
    client: Client,
    options: &WebhookOptions,
    ca_bundle: &[u8],
) -> Result<()> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &options.namespace);
    let owner = match deployments.get_opt(&options.deployment_name).await? {
        Some(deployment) => Some(owner_reference(&deployment)?),
        None => {
            info!(
                deployment = %options.deployment_name,
                "owner deployment not found, registering without an owner reference"
            );
            None
        }
    };

    let desired = desired_configuration(options, ca_bundle, owner);
    let configs: Api<MutatingWebhookConfiguration> = Api::all(client);

    match configs.create(&PostParams::default(), &desired).await {
        Ok(_) => {
            info!(webhook = %options.webhook_name, "webhook configuration created");
            return Ok(());
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {}
        Err(e) => return Err(e.into()),
    }

    let existing = configs.get(&options.webhook_name).await?;
    match registration_action(&desired, &existing) {
        RegistrationAction::Unchanged => {
            info!(webhook = %options.webhook_name, "webhook configuration up to date");
            Ok(())
        }
        RegistrationAction::Update { resource_version } => {
            let mut replacement = desired;
            replacement.metadata.resource_version = resource_version;
            configs
                .replace(&options.webhook_name, &PostParams::default(), &replacement)
                .await?;
            info!(webhook = %options.webhook_name, "webhook configuration updated");
            Ok(())
        }
    }
}

/// Remove the webhook configuration on shutdown
///
/// Tolerates the configuration already being gone, whether deleted by hand
/// or garbage-collected with the deployment.
pub async fn deregister(client: Client, options: &WebhookOptions) -> Result<()> {
    let configs: Api<MutatingWebhookConfiguration> = Api::all(client);
    match configs
        .delete(&options.webhook_name, &DeleteParams::default())
        .await
    {
        Ok(_) => {
            info!(webhook = %options.webhook_name, "webhook configuration removed");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;

    fn deployment(name: Option<&str>, uid: Option<&str>) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: name.map(String::from),
                uid: uid.map(String::from),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn desired_configuration_matches_the_served_surface() {
        let options = WebhookOptions::default();
        let config = desired_configuration(&options, b"CA PEM", None);

        assert_eq!(config.name_any(), "webhook.forge.dev");
        let webhooks = config.webhooks.as_ref().unwrap();
        assert_eq!(webhooks.len(), 1);

        let webhook = &webhooks[0];
        assert_eq!(webhook.name, "webhook.forge.dev");
        assert_eq!(webhook.admission_review_versions, vec!["v1"]);
        assert_eq!(webhook.side_effects, "None");
        assert_eq!(webhook.failure_policy.as_deref(), Some("Fail"));

        let rule = &webhook.rules.as_ref().unwrap()[0];
        assert_eq!(rule.api_groups.as_ref().unwrap(), &vec!["forge.dev"]);
        assert_eq!(
            rule.resources.as_ref().unwrap(),
            &vec!["builds", "buildtemplates", "clusterbuildtemplates"]
        );
        assert_eq!(rule.operations.as_ref().unwrap(), &vec!["CREATE", "UPDATE"]);

        let service = webhook.client_config.service.as_ref().unwrap();
        assert_eq!(service.name, "forge-webhook");
        assert_eq!(service.namespace, "forge-system");
        assert_eq!(service.path.as_deref(), Some(ADMIT_PATH));
        assert_eq!(
            webhook.client_config.ca_bundle,
            Some(ByteString(b"CA PEM".to_vec()))
        );
    }

    /// Story: reconciling against our own previous registration is a no-op
    #[test]
    fn story_reconcile_is_idempotent() {
        let options = WebhookOptions::default();
        let desired = desired_configuration(&options, b"CA PEM", None);

        // The cluster decorates the stored object with metadata we ignore
        let mut existing = desired.clone();
        existing.metadata.uid = Some("abc-123".to_string());
        existing.metadata.resource_version = Some("41".to_string());

        assert_eq!(
            registration_action(&desired, &existing),
            RegistrationAction::Unchanged
        );
    }

    /// Story: a drifted configuration is replaced at the observed version
    #[test]
    fn story_drifted_configuration_is_updated() {
        let options = WebhookOptions::default();
        let desired = desired_configuration(&options, b"NEW CA", None);

        let mut existing = desired_configuration(&options, b"OLD CA", None);
        existing.metadata.resource_version = Some("41".to_string());

        assert_eq!(
            registration_action(&desired, &existing),
            RegistrationAction::Update {
                resource_version: Some("41".to_string()),
            }
        );
    }

    #[test]
    fn owner_reference_points_at_the_deployment() {
        let owner = owner_reference(&deployment(Some("forge-webhook"), Some("uid-1"))).unwrap();
        assert_eq!(owner.api_version, "apps/v1");
        assert_eq!(owner.kind, "Deployment");
        assert_eq!(owner.name, "forge-webhook");
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.block_owner_deletion, Some(true));
    }

    #[test]
    fn owner_reference_requires_name_and_uid() {
        let err = owner_reference(&deployment(None, Some("uid-1"))).unwrap_err();
        assert!(err.to_string().contains("no name"));

        let err = owner_reference(&deployment(Some("forge-webhook"), None)).unwrap_err();
        assert!(err.to_string().contains("no uid"));
    }

    #[test]
    fn owner_reference_lands_in_the_configuration_metadata() {
        let options = WebhookOptions::default();
        let owner = owner_reference(&deployment(Some("forge-webhook"), Some("uid-1"))).unwrap();
        let config = desired_configuration(&options, b"CA", Some(owner));

        let refs = config.metadata.owner_references.as_ref().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].uid, "uid-1");
    }
}
