//! Configuration surface consumed by the webhook
//!
//! Values only - flag and environment parsing lives in `main`.

use std::time::Duration;

use crate::DEFAULT_WEBHOOK_PORT;

/// Options controlling the admission webhook server and its registration
#[derive(Debug, Clone)]
pub struct WebhookOptions {
    /// Port the HTTPS listener binds to
    pub port: u16,
    /// Namespace holding the certificate secret, service, and deployment
    pub namespace: String,
    /// Name of the secret storing the webhook's TLS material
    pub secret_name: String,
    /// Name of the MutatingWebhookConfiguration object (also the webhook entry name)
    pub webhook_name: String,
    /// Name of the service the API server routes admission requests to
    pub service_name: String,
    /// Name of the deployment running this webhook, used as the registration owner
    pub deployment_name: String,
    /// How long to wait after startup before registering with the API server
    ///
    /// Gives the TLS listener time to become reachable before traffic is
    /// routed to it. Cancelled by shutdown.
    pub registration_delay: Duration,
    /// Require and verify client certificates against the API server CA
    ///
    /// Defaults off: some hosted control planes never send a client
    /// certificate, so mutual TLS is opt-in per environment.
    pub require_client_certs: bool,
}

impl Default for WebhookOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_WEBHOOK_PORT,
            namespace: "forge-system".to_string(),
            secret_name: "forge-webhook-certs".to_string(),
            webhook_name: "webhook.forge.dev".to_string(),
            service_name: "forge-webhook".to_string(),
            deployment_name: "forge-webhook".to_string(),
            registration_delay: Duration::ZERO,
            require_client_certs: false,
        }
    }
}

impl WebhookOptions {
    /// DNS names the server certificate must be valid for
    ///
    /// These are the names the API server uses when calling the webhook
    /// service in-cluster.
    pub fn service_dns_names(&self) -> Vec<String> {
        vec![
            format!("{}.{}.svc", self.service_name, self.namespace),
            format!("{}.{}.svc.cluster.local", self.service_name, self.namespace),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let opts = WebhookOptions::default();
        assert_eq!(opts.port, DEFAULT_WEBHOOK_PORT);
        assert_eq!(opts.namespace, "forge-system");
        assert!(!opts.require_client_certs);
        assert!(opts.registration_delay.is_zero());
    }

    #[test]
    fn service_dns_names_cover_short_and_full_forms() {
        let opts = WebhookOptions::default();
        let names = opts.service_dns_names();
        assert!(names.contains(&"forge-webhook.forge-system.svc".to_string()));
        assert!(names.contains(&"forge-webhook.forge-system.svc.cluster.local".to_string()));
    }
}
