//! Mutating admission webhook for Forge resources
//!
//! The controller bootstraps its TLS identity from a secret, serves
//! admission reviews over HTTPS, and registers itself with the API server
//! once the listener is up. Shutdown deregisters and stops the listener.

pub mod admission;
pub mod certs;
pub mod generation;
pub mod patch;
pub mod registration;
pub mod registry;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use kube::Client;
use tracing::{error, info, warn};

use crate::config::WebhookOptions;
use crate::Result;
use registry::HandlerRegistry;

/// The admission webhook controller
pub struct AdmissionController {
    client: Client,
    options: WebhookOptions,
    registry: Arc<HandlerRegistry>,
}

/// Build the admission router around a shared handler registry
pub fn router(registry: Arc<HandlerRegistry>) -> Router {
    Router::new()
        .route(registration::ADMIT_PATH, post(admission::admit_handler))
        .with_state(registry)
}

impl AdmissionController {
    /// Create a controller serving the given handler registry
    pub fn new(client: Client, options: WebhookOptions, registry: HandlerRegistry) -> Self {
        Self {
            client,
            options,
            registry: Arc::new(registry),
        }
    }

    /// Run until `shutdown` resolves
    ///
    /// Startup order matters: certificates first, then the listener, then
    /// registration after the configured delay so the API server never
    /// routes to a socket that is not accepting yet. Shutdown during the
    /// delay skips registration entirely.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send) -> Result<()> {
        tokio::pin!(shutdown);

        let bundle = certs::ensure_certificates(self.client.clone(), &self.options).await?;
        let client_ca = certs::api_server_client_ca(self.client.clone()).await?;
        let tls = certs::make_tls_config(
            &bundle,
            client_ca.as_deref(),
            self.options.require_client_certs,
        )?;
        let tls_config = RustlsConfig::from_config(Arc::new(tls));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.options.port));
        let app = router(self.registry.clone());
        let server = tokio::spawn(async move {
            if let Err(e) = axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
            {
                error!(error = %e, "admission server failed");
            }
        });
        info!(%addr, "admission server listening");

        let delay = self.options.registration_delay;
        if !delay.is_zero() {
            info!(?delay, "waiting before registering webhook configuration");
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                registration::reconcile(self.client.clone(), &self.options, &bundle.ca_cert_pem)
                    .await?;
            }
            _ = &mut shutdown => {
                info!("shutdown before registration, exiting");
                server.abort();
                return Ok(());
            }
        }

        shutdown.await;
        info!("shutting down");

        if let Err(e) = registration::deregister(self.client.clone(), &self.options).await {
            warn!(error = %e, "failed to deregister webhook configuration");
        }
        server.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    fn post(body: String, content_type: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(registration::ADMIT_PATH)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn router_builds_with_the_default_registry() {
        let _router = router(Arc::new(crd::registry()));
    }

    #[tokio::test]
    async fn non_json_content_type_is_unsupported_media_type() {
        let app = router(Arc::new(crd::registry()));
        let response = app
            .oneshot(post("hello".to_string(), "text/plain"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn malformed_json_body_is_bad_request() {
        let app = router(Arc::new(crd::registry()));
        let response = app
            .oneshot(post("{not json".to_string(), "application/json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn valid_json_that_is_not_a_review_is_bad_request() {
        let app = router(Arc::new(crd::registry()));
        let response = app
            .oneshot(post(
                json!({"request": {"uid": 42}}).to_string(),
                "application/json",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_text(response).await;
        assert!(body.contains("cannot decode admission review"), "{body}");
    }

    #[tokio::test]
    async fn well_formed_review_is_answered_with_a_review() {
        let app = router(Arc::new(crd::registry()));
        let envelope = json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "forge.dev", "version": "v1alpha1", "kind": "Build"},
                "resource": {"group": "forge.dev", "version": "v1alpha1", "resource": "builds"},
                "name": "demo",
                "namespace": "default",
                "operation": "CREATE",
                "userInfo": {"username": "system:serviceaccount:default:ci"},
                "object": {
                    "apiVersion": "forge.dev/v1alpha1",
                    "kind": "Build",
                    "metadata": {"name": "demo", "namespace": "default"},
                    "spec": {"steps": [{"name": "compile", "image": "golang:1.22"}]},
                },
                "oldObject": null,
                "dryRun": false,
            },
        });
        let response = app
            .oneshot(post(envelope.to_string(), "application/json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("705ab4f5-6393-11e8-b7cc-42010a800002"));
        assert!(body.contains("\"allowed\":true"));
    }
}
