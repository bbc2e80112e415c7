//! TLS identity bootstrap from a Kubernetes secret
//!
//! On first start the webhook mints its own CA and server certificate and
//! persists them in a secret. Every later start, and every replica racing
//! the first, reads the same secret so the CA bundle registered with the
//! API server keeps matching the serving certificate.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::PostParams;
use kube::{Api, Client};
use tracing::info;

use crate::config::WebhookOptions;
use crate::pki::CertificateAuthority;
use crate::{Error, Result};

/// Secret key holding the server's private key
pub const SECRET_SERVER_KEY: &str = "server-key.pem";
/// Secret key holding the server's certificate
pub const SECRET_SERVER_CERT: &str = "server-cert.pem";
/// Secret key holding the CA certificate registered with the API server
pub const SECRET_CA_CERT: &str = "ca-cert.pem";

/// ConfigMap publishing the CA the API server authenticates with
const API_SERVER_CA_CONFIGMAP: &str = "extension-apiserver-authentication";
const API_SERVER_CA_NAMESPACE: &str = "kube-system";
const API_SERVER_CA_KEY: &str = "requestheader-client-ca-file";

/// The webhook's TLS material, loaded from the certificate secret
#[derive(Debug)]
pub struct CertificateBundle {
    /// PEM server private key
    pub server_key_pem: Vec<u8>,
    /// PEM server certificate chain
    pub server_cert_pem: Vec<u8>,
    /// PEM CA certificate to hand to the API server
    pub ca_cert_pem: Vec<u8>,
}

/// Fetch the certificate secret, creating it on first start
///
/// Creation races between replicas resolve by conflict: the loser re-reads
/// the winner's secret so all replicas serve the same identity.
pub async fn ensure_certificates(
    client: Client,
    options: &WebhookOptions,
) -> Result<CertificateBundle> {
    let secrets: Api<Secret> = Api::namespaced(client, &options.namespace);

    if let Some(secret) = secrets.get_opt(&options.secret_name).await? {
        return bundle_from_secret(&secret);
    }

    info!(
        secret = %options.secret_name,
        namespace = %options.namespace,
        "certificate secret not found, generating a new identity"
    );
    let generated = generate_certificate_secret(options)?;
    match secrets.create(&PostParams::default(), &generated).await {
        Ok(created) => bundle_from_secret(&created),
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            info!("another replica created the certificate secret first");
            let existing = secrets.get(&options.secret_name).await?;
            bundle_from_secret(&existing)
        }
        Err(e) => Err(e.into()),
    }
}

/// Extract the TLS bundle from a secret, naming any missing field
pub fn bundle_from_secret(secret: &Secret) -> Result<CertificateBundle> {
    let data = secret.data.as_ref().ok_or_else(|| {
        Error::missing_credential("certificate secret has no data".to_string())
    })?;
    let field = |key: &str| -> Result<Vec<u8>> {
        data.get(key)
            .map(|ByteString(bytes)| bytes.clone())
            .ok_or_else(|| Error::missing_credential(format!("{key} missing from secret")))
    };
    Ok(CertificateBundle {
        server_key_pem: field(SECRET_SERVER_KEY)?,
        server_cert_pem: field(SECRET_SERVER_CERT)?,
        ca_cert_pem: field(SECRET_CA_CERT)?,
    })
}

/// Mint a fresh CA and server certificate and package them as a secret
fn generate_certificate_secret(options: &WebhookOptions) -> Result<Secret> {
    let ca = CertificateAuthority::new("Forge Webhook CA")?;
    let (server_cert_pem, server_key_pem) = ca.generate_server_cert(&options.service_dns_names())?;

    let mut data = BTreeMap::new();
    data.insert(
        SECRET_SERVER_KEY.to_string(),
        ByteString(server_key_pem.into_bytes()),
    );
    data.insert(
        SECRET_SERVER_CERT.to_string(),
        ByteString(server_cert_pem.into_bytes()),
    );
    data.insert(
        SECRET_CA_CERT.to_string(),
        ByteString(ca.ca_cert_pem().as_bytes().to_vec()),
    );

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(options.secret_name.clone()),
            namespace: Some(options.namespace.clone()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}

/// Read the CA certificate the API server presents as a TLS client
///
/// Published by the control plane in the `extension-apiserver-authentication`
/// config map. Absent on some hosted control planes, in which case client
/// certificate verification cannot be enabled.
pub async fn api_server_client_ca(client: Client) -> Result<Option<Vec<u8>>> {
    let config_maps: Api<ConfigMap> = Api::namespaced(client, API_SERVER_CA_NAMESPACE);
    let Some(cm) = config_maps.get_opt(API_SERVER_CA_CONFIGMAP).await? else {
        return Ok(None);
    };
    Ok(cm
        .data
        .as_ref()
        .and_then(|data| data.get(API_SERVER_CA_KEY))
        .map(|pem| pem.as_bytes().to_vec()))
}

/// Assemble the rustls server configuration
///
/// When `require_client_certs` is set, `client_ca_pem` must hold the CA that
/// signs the API server's client certificate; connections without a valid
/// client certificate are then rejected at the handshake.
pub fn make_tls_config(
    bundle: &CertificateBundle,
    client_ca_pem: Option<&[u8]>,
    require_client_certs: bool,
) -> Result<rustls::ServerConfig> {
    let certs = rustls_pemfile::certs(&mut bundle.server_cert_pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::tls(format!("cannot parse server certificate: {e}")))?;
    if certs.is_empty() {
        return Err(Error::tls("no certificate found in PEM data"));
    }
    let key = rustls_pemfile::private_key(&mut bundle.server_key_pem.as_slice())
        .map_err(|e| Error::tls(format!("cannot parse server key: {e}")))?
        .ok_or_else(|| Error::tls("no private key found in PEM data"))?;

    let builder = rustls::ServerConfig::builder();
    let config = if require_client_certs {
        let ca_pem = client_ca_pem
            .ok_or_else(|| Error::tls("client certificate verification requires a client CA"))?;
        let mut roots = rustls::RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut &ca_pem[..]) {
            let cert = cert.map_err(|e| Error::tls(format!("cannot parse client CA: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| Error::tls(format!("cannot add client CA root: {e}")))?;
        }
        let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| Error::tls(format!("cannot build client verifier: {e}")))?;
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    }
    .with_single_cert(certs, key)
    .map_err(|e| Error::tls(format!("invalid certificate chain or key: {e}")))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> WebhookOptions {
        WebhookOptions::default()
    }

    // rustls resolves its crypto provider process-wide; the second install
    // in a test binary is a no-op failure we ignore.
    fn install_crypto_provider() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }

    #[test]
    fn generated_secret_carries_all_three_keys() {
        let secret = generate_certificate_secret(&options()).unwrap();
        let data = secret.data.as_ref().unwrap();
        for key in [SECRET_SERVER_KEY, SECRET_SERVER_CERT, SECRET_CA_CERT] {
            assert!(data.contains_key(key), "missing {key}");
        }
        assert_eq!(secret.metadata.name.as_deref(), Some("forge-webhook-certs"));
    }

    #[test]
    fn bundle_extraction_names_the_missing_field() {
        let mut secret = generate_certificate_secret(&options()).unwrap();
        secret.data.as_mut().unwrap().remove(SECRET_SERVER_KEY);

        let err = bundle_from_secret(&secret).unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing credential: server-key.pem missing from secret"
        );
    }

    #[test]
    fn empty_secret_is_a_missing_credential() {
        let secret = Secret::default();
        let err = bundle_from_secret(&secret).unwrap_err();
        assert!(err.to_string().contains("missing credential"));
    }

    #[test]
    fn tls_config_without_client_auth() {
        install_crypto_provider();
        let secret = generate_certificate_secret(&options()).unwrap();
        let bundle = bundle_from_secret(&secret).unwrap();
        assert!(make_tls_config(&bundle, None, false).is_ok());
    }

    #[test]
    fn tls_config_with_client_auth_needs_a_ca() {
        install_crypto_provider();
        let secret = generate_certificate_secret(&options()).unwrap();
        let bundle = bundle_from_secret(&secret).unwrap();

        let err = make_tls_config(&bundle, None, true).unwrap_err();
        assert!(err.to_string().contains("requires a client CA"));

        // The webhook's own CA stands in for the API server CA here
        let ca_pem = bundle.ca_cert_pem.clone();
        assert!(make_tls_config(&bundle, Some(&ca_pem), true).is_ok());
    }

    #[test]
    fn garbage_pem_is_a_tls_error() {
        install_crypto_provider();
        let bundle = CertificateBundle {
            server_key_pem: b"not a key".to_vec(),
            server_cert_pem: b"not a cert".to_vec(),
            ca_cert_pem: Vec::new(),
        };
        let err = make_tls_config(&bundle, None, false).unwrap_err();
        assert!(err.to_string().starts_with("TLS configuration error"));
    }
}
