//! TLS client configuration
//!
//! Trust roots come from a PEM file of certificate authorities when one is
//! given, otherwise from the bundled Mozilla roots. Insecure mode skips server
//! certificate verification entirely and must be asked for explicitly.

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use sockloop_core::{Error, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Build a rustls client configuration.
///
/// With `allow_insecure` set, `ca_file` is ignored and any certificate the
/// server presents is accepted.
pub fn client_config(ca_file: Option<&Path>, allow_insecure: bool) -> Result<Arc<ClientConfig>> {
    let builder = ClientConfig::builder().with_safe_defaults();

    if allow_insecure {
        warn!("TLS certificate verification disabled");
        let config = builder
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth();
        return Ok(Arc::new(config));
    }

    let roots = match ca_file {
        Some(path) => load_ca_file(path)?,
        None => bundled_roots(),
    };

    let config = builder
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Trust store holding the bundled Mozilla roots
pub fn bundled_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));
    roots
}

/// Trust store holding the certificates of a PEM file.
///
/// Fails when the file cannot be read or holds no usable certificate.
pub fn load_ca_file(path: &Path) -> Result<RootCertStore> {
    let file = File::open(path)
        .map_err(|e| Error::Tls(format!("cannot open CA file {}: {}", path.display(), e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .map_err(|e| Error::Tls(format!("cannot read CA file {}: {}", path.display(), e)))?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(&certs);
    if ignored > 0 {
        warn!(path = %path.display(), ignored, "unparsable certificates skipped");
    }
    if added == 0 {
        return Err(Error::Tls(format!(
            "no usable certificates in {}",
            path.display()
        )));
    }

    debug!(path = %path.display(), added, "CA file loaded");
    Ok(roots)
}

struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}
