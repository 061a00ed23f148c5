//! TLS context construction from PEM material.
//!
//! Only PEM is supported; invalid material fails the start. The rustls
//! defaults already exclude everything below TLS 1.2.

use crate::error::ConfigError;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::io::BufReader;
use std::path::Path;

/// Where the client takes its trusted CA roots from.
#[derive(Clone, Debug, Default)]
pub enum CaSource {
    /// The bundled `webpki-roots` trust anchors.
    #[default]
    Default,
    /// A PEM bundle loaded from a file, added on top of the defaults.
    File(std::path::PathBuf),
    /// An in-memory PEM bundle, added on top of the defaults.
    Pem(Vec<u8>),
}

fn read_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| ConfigError::InvalidTlsMaterial(format!("certificate: {err}")))?;
    if certs.is_empty() {
        return Err(ConfigError::InvalidTlsMaterial(
            "no certificate found in PEM data".into(),
        ));
    }
    Ok(certs)
}

fn read_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, ConfigError> {
    rustls_pemfile::private_key(&mut BufReader::new(pem))
        .map_err(|err| ConfigError::InvalidTlsMaterial(format!("private key: {err}")))?
        .ok_or_else(|| ConfigError::InvalidTlsMaterial("no private key found in PEM data".into()))
}

/// Build a server-side TLS config from in-memory PEM blobs.
pub fn server_config(cert_pem: &[u8], key_pem: &[u8]) -> Result<ServerConfig, ConfigError> {
    let certs = read_certs(cert_pem)?;
    let key = read_key(key_pem)?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| ConfigError::InvalidTlsMaterial(err.to_string()))
}

/// Build a server-side TLS config from PEM files on disk.
pub fn server_config_from_files(cert: &Path, key: &Path) -> Result<ServerConfig, ConfigError> {
    let cert_pem = std::fs::read(cert)
        .map_err(|err| ConfigError::InvalidTlsMaterial(format!("{}: {err}", cert.display())))?;
    let key_pem = std::fs::read(key)
        .map_err(|err| ConfigError::InvalidTlsMaterial(format!("{}: {err}", key.display())))?;
    server_config(&cert_pem, &key_pem)
}

/// Build a client-side TLS config trusting the given CA source.
pub fn client_config(ca: &CaSource) -> Result<ClientConfig, ConfigError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let extra = match ca {
        CaSource::Default => Vec::new(),
        CaSource::File(path) => {
            let pem = std::fs::read(path).map_err(|err| {
                ConfigError::InvalidTlsMaterial(format!("{}: {err}", path.display()))
            })?;
            read_certs(&pem)?
        }
        CaSource::Pem(pem) => read_certs(pem)?,
    };
    for cert in extra {
        roots
            .add(cert)
            .map_err(|err| ConfigError::InvalidTlsMaterial(err.to_string()))?;
    }

    Ok(ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_pem_is_rejected() {
        let err = server_config(b"not a certificate", b"not a key").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTlsMaterial(_)));
    }

    #[test]
    fn default_client_config_builds() {
        client_config(&CaSource::Default).unwrap();
    }
}
