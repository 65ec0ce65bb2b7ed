use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::{self, ServerConfig};
use pgwire::tokio::TlsAcceptor;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::config::Config;

#[derive(Debug)]
pub enum TlsError {
    /// One of the cert/key pair is configured without the other.
    Incomplete { set: &'static str, missing: &'static str },
    Read { path: PathBuf, source: io::Error },
    NoCertificates(PathBuf),
    NoPrivateKey(PathBuf),
    Rustls(rustls::Error),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::Incomplete { set, missing } => {
                write!(f, "{set} is set but {missing} is not; set both or neither")
            }
            TlsError::Read { path, source } => write!(f, "reading {}: {source}", path.display()),
            TlsError::NoCertificates(path) => {
                write!(f, "no certificates found in {}", path.display())
            }
            TlsError::NoPrivateKey(path) => write!(f, "no private key found in {}", path.display()),
            TlsError::Rustls(e) => write!(f, "invalid certificate/key pair: {e}"),
        }
    }
}

impl std::error::Error for TlsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TlsError::Read { source, .. } => Some(source),
            TlsError::Rustls(e) => Some(e),
            _ => None,
        }
    }
}

/// Build the acceptor from `ROOMRATE_TLS_CERT` / `ROOMRATE_TLS_KEY`.
/// `Ok(None)` means TLS is off.
pub fn load_tls_acceptor(config: &Config) -> Result<Option<TlsAcceptor>, TlsError> {
    let (cert_path, key_path) = match (&config.tls_cert, &config.tls_key) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        (Some(_), None) => {
            return Err(TlsError::Incomplete {
                set: "ROOMRATE_TLS_CERT",
                missing: "ROOMRATE_TLS_KEY",
            });
        }
        (None, Some(_)) => {
            return Err(TlsError::Incomplete {
                set: "ROOMRATE_TLS_KEY",
                missing: "ROOMRATE_TLS_CERT",
            });
        }
    };

    let certs = read_certs(cert_path)?;
    let key = read_key(key_path)?;

    let mut server = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(TlsError::Rustls)?;
    server.alpn_protocols = vec![b"postgresql".to_vec()];

    tracing::info!("tls: serving certificate {}", cert_path.display());
    Ok(Some(TlsAcceptor::from(Arc::new(server))))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path).map(BufReader::new).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}
