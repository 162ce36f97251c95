// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::{CertificateDer, ServerName, pem::PemObject};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use super::error::TlsError;
use super::{DeliveryStream, Dialer};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub fn init_crypto_provider() -> Result<(), TlsError> {
    if CryptoProvider::get_default().is_none() {
        return match rustls::crypto::aws_lc_rs::default_provider().install_default() {
            Ok(_) => Ok(()),
            // lost a race with another installer, which is fine
            Err(_) if CryptoProvider::get_default().is_some() => Ok(()),
            Err(e) => Err(TlsError::CryptoProvider(format!("{:?}", e))),
        };
    }
    Ok(())
}

/// Dials `host:port` over TLS, validating the server against the certificates
/// of a PEM bundle. The bundle is read again on every dial.
#[derive(Debug, Clone)]
pub struct TlsDialer {
    endpoint: String,
    host: String,
    port: u16,
    pem_file: PathBuf,
    connect_timeout: Duration,
}

impl TlsDialer {
    pub fn new(endpoint: &str, pem_file: impl Into<PathBuf>) -> Result<Self, TlsError> {
        let (host, port) = parse_endpoint(endpoint)?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            host,
            port,
            pem_file: pem_file.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn load_trust_material(&self) -> Result<RootCertStore, TlsError> {
        load_root_store(&self.pem_file)
    }

    fn client_config(&self) -> Result<ClientConfig, TlsError> {
        let roots = self.load_trust_material()?;
        Ok(ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth())
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn dial(&self) -> Result<DeliveryStream, TlsError> {
        let connector = TlsConnector::from(Arc::new(self.client_config()?));
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|_| TlsError::InvalidServerName(self.host.clone()))?;

        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let tcp = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(e)) => {
                return Err(TlsError::Connect {
                    endpoint: self.endpoint.clone(),
                    source: e,
                });
            }
            Err(_) => {
                return Err(TlsError::Connect {
                    endpoint: self.endpoint.clone(),
                    source: std::io::ErrorKind::TimedOut.into(),
                });
            }
        };
        let _ = tcp.set_nodelay(true);

        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| TlsError::Handshake {
                endpoint: self.endpoint.clone(),
                source: e,
            })?;
        debug!(endpoint = %self.endpoint, "TLS session established");

        Ok(Box::new(tls))
    }
}

fn parse_endpoint(endpoint: &str) -> Result<(String, u16), TlsError> {
    let invalid = || TlsError::InvalidEndpoint(endpoint.to_string());

    let (host, port) = endpoint.rsplit_once(':').ok_or_else(invalid)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;

    Ok((host.to_string(), port))
}

fn load_root_store(pem_file: &Path) -> Result<RootCertStore, TlsError> {
    let certs = CertificateDer::pem_file_iter(pem_file)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .map_err(|e| TlsError::TrustMaterial {
            path: pem_file.to_path_buf(),
            source: e,
        })?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if ignored > 0 {
        debug!(path = %pem_file.display(), ignored, "Skipped unparsable certificates");
    }
    if added == 0 {
        return Err(TlsError::NoCertificates(pem_file.to_path_buf()));
    }

    Ok(roots)
}
