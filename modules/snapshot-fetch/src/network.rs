use crate::FetchError;
use reqwest::{Certificate, Client, Identity, Proxy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Proxy and TLS settings applied to every upstream request.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub proxy: Option<String>,
    /// Extra PEM root certificate.
    pub ca: Option<PathBuf>,
    /// PEM client certificate, paired with `key`.
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub passphrase: Option<String>,
    /// When false, certificate and hostname verification are skipped.
    pub reject_unauthorized: bool,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        NetworkSettings { proxy: None, ca: None, cert: None, key: None, passphrase: None, reject_unauthorized: true }
    }
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn non_empty_path(p: &Option<PathBuf>) -> Option<&Path> {
    p.as_deref().filter(|p| !p.as_os_str().is_empty())
}

fn read_pem(path: &Path) -> Result<Vec<u8>, FetchError> {
    std::fs::read(path).map_err(|e| FetchError::Tls(format!("cannot read {}: {e}", path.display())))
}

pub fn build_client(net: &NetworkSettings) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .user_agent(concat!("internetdb/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(30))
        .brotli(true)
        .gzip(true)
        .deflate(true);

    // Only the configured proxy applies; environment proxies are ignored.
    builder = match non_empty(&net.proxy) {
        Some(proxy) => {
            let proxy = Proxy::all(proxy).map_err(|source| FetchError::Http { url: proxy.to_string(), source })?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };
    if let Some(ca) = non_empty_path(&net.ca) {
        let cert = Certificate::from_pem(&read_pem(ca)?).map_err(|e| FetchError::Tls(format!("{}: {e}", ca.display())))?;
        builder = builder.add_root_certificate(cert);
    }
    match (non_empty_path(&net.cert), non_empty_path(&net.key)) {
        (Some(cert), Some(key)) => {
            if non_empty(&net.passphrase).is_some() {
                return Err(FetchError::Tls("encrypted client keys are not supported; provide an unencrypted PEM key".into()));
            }
            let mut pem = read_pem(cert)?;
            pem.push(b'\n');
            pem.extend(read_pem(key)?);
            let identity = Identity::from_pem(&pem).map_err(|e| FetchError::Tls(format!("client identity: {e}")))?;
            builder = builder.identity(identity);
        }
        (None, None) => {}
        _ => return Err(FetchError::Tls("cert and key must be configured together".into())),
    }
    if !net.reject_unauthorized {
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder.build().map_err(|e| FetchError::Tls(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_a_client() {
        assert!(NetworkSettings::default().reject_unauthorized);
        assert!(build_client(&NetworkSettings::default()).is_ok());
    }

    #[test]
    fn empty_strings_count_as_unset() {
        let net = NetworkSettings {
            proxy: Some(String::new()),
            ca: Some(PathBuf::new()),
            passphrase: Some(String::new()),
            ..Default::default()
        };
        assert!(build_client(&net).is_ok());
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let net = NetworkSettings { cert: Some("client.pem".into()), ..Default::default() };
        assert!(matches!(build_client(&net), Err(FetchError::Tls(_))));
    }

    #[test]
    fn passphrase_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = (dir.path().join("c.pem"), dir.path().join("k.pem"));
        std::fs::write(&cert, "x").unwrap();
        std::fs::write(&key, "x").unwrap();
        let net = NetworkSettings {
            cert: Some(cert),
            key: Some(key),
            passphrase: Some("secret".into()),
            ..Default::default()
        };
        match build_client(&net) {
            Err(FetchError::Tls(msg)) => assert!(msg.contains("encrypted")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unreadable_ca_is_reported() {
        let net = NetworkSettings { ca: Some("/nonexistent/ca.pem".into()), ..Default::default() };
        assert!(matches!(build_client(&net), Err(FetchError::Tls(_))));
    }

    #[test]
    fn insecure_mode_builds_a_client() {
        let net = NetworkSettings { reject_unauthorized: false, ..Default::default() };
        assert!(build_client(&net).is_ok());
    }
}
