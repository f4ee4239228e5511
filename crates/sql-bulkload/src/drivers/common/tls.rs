//! `ssl_mode` handling shared by the PostgreSQL and MySQL drivers.
//!
//! Modes follow libpq's `sslmode` names. SQL Server uses its own
//! `encrypt`/`trust_server_certificate` pair instead.

use std::str::FromStr;
use std::sync::Arc;

use mysql_async::SslOpts;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::warn;

use crate::error::LoadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disable,
    /// Encrypt when the server offers it, without checking its certificate.
    #[default]
    Prefer,
    /// Always encrypt, still without checking the certificate.
    Require,
    VerifyCa,
    VerifyFull,
}

impl FromStr for SslMode {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(Self::Disable),
            "" | "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" | "verify_ca" => Ok(Self::VerifyCa),
            "verify-full" | "verify_full" => Ok(Self::VerifyFull),
            other => Err(LoadError::Config(format!(
                "unknown ssl_mode '{}' (expected disable, prefer, require, verify-ca or verify-full)",
                other
            ))),
        }
    }
}

impl SslMode {
    pub fn verifies_certificate(&self) -> bool {
        matches!(self, Self::VerifyCa | Self::VerifyFull)
    }

    /// Log once per pool when credentials or data can be intercepted.
    pub fn warn_if_insecure(&self, engine: &str) {
        match self {
            Self::Disable => warn!("{} TLS is disabled; credentials are sent in plaintext", engine),
            Self::Require => warn!(
                "{} ssl_mode=require does not verify the server certificate; use verify-full",
                engine
            ),
            _ => {}
        }
    }

    /// tokio-postgres only negotiates disable/prefer/require; verification
    /// happens in the rustls connector.
    pub fn postgres_mode(&self) -> tokio_postgres::config::SslMode {
        use tokio_postgres::config::SslMode as Pg;
        match self {
            Self::Disable => Pg::Disable,
            Self::Prefer => Pg::Prefer,
            Self::Require | Self::VerifyCa | Self::VerifyFull => Pg::Require,
        }
    }

    /// rustls connector for deadpool-postgres, or `None` when TLS is off.
    pub fn postgres_connector(&self) -> Option<MakeRustlsConnect> {
        let config = match self {
            Self::Disable => return None,
            Self::Prefer | Self::Require => ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
                .with_no_client_auth(),
            Self::VerifyCa | Self::VerifyFull => {
                let mut roots = RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth()
            }
        };
        Some(MakeRustlsConnect::new(config))
    }

    /// TLS options for mysql_async, or `None` when TLS is off.
    pub fn mysql_ssl_opts(&self) -> Option<SslOpts> {
        match self {
            Self::Disable => None,
            Self::Prefer | Self::Require => {
                Some(SslOpts::default().with_danger_accept_invalid_certs(true))
            }
            Self::VerifyCa => Some(SslOpts::default().with_danger_skip_domain_validation(true)),
            Self::VerifyFull => Some(SslOpts::default()),
        }
    }
}

/// Schemes offered when no process-wide crypto provider is installed.
const FALLBACK_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::ECDSA_NISTP256_SHA256,
    SignatureScheme::ECDSA_NISTP384_SHA384,
    SignatureScheme::ED25519,
    SignatureScheme::RSA_PSS_SHA256,
    SignatureScheme::RSA_PSS_SHA384,
    SignatureScheme::RSA_PSS_SHA512,
    SignatureScheme::RSA_PKCS1_SHA256,
    SignatureScheme::RSA_PKCS1_SHA384,
    SignatureScheme::RSA_PKCS1_SHA512,
];

#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        CryptoProvider::get_default()
            .map(|p| p.signature_verification_algorithms.supported_schemes())
            .unwrap_or_else(|| FALLBACK_SCHEMES.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_mode_from_str() {
        assert_eq!("disable".parse::<SslMode>().unwrap(), SslMode::Disable);
        assert_eq!("".parse::<SslMode>().unwrap(), SslMode::Prefer);
        assert_eq!(" Verify_Full ".parse::<SslMode>().unwrap(), SslMode::VerifyFull);
        assert!(matches!(
            "allow".parse::<SslMode>(),
            Err(LoadError::Config(msg)) if msg.contains("allow")
        ));
    }

    #[test]
    fn test_verification_modes_map_to_require() {
        use tokio_postgres::config::SslMode as Pg;
        assert_eq!(SslMode::VerifyCa.postgres_mode(), Pg::Require);
        assert_eq!(SslMode::Prefer.postgres_mode(), Pg::Prefer);
        assert!(SslMode::VerifyCa.verifies_certificate());
        assert!(!SslMode::Require.verifies_certificate());
    }

    #[test]
    fn test_disable_has_no_tls() {
        assert!(SslMode::Disable.postgres_connector().is_none());
        assert!(SslMode::Disable.mysql_ssl_opts().is_none());
        assert!(SslMode::Prefer.mysql_ssl_opts().is_some());
    }
}
