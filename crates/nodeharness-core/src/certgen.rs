//! Self-signed TLS material for the daemon's RPC server.
//!
//! The daemon refuses to start its RPC listener without a certificate and
//! key, and the RPC client pins the certificate bytes, so each test node
//! gets a freshly generated pair on disk.

use crate::config::CertConfig;
use crate::error::{HarnessError, Result};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, PKCS_ECDSA_P384_SHA384,
};
use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// A PEM-encoded certificate and its private key.
#[derive(Debug, Clone)]
pub struct CertPair {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Generate a self-signed, CA-capable ECDSA P-384 certificate.
///
/// The certificate covers `localhost`, the loopback addresses, and any
/// `extra_hosts` (DNS names or IP literals).
pub fn new_tls_cert_pair(
    organization: &str,
    validity: Duration,
    extra_hosts: &[String],
) -> Result<CertPair> {
    let mut hosts: Vec<String> = CertConfig::DEFAULT_HOSTS
        .iter()
        .map(|h| h.to_string())
        .collect();
    hosts.extend(extra_hosts.iter().cloned());

    let now = time::OffsetDateTime::now_utc();
    let validity = time::Duration::try_from(validity).map_err(|e| HarnessError::Certificate {
        message: format!("invalid validity period: {}", e),
    })?;
    let not_after = now
        .checked_add(validity)
        .ok_or_else(|| HarnessError::Certificate {
            message: "validity period overflows".to_string(),
        })?;

    let mut params = CertificateParams::new(hosts)?;
    params.not_before = now;
    params.not_after = not_after;
    params
        .distinguished_name
        .push(DnType::OrganizationName, organization);
    params.distinguished_name.push(DnType::CommonName, "localhost");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384)?;
    let cert = params.self_signed(&key_pair)?;

    Ok(CertPair {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Generate a key/cert pair and write it to the given paths.
///
/// The certificate is written world-readable, the key owner-only. If the key
/// cannot be written, the certificate file is removed again.
pub fn generate_cert_pair(cert_file: &Path, key_file: &Path) -> Result<()> {
    let pair = new_tls_cert_pair(CertConfig::ORGANIZATION, CertConfig::VALIDITY, &[])?;

    write_with_mode(cert_file, pair.cert_pem.as_bytes(), CertConfig::CERT_FILE_MODE)?;
    if let Err(e) = write_with_mode(key_file, pair.key_pem.as_bytes(), CertConfig::KEY_FILE_MODE) {
        if let Err(rm) = fs::remove_file(cert_file) {
            debug!("Failed to remove {}: {}", cert_file.display(), rm);
        }
        return Err(e);
    }

    debug!(
        "Wrote certificate to {} and key to {}",
        cert_file.display(),
        key_file.display()
    );
    Ok(())
}

fn write_with_mode(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .map_err(|e| HarnessError::io_with_path(e, path))?;
    file.write_all(contents)
        .map_err(|e| HarnessError::io_with_path(e, path))?;
    // The mode passed to open() is masked by the umask and ignored for files
    // that already exist.
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| HarnessError::io_with_path(e, path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_tls_cert_pair_is_pem() {
        let pair = new_tls_cert_pair("test org", Duration::from_secs(3600), &[]).unwrap();
        assert!(pair.cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(pair.key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_extra_hosts_accepted() {
        let extra = vec!["node1.test".to_string(), "10.0.0.5".to_string()];
        assert!(new_tls_cert_pair("test org", Duration::from_secs(3600), &extra).is_ok());
    }

    #[test]
    fn test_generate_cert_pair_permissions() {
        let temp_dir = TempDir::new().unwrap();
        let cert_file = temp_dir.path().join("rpc.cert");
        let key_file = temp_dir.path().join("rpc.key");

        generate_cert_pair(&cert_file, &key_file).unwrap();

        let cert_mode = fs::metadata(&cert_file).unwrap().permissions().mode() & 0o777;
        let key_mode = fs::metadata(&key_file).unwrap().permissions().mode() & 0o777;
        assert_eq!(cert_mode, 0o644);
        assert_eq!(key_mode, 0o600);
    }

    #[test]
    fn test_key_write_failure_removes_cert() {
        let temp_dir = TempDir::new().unwrap();
        let cert_file = temp_dir.path().join("rpc.cert");
        let key_file = temp_dir.path().join("missing-dir").join("rpc.key");

        let result = generate_cert_pair(&cert_file, &key_file);

        assert!(result.is_err());
        assert!(!cert_file.exists());
    }
}
