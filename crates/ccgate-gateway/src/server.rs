// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Router assembly and TLS bring-up.
//!
//! TLS certificate generation mirrors the teacher's `sven-node` gateway: pure
//! Rust, no OpenSSL subprocess. ECDSA P-256 keys via `rcgen`, 90-day
//! validity with auto-regeneration on near-expiry, and a printed SHA-256
//! fingerprint for client pinning (TOFU, same idea as SSH host keys).
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls_pemfile::certs;
use time::{Duration, OffsetDateTime};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::bearer_auth_mw;
use crate::routes::{chat, control, health};
use crate::security::{csrf_guard, security_headers};
use crate::state::AppState;

/// Certificate validity window: 90 days, matching Let's Encrypt cadence.
const CERT_VALIDITY_DAYS: i64 = 90;

/// Regenerate the cert this many days before it expires.
const CERT_RENEW_BEFORE_DAYS: i64 = 7;

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/messages", post(chat::messages))
        .route("/v1/messages/count_tokens", post(chat::count_tokens))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/responses", post(chat::responses))
        .route("/v1/cc/events", get(control::list_events))
        .route("/v1/cc/events/stream", get(control::stream_events))
        .route("/v1/cc/mcp/servers", get(control::list_mcp_servers).post(control::register_mcp_server))
        .route("/v1/cc/mcp/servers/:id", put(control::update_mcp_server).delete(control::delete_mcp_server))
        .route("/admin/tokens", get(control::list_tokens).post(control::create_token))
        .route("/admin/tokens/:id", axum::routing::delete(control::revoke_token))
        .route("/admin/settings", get(control::get_settings).put(control::put_settings))
        .route_layer(middleware::from_fn_with_state(state.clone(), bearer_auth_mw));

    Router::new()
        .route("/healthz", get(health::healthz))
        .merge(protected)
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(csrf_guard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `router` over plain HTTP, or TLS when `tls` is configured (§6).
pub async fn serve(bind_addr: &str, tls: Option<(&Path, &Path)>, router: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr.parse()?;
    let make_service = router.into_make_service_with_connect_info::<SocketAddr>();

    match tls {
        Some((cert_path, key_path)) => {
            let config = RustlsConfig::from_pem_file(cert_path, key_path).await?;
            axum_server::bind_rustls(addr, config).serve(make_service).await?;
        }
        None => {
            axum_server::bind(addr).serve(make_service).await?;
        }
    }
    Ok(())
}

/// Loaded TLS cert/key paths plus the fingerprint clients should pin.
pub struct TlsRuntime {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Hex-encoded SHA-256 fingerprint for display / client pinning.
    pub fingerprint_sha256: String,
}

/// Loads or (re-)generates the gateway's TLS certificate under `cert_dir`:
/// `gateway-cert.pem` and `gateway-key.pem`. Generates a fresh ECDSA P-256
/// self-signed certificate in pure Rust when either file is missing or the
/// existing one is near expiry.
pub fn load_or_generate(cert_dir: &Path) -> anyhow::Result<TlsRuntime> {
    let cert_path = cert_dir.join("gateway-cert.pem");
    let key_path = cert_dir.join("gateway-key.pem");

    let needs_generate =
        !cert_path.exists() || !key_path.exists() || cert_is_expiring_soon(&cert_path);

    if needs_generate {
        generate_self_signed(cert_dir, &cert_path, &key_path)?;
    }

    load_from_files(&cert_path, &key_path)
}

// ── Certificate generation ────────────────────────────────────────────────────

fn generate_self_signed(cert_dir: &Path, cert_path: &Path, key_path: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(cert_dir)
        .with_context(|| format!("creating TLS cert dir {}", cert_dir.display()))?;

    // rcgen 0.13: KeyPair::generate() defaults to ECDSA P-256.
    let key_pair = KeyPair::generate().context("generating ECDSA P-256 key pair")?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "ccgate");

    let now = OffsetDateTime::now_utc();
    let mut params = CertificateParams::new(vec![
        "ccgate".to_string(),
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ])
    .context("building cert params")?;
    params.not_before = now;
    params.not_after = now + Duration::days(CERT_VALIDITY_DAYS);
    params.distinguished_name = dn;

    // rcgen 0.13 API: params.self_signed(&key_pair) signs the cert.
    let cert = params
        .self_signed(&key_pair)
        .context("generating self-signed certificate")?;

    let cert_pem = cert.pem();
    let key_pem = key_pair.serialize_pem();

    std::fs::write(cert_path, &cert_pem)
        .with_context(|| format!("writing {}", cert_path.display()))?;
    write_secret(key_path, key_pem.as_bytes())?;

    info!(
        cert = %cert_path.display(),
        key  = %key_path.display(),
        "generated ECDSA P-256 self-signed certificate (90-day validity)",
    );

    Ok(())
}

// ── Certificate loading ───────────────────────────────────────────────────────

fn load_from_files(cert_path: &Path, key_path: &Path) -> anyhow::Result<TlsRuntime> {
    let cert_pem =
        std::fs::read(cert_path).with_context(|| format!("reading {}", cert_path.display()))?;

    let fingerprint_sha256 = {
        use sha2::{Digest, Sha256};
        let mut reader = std::io::Cursor::new(&cert_pem);
        let first_cert = certs(&mut reader)
            .next()
            .ok_or_else(|| anyhow::anyhow!("no certificate found in {}", cert_path.display()))?
            .context("parsing certificate")?;
        let digest = Sha256::digest(&first_cert);
        digest
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":")
    };

    info!(fingerprint = %fingerprint_sha256, "loaded TLS certificate");

    Ok(TlsRuntime {
        cert_path: cert_path.to_path_buf(),
        key_path: key_path.to_path_buf(),
        fingerprint_sha256,
    })
}

// ── Expiry check ──────────────────────────────────────────────────────────────

fn cert_is_expiring_soon(cert_path: &Path) -> bool {
    let Ok(pem) = std::fs::read(cert_path) else {
        return true;
    };
    let mut reader = std::io::Cursor::new(&pem);
    let Ok(Some(_cert_der)) = certs(&mut reader).next().transpose() else {
        return true;
    };

    let Ok(meta) = std::fs::metadata(cert_path) else {
        return true;
    };
    let Ok(modified) = meta.modified() else {
        return true;
    };
    let age_days = modified.elapsed().unwrap_or_default().as_secs() as i64 / 86400;

    age_days >= (CERT_VALIDITY_DAYS - CERT_RENEW_BEFORE_DAYS)
}

// ── Secret file helper ────────────────────────────────────────────────────────

fn write_secret(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("writing {}", path.display()))?;
        f.write_all(data)?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

/// Default cert directory under the user's config dir.
pub fn default_cert_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config/ccgate/tls")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_cert_and_loads_it() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = load_or_generate(dir.path()).unwrap();
        assert!(!runtime.fingerprint_sha256.is_empty());
        assert!(runtime.fingerprint_sha256.contains(':'));
    }

    #[test]
    fn cert_files_are_created() {
        let dir = tempfile::tempdir().unwrap();
        load_or_generate(dir.path()).unwrap();
        assert!(dir.path().join("gateway-cert.pem").exists());
        assert!(dir.path().join("gateway-key.pem").exists());
    }

    #[test]
    fn second_load_reuses_existing_cert() {
        let dir = tempfile::tempdir().unwrap();
        let r1 = load_or_generate(dir.path()).unwrap();
        let r2 = load_or_generate(dir.path()).unwrap();
        assert_eq!(r1.fingerprint_sha256, r2.fingerprint_sha256);
    }

    #[test]
    #[cfg(unix)]
    fn key_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        load_or_generate(dir.path()).unwrap();
        let meta = std::fs::metadata(dir.path().join("gateway-key.pem")).unwrap();
        let mode = meta.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "key file must be 0600, got {mode:03o}");
    }
}
