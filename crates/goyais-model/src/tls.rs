// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Outbound TLS resolution for model requests.
//!
//! Order of precedence:
//! 1. Non-HTTPS URL → platform defaults, nothing to resolve.
//! 2. `WORKER_TLS_INSECURE_SKIP_VERIFY` truthy → certificate verification off
//!    (development escape hatch behind corporate MITM proxies).
//! 3. Explicit CA bundle from `WORKER_TLS_CA_FILE` / `SSL_CERT_FILE` /
//!    `REQUESTS_CA_BUNDLE` / `CURL_CA_BUNDLE` — an invalid path fails with
//!    `MODEL_TLS_CONFIG_INVALID` before any network I/O.
//! 4. On macOS with a proxy environment, the system trust store is exported
//!    once per process via `/usr/bin/security` and cached as a PEM bundle.
//!
//! The cached bundle lives until [`cleanup_cached_bundle`] runs at shutdown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tracing::warn;

use crate::error::AdapterError;
use crate::invocation::process_env;

const CA_FILE_ENV_VARS: &[&str] = &[
    "WORKER_TLS_CA_FILE",
    "SSL_CERT_FILE",
    "REQUESTS_CA_BUNDLE",
    "CURL_CA_BUNDLE",
];

static MACOS_BUNDLE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Resolved TLS posture for one outbound URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsContext {
    /// Verification disabled (`WORKER_TLS_INSECURE_SKIP_VERIFY`).
    InsecureSkipVerify,
    /// Verify against this PEM bundle instead of the platform store.
    CaBundle(PathBuf),
}

/// Resolve the TLS context for `url` from the given environment.
///
/// `Ok(None)` means the platform defaults apply (plain HTTP, or HTTPS with
/// no overrides configured).
pub fn resolve_tls_context(
    url: &str,
    env: &HashMap<String, String>,
) -> Result<Option<TlsContext>, AdapterError> {
    if !url.to_lowercase().starts_with("https://") {
        return Ok(None);
    }
    if flag_env(env, "WORKER_TLS_INSECURE_SKIP_VERIFY") {
        return Ok(Some(TlsContext::InsecureSkipVerify));
    }
    if let Some(explicit) = first_non_empty_env(env, CA_FILE_ENV_VARS) {
        let path = PathBuf::from(&explicit);
        if !path.is_file() {
            return Err(AdapterError::TlsConfig {
                ca_file: explicit,
                reason: "file_not_found".to_string(),
            });
        }
        return Ok(Some(TlsContext::CaBundle(path)));
    }
    Ok(resolve_macos_keychain_bundle(env).map(TlsContext::CaBundle))
}

/// Build the HTTP client for one model request, honoring the resolved TLS
/// context. Fails before any request is sent when the configuration is bad.
pub fn build_http_client(url: &str, timeout: Duration) -> Result<reqwest::Client, AdapterError> {
    let env = process_env();
    let mut builder = reqwest::Client::builder().timeout(timeout);

    match resolve_tls_context(url, &env)? {
        None => {}
        Some(TlsContext::InsecureSkipVerify) => {
            builder = builder.danger_accept_invalid_certs(true);
        }
        Some(TlsContext::CaBundle(path)) => {
            let pem = std::fs::read(&path).map_err(|e| AdapterError::TlsConfig {
                ca_file: path.display().to_string(),
                reason: e.to_string(),
            })?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                AdapterError::TlsConfig {
                    ca_file: path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;
            builder = builder.tls_built_in_root_certs(false);
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }
    }

    builder.build().map_err(|e| AdapterError::TlsConfig {
        ca_file: String::new(),
        reason: e.to_string(),
    })
}

/// Delete the exported macOS trust-store bundle, if one was created.
/// Called once at process shutdown.
pub fn cleanup_cached_bundle() {
    let path = MACOS_BUNDLE
        .lock()
        .ok()
        .and_then(|mut cached| cached.take());
    if let Some(path) = path {
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), "failed to remove cached CA bundle: {e}");
        }
    }
}

#[cfg(target_os = "macos")]
fn resolve_macos_keychain_bundle(env: &HashMap<String, String>) -> Option<PathBuf> {
    use std::io::Write;

    if !has_proxy_env(env) {
        return None;
    }

    let mut cached = MACOS_BUNDLE.lock().ok()?;
    if let Some(path) = cached.as_ref() {
        if path.is_file() {
            return Some(path.clone());
        }
        *cached = None;
    }

    let keychains = macos_keychain_candidates();
    let output = std::process::Command::new("/usr/bin/security")
        .arg("find-certificate")
        .arg("-a")
        .arg("-p")
        .args(&keychains)
        .output()
        .ok()?;
    if !output.status.success() || output.stdout.is_empty() {
        return None;
    }

    let mut file = tempfile::Builder::new()
        .prefix("goyais-ca-")
        .suffix(".pem")
        .tempfile()
        .ok()?;
    file.write_all(&output.stdout).ok()?;
    // keep() detaches the file from the guard so it survives until cleanup.
    let (_, path) = file.keep().ok()?;
    *cached = Some(path.clone());
    Some(path)
}

#[cfg(not(target_os = "macos"))]
fn resolve_macos_keychain_bundle(_env: &HashMap<String, String>) -> Option<PathBuf> {
    None
}

#[cfg(target_os = "macos")]
fn macos_keychain_candidates() -> Vec<String> {
    let mut candidates = vec![
        "/System/Library/Keychains/SystemRootCertificates.keychain".to_string(),
        "/Library/Keychains/System.keychain".to_string(),
    ];
    if let Some(home) = std::env::var_os("HOME") {
        candidates.push(
            std::path::Path::new(&home)
                .join("Library/Keychains/login.keychain-db")
                .display()
                .to_string(),
        );
    }
    candidates.retain(|c| std::path::Path::new(c).exists());
    candidates
}

#[cfg(target_os = "macos")]
fn has_proxy_env(env: &HashMap<String, String>) -> bool {
    [
        "HTTPS_PROXY",
        "https_proxy",
        "HTTP_PROXY",
        "http_proxy",
        "ALL_PROXY",
        "all_proxy",
    ]
    .iter()
    .any(|key| env.get(*key).map(|v| !v.trim().is_empty()).unwrap_or(false))
}

fn first_non_empty_env(env: &HashMap<String, String>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        env.get(*name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

fn flag_env(env: &HashMap<String, String>, name: &str) -> bool {
    env.get(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn plain_http_needs_no_context() {
        let ctx = resolve_tls_context("http://127.0.0.1:11434/v1", &HashMap::new()).unwrap();
        assert_eq!(ctx, None);
    }

    #[test]
    fn https_without_overrides_uses_defaults() {
        let ctx = resolve_tls_context("https://api.openai.com/v1", &HashMap::new()).unwrap();
        assert_eq!(ctx, None);
    }

    #[test]
    fn insecure_skip_verify_flag() {
        for value in ["1", "true", "YES", "on"] {
            let e = env(&[("WORKER_TLS_INSECURE_SKIP_VERIFY", value)]);
            let ctx = resolve_tls_context("https://x.example", &e).unwrap();
            assert_eq!(ctx, Some(TlsContext::InsecureSkipVerify), "value={value}");
        }
        let e = env(&[("WORKER_TLS_INSECURE_SKIP_VERIFY", "0")]);
        assert_eq!(resolve_tls_context("https://x.example", &e).unwrap(), None);
    }

    #[test]
    fn missing_ca_file_fails_before_io() {
        let e = env(&[("WORKER_TLS_CA_FILE", "/no/such.pem")]);
        let err = resolve_tls_context("https://x.example", &e).unwrap_err();
        assert_eq!(err.code(), "MODEL_TLS_CONFIG_INVALID");
        assert_eq!(err.details()["ca_file"], "/no/such.pem");
    }

    #[test]
    fn existing_ca_file_is_used() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let e = env(&[("SSL_CERT_FILE", file.path().to_str().unwrap())]);
        let ctx = resolve_tls_context("https://x.example", &e).unwrap();
        assert_eq!(ctx, Some(TlsContext::CaBundle(file.path().to_path_buf())));
    }

    #[test]
    fn ca_env_var_precedence() {
        let first = tempfile::NamedTempFile::new().unwrap();
        let second = tempfile::NamedTempFile::new().unwrap();
        let e = env(&[
            ("WORKER_TLS_CA_FILE", first.path().to_str().unwrap()),
            ("SSL_CERT_FILE", second.path().to_str().unwrap()),
        ]);
        let ctx = resolve_tls_context("https://x.example", &e).unwrap();
        assert_eq!(ctx, Some(TlsContext::CaBundle(first.path().to_path_buf())));
    }

    #[test]
    fn insecure_flag_wins_over_ca_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let e = env(&[
            ("WORKER_TLS_INSECURE_SKIP_VERIFY", "true"),
            ("WORKER_TLS_CA_FILE", file.path().to_str().unwrap()),
        ]);
        let ctx = resolve_tls_context("https://x.example", &e).unwrap();
        assert_eq!(ctx, Some(TlsContext::InsecureSkipVerify));
    }

    #[test]
    fn cleanup_without_bundle_is_a_noop() {
        cleanup_cached_bundle();
    }
}
