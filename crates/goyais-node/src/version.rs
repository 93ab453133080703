// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub const DEFAULT_RUNTIME_VERSION: &str = "0.0.0-dev";

/// Version string advertised on `/health`, from `GOYAIS_VERSION` with any
/// leading `v`/`V` tag prefix stripped.
pub fn runtime_version() -> String {
    normalize_version(&std::env::var("GOYAIS_VERSION").unwrap_or_default())
}

pub fn normalize_version(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DEFAULT_RUNTIME_VERSION.to_string();
    }
    let normalized = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed)
        .trim();
    if normalized.is_empty() {
        return DEFAULT_RUNTIME_VERSION.to_string();
    }
    normalized.to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_version_gets_default() {
        assert_eq!(normalize_version(""), DEFAULT_RUNTIME_VERSION);
        assert_eq!(normalize_version("  "), DEFAULT_RUNTIME_VERSION);
    }

    #[test]
    fn tag_prefix_is_stripped() {
        assert_eq!(normalize_version("v1.2.3"), "1.2.3");
        assert_eq!(normalize_version("V1.2.3"), "1.2.3");
        assert_eq!(normalize_version("1.2.3"), "1.2.3");
    }

    #[test]
    fn bare_prefix_gets_default() {
        assert_eq!(normalize_version("v"), DEFAULT_RUNTIME_VERSION);
    }
}
