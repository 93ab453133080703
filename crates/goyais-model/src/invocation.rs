// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AdapterError;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const MIN_TIMEOUT_MS: u64 = 1_000;
const MAX_TIMEOUT_MS: u64 = 120_000;

/// Normalized model vendor. Unknown strings are inferred from the model id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    Openai,
    Google,
    Qwen,
    Doubao,
    Zhipu,
    Minimax,
    Local,
}

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Openai => "openai",
            Vendor::Google => "google",
            Vendor::Qwen => "qwen",
            Vendor::Doubao => "doubao",
            Vendor::Zhipu => "zhipu",
            Vendor::Minimax => "minimax",
            Vendor::Local => "local",
        }
    }

    fn from_exact(raw: &str) -> Option<Vendor> {
        match raw {
            "openai" => Some(Vendor::Openai),
            "google" => Some(Vendor::Google),
            "qwen" => Some(Vendor::Qwen),
            "doubao" => Some(Vendor::Doubao),
            "zhipu" => Some(Vendor::Zhipu),
            "minimax" => Some(Vendor::Minimax),
            "local" => Some(Vendor::Local),
            _ => None,
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Vendor::Openai => "https://api.openai.com/v1",
            Vendor::Google => "https://generativelanguage.googleapis.com/v1beta",
            Vendor::Qwen => "https://dashscope.aliyuncs.com/compatible-mode/v1",
            Vendor::Doubao => "https://ark.cn-beijing.volces.com/api/v3",
            Vendor::Zhipu => "https://open.bigmodel.cn/api/paas/v4",
            Vendor::Minimax => "https://api.minimax.chat/v1",
            Vendor::Local => "http://127.0.0.1:11434/v1",
        }
    }

    fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Vendor::Openai => Some("OPENAI_API_KEY"),
            Vendor::Google => Some("GOOGLE_API_KEY"),
            Vendor::Qwen => Some("QWEN_API_KEY"),
            Vendor::Doubao => Some("DOUBAO_API_KEY"),
            Vendor::Zhipu => Some("ZHIPU_API_KEY"),
            Vendor::Minimax => Some("MINIMAX_API_KEY"),
            Vendor::Local => None,
        }
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The model configuration snapshot frozen into an execution envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSnapshot {
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<i64>,
    /// Optional inline API key; secrets normally stay on the Hub, but a
    /// snapshot may carry one for bring-your-own-key configurations.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Everything needed to issue model turns: resolved once per execution.
#[derive(Debug, Clone)]
pub struct ModelInvocation {
    pub vendor: Vendor,
    pub model_id: String,
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    /// Vendor parameters (temperature etc.), with any inline key stripped.
    pub params: Map<String, Value>,
}

/// Snapshot of the process environment, shaped for injection in tests.
pub fn process_env() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Resolve the effective model invocation for an execution.
///
/// Precedence per field: snapshot → snapshot.params → environment →
/// built-in default. A missing API key is fatal for every vendor except
/// `local`.
pub fn resolve_invocation(
    fallback_model_id: &str,
    snapshot: &ModelSnapshot,
    env: &HashMap<String, String>,
) -> Result<ModelInvocation, AdapterError> {
    let model_id = snapshot
        .model_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback_model_id.trim())
        .to_string();
    if model_id.is_empty() {
        return Err(AdapterError::ModelIdRequired);
    }

    let raw_vendor = snapshot
        .vendor
        .as_deref()
        .or_else(|| snapshot.params.get("vendor").and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let vendor = normalize_vendor(raw_vendor, &model_id);

    let base_url = snapshot
        .base_url
        .as_deref()
        .or_else(|| snapshot.params.get("base_url").and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| vendor.default_base_url())
        .trim_end_matches('/')
        .to_string();
    if base_url.is_empty() {
        return Err(AdapterError::BaseUrlRequired);
    }

    let timeout_ms = resolve_timeout_ms(snapshot, env);
    let api_key = resolve_api_key(vendor, snapshot, env);
    if vendor != Vendor::Local && api_key.is_empty() {
        return Err(AdapterError::ApiKeyMissing {
            vendor: vendor.as_str().to_string(),
        });
    }

    let mut params = snapshot.params.clone();
    params.remove("api_key");

    Ok(ModelInvocation {
        vendor,
        model_id,
        base_url,
        api_key,
        timeout: Duration::from_millis(timeout_ms),
        params,
    })
}

fn resolve_api_key(
    vendor: Vendor,
    snapshot: &ModelSnapshot,
    env: &HashMap<String, String>,
) -> String {
    if let Some(key) = snapshot.api_key.as_deref().map(str::trim) {
        if !key.is_empty() {
            return key.to_string();
        }
    }
    if let Some(key) = snapshot
        .params
        .get("api_key")
        .and_then(Value::as_str)
        .map(str::trim)
    {
        if !key.is_empty() {
            return key.to_string();
        }
    }
    if let Some(env_key) = vendor.api_key_env() {
        if let Some(key) = env.get(env_key).map(|s| s.trim()) {
            if !key.is_empty() {
                return key.to_string();
            }
        }
    }
    env.get("MODEL_API_KEY")
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn resolve_timeout_ms(snapshot: &ModelSnapshot, env: &HashMap<String, String>) -> u64 {
    let raw = snapshot
        .timeout_ms
        .or_else(|| snapshot.params.get("timeout_ms").and_then(Value::as_i64))
        .or_else(|| {
            env.get("WORKER_MODEL_TIMEOUT_MS")
                .and_then(|s| s.trim().parse::<i64>().ok())
        })
        .unwrap_or(DEFAULT_TIMEOUT_MS as i64);
    (raw.max(0) as u64).clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
}

fn normalize_vendor(raw: Option<&str>, model_id: &str) -> Vendor {
    match raw {
        Some(raw) => {
            let lowered = raw.to_lowercase();
            Vendor::from_exact(&lowered).unwrap_or_else(|| infer_vendor_from_model_id(&lowered))
        }
        None => infer_vendor_from_model_id(model_id),
    }
}

fn infer_vendor_from_model_id(model_id: &str) -> Vendor {
    let normalized = model_id.to_lowercase();
    if normalized.starts_with("gemini") {
        return Vendor::Google;
    }
    if normalized.contains("qwen") {
        return Vendor::Qwen;
    }
    if normalized.contains("doubao") || normalized.contains("ark") {
        return Vendor::Doubao;
    }
    if normalized.starts_with("glm") || normalized.contains("zhipu") {
        return Vendor::Zhipu;
    }
    if normalized.contains("minimax") {
        return Vendor::Minimax;
    }
    if normalized.contains(':') {
        return Vendor::Local;
    }
    Vendor::Openai
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn snapshot(value: Value) -> ModelSnapshot {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn missing_model_id_is_rejected() {
        let err =
            resolve_invocation("", &ModelSnapshot::default(), &HashMap::new()).unwrap_err();
        assert_eq!(err.code(), "MODEL_ID_REQUIRED");
    }

    #[test]
    fn vendor_inference_from_model_id() {
        assert_eq!(infer_vendor_from_model_id("gemini-2.0-flash"), Vendor::Google);
        assert_eq!(infer_vendor_from_model_id("qwen-max"), Vendor::Qwen);
        assert_eq!(infer_vendor_from_model_id("doubao-pro"), Vendor::Doubao);
        assert_eq!(infer_vendor_from_model_id("glm-4"), Vendor::Zhipu);
        assert_eq!(infer_vendor_from_model_id("minimax-abab6"), Vendor::Minimax);
        assert_eq!(infer_vendor_from_model_id("llama3:8b"), Vendor::Local);
        assert_eq!(infer_vendor_from_model_id("gpt-4.1"), Vendor::Openai);
    }

    #[test]
    fn local_vendor_needs_no_api_key() {
        let inv =
            resolve_invocation("llama3:8b", &ModelSnapshot::default(), &HashMap::new()).unwrap();
        assert_eq!(inv.vendor, Vendor::Local);
        assert_eq!(inv.base_url, "http://127.0.0.1:11434/v1");
        assert!(inv.api_key.is_empty());
    }

    #[test]
    fn missing_api_key_is_rejected_for_remote_vendor() {
        let err =
            resolve_invocation("gpt-4.1", &ModelSnapshot::default(), &HashMap::new()).unwrap_err();
        assert_eq!(err.code(), "MODEL_API_KEY_MISSING");
    }

    #[test]
    fn api_key_precedence_snapshot_over_params_over_env() {
        let snap = snapshot(json!({
            "api_key": "from-snapshot",
            "params": {"api_key": "from-params"}
        }));
        let e = env(&[("OPENAI_API_KEY", "from-env")]);
        let inv = resolve_invocation("gpt-4.1", &snap, &e).unwrap();
        assert_eq!(inv.api_key, "from-snapshot");

        let snap = snapshot(json!({"params": {"api_key": "from-params"}}));
        let inv = resolve_invocation("gpt-4.1", &snap, &e).unwrap();
        assert_eq!(inv.api_key, "from-params");

        let inv = resolve_invocation("gpt-4.1", &ModelSnapshot::default(), &e).unwrap();
        assert_eq!(inv.api_key, "from-env");
    }

    #[test]
    fn generic_model_api_key_is_the_last_resort() {
        let e = env(&[("MODEL_API_KEY", "generic")]);
        let inv = resolve_invocation("gpt-4.1", &ModelSnapshot::default(), &e).unwrap();
        assert_eq!(inv.api_key, "generic");
    }

    #[test]
    fn inline_api_key_is_stripped_from_params() {
        let snap = snapshot(json!({"params": {"api_key": "k", "temperature": 0.2}}));
        let inv = resolve_invocation("gpt-4.1", &snap, &HashMap::new()).unwrap();
        assert!(inv.params.get("api_key").is_none());
        assert_eq!(inv.params.get("temperature"), Some(&json!(0.2)));
    }

    #[test]
    fn timeout_is_clamped() {
        let snap = snapshot(json!({"timeout_ms": 50}));
        let inv = resolve_invocation("llama3:8b", &snap, &HashMap::new()).unwrap();
        assert_eq!(inv.timeout, Duration::from_millis(1_000));

        let snap = snapshot(json!({"timeout_ms": 600_000}));
        let inv = resolve_invocation("llama3:8b", &snap, &HashMap::new()).unwrap();
        assert_eq!(inv.timeout, Duration::from_millis(120_000));
    }

    #[test]
    fn timeout_env_fallback_and_default() {
        let e = env(&[("WORKER_MODEL_TIMEOUT_MS", "5000")]);
        let inv = resolve_invocation("llama3:8b", &ModelSnapshot::default(), &e).unwrap();
        assert_eq!(inv.timeout, Duration::from_millis(5_000));

        let inv =
            resolve_invocation("llama3:8b", &ModelSnapshot::default(), &HashMap::new()).unwrap();
        assert_eq!(inv.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }

    #[test]
    fn unparseable_timeout_env_falls_back_to_default() {
        let e = env(&[("WORKER_MODEL_TIMEOUT_MS", "soon")]);
        let inv = resolve_invocation("llama3:8b", &ModelSnapshot::default(), &e).unwrap();
        assert_eq!(inv.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let snap = snapshot(json!({"base_url": "https://proxy.example/v1/"}));
        let inv = resolve_invocation("llama3:8b", &snap, &HashMap::new()).unwrap();
        assert_eq!(inv.base_url, "https://proxy.example/v1");
    }

    #[test]
    fn unknown_vendor_string_falls_back_to_inference() {
        let snap = snapshot(json!({"vendor": "acme"}));
        let inv = resolve_invocation("gemini-2.0-flash", &snap, &HashMap::new());
        // "acme" is not a known vendor; the id does not help either, so the
        // normalized value of the *raw vendor string* decides.
        assert_eq!(inv.unwrap_err().code(), "MODEL_API_KEY_MISSING");
    }

    #[test]
    fn snapshot_model_id_overrides_fallback() {
        let snap = snapshot(json!({"model_id": "llama3:8b"}));
        let inv = resolve_invocation("gpt-4.1", &snap, &HashMap::new()).unwrap();
        assert_eq!(inv.model_id, "llama3:8b");
        assert_eq!(inv.vendor, Vendor::Local);
    }
}
