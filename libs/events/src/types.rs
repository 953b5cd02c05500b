//! Event type names, value types, and payloads.
//!
//! Payloads are versioned through the envelope's `event_version`; all
//! payloads defined here are version 1.

use serde::{Deserialize, Serialize};

// =============================================================================
// Event Type Constants
// =============================================================================

/// All event type names as constants.
pub mod event_types {
    // Target
    pub const TARGET_ADDED: &str = "target.added";
    pub const TARGET_CHANGED: &str = "target.changed";
    pub const TARGET_REMOVED: &str = "target.removed";

    // Execution
    pub const EXECUTION_SET: &str = "execution.set";
    pub const EXECUTION_REMOVED: &str = "execution.removed";

    // Web Key
    pub const WEB_KEY_ADDED: &str = "web_key.added";
    pub const WEB_KEY_ACTIVATED: &str = "web_key.activated";
    pub const WEB_KEY_DEACTIVATED: &str = "web_key.deactivated";
    pub const WEB_KEY_REMOVED: &str = "web_key.removed";
}

// =============================================================================
// Crypto Values
// =============================================================================

/// What a [`CryptoValue`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CryptoType {
    Encryption,
    Hash,
}

/// Ciphertext together with the parameters needed to decrypt it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoValue {
    pub crypto_type: CryptoType,
    pub algorithm: String,
    /// ID of the encryption key that produced `crypted`.
    pub key_id: String,
    #[serde(with = "base64_bytes")]
    pub crypted: Vec<u8>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Targets
// =============================================================================

/// How a target endpoint is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// Called synchronously; the response is ignored.
    Webhook,
    /// Called synchronously; the response replaces the payload.
    Call,
    /// Fire and forget.
    Async,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetAddedPayload {
    pub name: String,
    pub target_type: TargetType,
    pub endpoint: String,
    pub timeout_ms: u64,
    pub interrupt_on_error: bool,
    /// Key used to sign requests sent to the endpoint.
    pub signing_key: CryptoValue,
}

/// Carries only the fields that differ from the previous state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetChangedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<TargetType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_on_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<CryptoValue>,
}

impl TargetChangedPayload {
    /// True when no field changed.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRemovedPayload {
    pub name: String,
}

// =============================================================================
// Executions
// =============================================================================

/// Whether an execution entry calls a target or delegates to another
/// execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTargetKind {
    Target,
    Include,
}

/// One entry of an execution's ordered target list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionTarget {
    #[serde(rename = "type")]
    pub kind: ExecutionTargetKind,
    /// Target ID, or execution ID for includes.
    pub target: String,
}

impl ExecutionTarget {
    pub fn target(id: impl Into<String>) -> Self {
        Self {
            kind: ExecutionTargetKind::Target,
            target: id.into(),
        }
    }

    pub fn include(execution_id: impl Into<String>) -> Self {
        Self {
            kind: ExecutionTargetKind::Include,
            target: execution_id.into(),
        }
    }

    pub fn is_include(&self) -> bool {
        self.kind == ExecutionTargetKind::Include
    }
}

/// Replaces the execution's target list. An empty list is allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSetPayload {
    pub targets: Vec<ExecutionTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRemovedPayload {}

// =============================================================================
// Web Keys
// =============================================================================

/// NIST curves available for ECDSA web keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EllipticCurve {
    #[serde(rename = "P-256")]
    P256,
    #[serde(rename = "P-384")]
    P384,
}

impl EllipticCurve {
    /// JWK `crv` name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EllipticCurve::P256 => "P-256",
            EllipticCurve::P384 => "P-384",
        }
    }
}

/// Key generation parameters, persisted with the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebKeyConfig {
    Ed25519,
    Ecdsa { curve: EllipticCurve },
}

impl WebKeyConfig {
    /// JOSE algorithm name of keys generated with this config.
    pub const fn algorithm(&self) -> &'static str {
        match self {
            WebKeyConfig::Ed25519 => "EdDSA",
            WebKeyConfig::Ecdsa {
                curve: EllipticCurve::P256,
            } => "ES256",
            WebKeyConfig::Ecdsa {
                curve: EllipticCurve::P384,
            } => "ES384",
        }
    }
}

impl Default for WebKeyConfig {
    fn default() -> Self {
        WebKeyConfig::Ed25519
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyUsage {
    #[serde(rename = "sig")]
    Signing,
}

/// Public half of a web key, in JWK field naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyMaterial {
    #[serde(rename = "kid")]
    pub key_id: String,
    #[serde(rename = "alg")]
    pub algorithm: String,
    #[serde(rename = "use")]
    pub usage: KeyUsage,
    #[serde(rename = "kty")]
    pub key_type: String,
    #[serde(rename = "crv")]
    pub curve: String,
    /// Base64url encoded public key, or its x coordinate for EC keys.
    pub x: String,
    /// Base64url encoded y coordinate; EC keys only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebKeyAddedPayload {
    pub private_key: CryptoValue,
    pub public_key: PublicKeyMaterial,
    pub config: WebKeyConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebKeyActivatedPayload {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebKeyDeactivatedPayload {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebKeyRemovedPayload {}

// =============================================================================
// Tests
// =============================================================================
