use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SyncError};

/// Default per-request timeout for a connection, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

// ── Connection ────────────────────────────────────────────────────────────────

/// Kind of remote endpoint a connection talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionType {
    /// Bark-style push webhook accepting a JSON POST.
    #[default]
    Bark,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Bark => f.write_str("Bark"),
        }
    }
}

impl FromStr for ConnectionType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bark" => Ok(ConnectionType::Bark),
            other => Err(SyncError::InvalidConnection(format!(
                "unsupported connection type: {other}"
            ))),
        }
    }
}

/// Symmetric cipher applied to an outbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherMode {
    #[serde(rename = "AES-128-CBC")]
    Aes128Cbc,
    #[serde(rename = "AES-128-ECB")]
    Aes128Ecb,
    #[serde(rename = "AES-256-CBC")]
    Aes256Cbc,
    #[serde(rename = "AES-256-ECB")]
    Aes256Ecb,
}

impl CipherMode {
    /// All supported modes, in display order.
    pub const ALL: [CipherMode; 4] = [
        CipherMode::Aes128Cbc,
        CipherMode::Aes128Ecb,
        CipherMode::Aes256Cbc,
        CipherMode::Aes256Ecb,
    ];

    /// Canonical wire name, e.g. `"AES-128-CBC"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherMode::Aes128Cbc => "AES-128-CBC",
            CipherMode::Aes128Ecb => "AES-128-ECB",
            CipherMode::Aes256Cbc => "AES-256-CBC",
            CipherMode::Aes256Ecb => "AES-256-ECB",
        }
    }

    /// Key length in bytes (16 or 32).
    pub fn key_len(&self) -> usize {
        match self {
            CipherMode::Aes128Cbc | CipherMode::Aes128Ecb => 16,
            CipherMode::Aes256Cbc | CipherMode::Aes256Ecb => 32,
        }
    }

    /// Whether the block-chaining mode needs an initialisation vector.
    pub fn requires_iv(&self) -> bool {
        matches!(self, CipherMode::Aes128Cbc | CipherMode::Aes256Cbc)
    }
}

impl fmt::Display for CipherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        CipherMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SyncError::InvalidConnection(format!("unsupported cipher mode: {s}")))
    }
}

/// Encryption settings attached to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Encryption {
    pub cipher_mode: CipherMode,
    pub key: String,
    /// Initialisation vector; only meaningful for CBC modes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
}

/// One configured forwarding target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Unique key within the connection set.
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub connection_type: ConnectionType,
    /// Endpoint URL the payload is POSTed to.
    pub address: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<Encryption>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Connection {
    /// Create an enabled, unencrypted Bark connection.
    pub fn bark(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection_type: ConnectionType::Bark,
            address: address.into(),
            enabled: true,
            encryption: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Attach encryption settings.
    pub fn with_encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Check the record's invariants.
    ///
    /// Runs when a connection is created or one of its fields is updated;
    /// the dispatcher trusts stored records as-is.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SyncError::InvalidConnection(
                "name must not be empty".to_string(),
            ));
        }
        if !(self.address.starts_with("http://") || self.address.starts_with("https://")) {
            return Err(SyncError::InvalidConnection(format!(
                "address must be an http(s) URL: {}",
                self.address
            )));
        }
        if self.timeout_secs == 0 {
            return Err(SyncError::InvalidConnection(
                "timeout must be at least one second".to_string(),
            ));
        }
        if let Some(enc) = &self.encryption {
            crate::crypto::validate_encryption(enc)?;
        }
        Ok(())
    }
}

// ── Field updates ─────────────────────────────────────────────────────────────

/// A typed value for a partial connection update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Bool(bool),
    String(String),
    Int(i64),
}

impl FieldValue {
    /// Short name of the carried type, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Bool(_) => "bool",
            FieldValue::String(_) => "string",
            FieldValue::Int(_) => "int",
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

/// The connection fields that may be updated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionField {
    Enabled,
    Address,
    Type,
    TimeoutSecs,
    CipherMode,
    Key,
    Iv,
}

impl FromStr for ConnectionField {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "enabled" | "enable" => Ok(ConnectionField::Enabled),
            "address" => Ok(ConnectionField::Address),
            "type" | "connectionType" => Ok(ConnectionField::Type),
            "timeoutSecs" | "timeout_secs" => Ok(ConnectionField::TimeoutSecs),
            "cipherMode" | "cipher_mode" => Ok(ConnectionField::CipherMode),
            "key" => Ok(ConnectionField::Key),
            "iv" => Ok(ConnectionField::Iv),
            other => Err(SyncError::UnknownField(other.to_string())),
        }
    }
}

impl ConnectionField {
    fn name(&self) -> &'static str {
        match self {
            ConnectionField::Enabled => "enabled",
            ConnectionField::Address => "address",
            ConnectionField::Type => "type",
            ConnectionField::TimeoutSecs => "timeoutSecs",
            ConnectionField::CipherMode => "cipherMode",
            ConnectionField::Key => "key",
            ConnectionField::Iv => "iv",
        }
    }

    /// Parse a textual value as the kind this field stores.
    pub fn parse_value(&self, raw: &str) -> Result<FieldValue> {
        let mismatch = |expected| SyncError::UnsupportedFieldType {
            field: self.name().to_string(),
            expected,
            found: "string",
        };
        match self {
            ConnectionField::Enabled => raw
                .parse::<bool>()
                .map(FieldValue::Bool)
                .map_err(|_| mismatch("bool")),
            ConnectionField::TimeoutSecs => raw
                .parse::<i64>()
                .map(FieldValue::Int)
                .map_err(|_| mismatch("int")),
            _ => Ok(FieldValue::String(raw.to_string())),
        }
    }

    fn mismatch(&self, expected: &'static str, value: &FieldValue) -> SyncError {
        SyncError::UnsupportedFieldType {
            field: self.name().to_string(),
            expected,
            found: value.kind(),
        }
    }
}

impl Connection {
    /// Apply a single field update, then re-check the record's invariants.
    pub fn apply_field(&mut self, field: ConnectionField, value: FieldValue) -> Result<()> {
        match (field, value) {
            (ConnectionField::Enabled, FieldValue::Bool(v)) => self.enabled = v,
            (ConnectionField::Address, FieldValue::String(v)) => self.address = v,
            (ConnectionField::Type, FieldValue::String(v)) => self.connection_type = v.parse()?,
            (ConnectionField::TimeoutSecs, FieldValue::Int(v)) => {
                self.timeout_secs = u64::try_from(v).map_err(|_| {
                    SyncError::InvalidConnection(format!("timeout must be positive: {v}"))
                })?;
            }
            (
                ConnectionField::CipherMode | ConnectionField::Key | ConnectionField::Iv,
                FieldValue::String(v),
            ) => {
                let enc = self.encryption.as_mut().ok_or_else(|| {
                    SyncError::InvalidConnection(format!(
                        "connection '{}' has no encryption configured",
                        self.name
                    ))
                })?;
                match field {
                    ConnectionField::CipherMode => enc.cipher_mode = v.parse()?,
                    ConnectionField::Key => enc.key = v,
                    _ => enc.iv = Some(v),
                }
            }
            (ConnectionField::Enabled, other) => return Err(field.mismatch("bool", &other)),
            (ConnectionField::TimeoutSecs, other) => return Err(field.mismatch("int", &other)),
            (_, other) => return Err(field.mismatch("string", &other)),
        }
        self.validate()
    }
}

// ── Filter list ───────────────────────────────────────────────────────────────

/// Allow/deny policy over source package identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FilterList {
    /// `true` selects deny-list semantics, `false` allow-list semantics.
    #[serde(rename = "blackList", default)]
    pub deny_list: bool,
    /// Exact-match package identifiers.
    #[serde(rename = "pkgNames", default)]
    pub packages: BTreeSet<String>,
}

impl FilterList {
    pub fn allow<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deny_list: false,
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }

    pub fn deny<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deny_list: true,
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }

    /// Human-readable mode name.
    pub fn mode_name(&self) -> &'static str {
        if self.deny_list {
            "deny"
        } else {
            "allow"
        }
    }
}

// ── Inbound notification ──────────────────────────────────────────────────────

/// A captured system notification awaiting forwarding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundNotification {
    #[serde(alias = "package")]
    pub source_package: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "Utc::now")]
    pub posted_at: DateTime<Utc>,
}

impl InboundNotification {
    pub fn new(
        source_package: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            source_package: source_package.into(),
            title: title.into(),
            body: body.into(),
            posted_at: Utc::now(),
        }
    }
}
