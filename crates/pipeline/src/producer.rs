// crates/pipeline/src/producer.rs
//! Producer registration: manifests, auth contexts, and lifecycle
//! status for third-party plugins.
//!
//! A producer registers a manifest and receives an `AuthContext` bound
//! to the manifest's security hash. Submissions carry the context; a
//! hash mismatch (tampered manifest) flips the producer to
//! `SecurityViolation` and everything it sends is refused.

use std::collections::HashMap;

use redline_types::{ProducerPolicy, ValidationError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

/// Declared abilities of a producer plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerCapabilities {
    #[serde(default)]
    pub operations: Vec<String>,
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub max_batch_size: usize,
    #[serde(default)]
    pub supports_realtime: bool,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Registration manifest submitted by a producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerManifest {
    pub plugin_id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: ProducerCapabilities,
}

impl ProducerManifest {
    /// Deterministic hash of the manifest contents.
    pub fn security_hash(&self) -> String {
        let canonical = serde_json::to_vec(self).expect("manifest serializes");
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerStatus {
    Pending,
    Active,
    Suspended,
    Deactivated,
    SecurityViolation,
    VersionIncompatible,
}

/// Credential handed back at registration; submissions must carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub plugin_id: String,
    pub token: String,
    pub security_hash: String,
}

#[derive(Debug, Clone)]
struct Registered {
    manifest: ProducerManifest,
    status: ProducerStatus,
    token: String,
    security_hash: String,
    policy: ProducerPolicy,
}

/// Oldest supported manifest version (major).
const MIN_SUPPORTED_MAJOR: u32 = 1;

#[derive(Debug, Default)]
pub struct ProducerRegistry {
    producers: HashMap<String, Registered>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    /// Register (or re-register) a producer. Incompatible versions are
    /// recorded but receive no usable credential.
    pub fn register(
        &mut self,
        manifest: ProducerManifest,
        policy: ProducerPolicy,
    ) -> Result<AuthContext, ValidationError> {
        let major = manifest
            .version
            .split('.')
            .next()
            .and_then(|v| v.parse::<u32>().ok());
        let status = match major {
            Some(major) if major >= MIN_SUPPORTED_MAJOR => ProducerStatus::Active,
            _ => ProducerStatus::VersionIncompatible,
        };
        if status == ProducerStatus::VersionIncompatible {
            warn!(plugin = %manifest.plugin_id, version = %manifest.version, "incompatible producer version");
            self.producers.insert(
                manifest.plugin_id.clone(),
                Registered {
                    security_hash: manifest.security_hash(),
                    token: String::new(),
                    status,
                    policy,
                    manifest,
                },
            );
            return Err(ValidationError::Unauthorized {
                producer: "incompatible version".into(),
            });
        }

        let token = Uuid::new_v4().to_string();
        let security_hash = manifest.security_hash();
        let context = AuthContext {
            plugin_id: manifest.plugin_id.clone(),
            token: token.clone(),
            security_hash: security_hash.clone(),
        };
        info!(plugin = %manifest.plugin_id, version = %manifest.version, "producer registered");
        self.producers.insert(
            manifest.plugin_id.clone(),
            Registered {
                manifest,
                status,
                token,
                security_hash,
                policy,
            },
        );
        Ok(context)
    }

    pub fn status(&self, plugin_id: &str) -> Option<ProducerStatus> {
        self.producers.get(plugin_id).map(|p| p.status)
    }

    pub fn set_status(&mut self, plugin_id: &str, status: ProducerStatus) {
        if let Some(producer) = self.producers.get_mut(plugin_id) {
            producer.status = status;
        }
    }

    pub fn manifest(&self, plugin_id: &str) -> Option<&ProducerManifest> {
        self.producers.get(plugin_id).map(|p| &p.manifest)
    }

    pub fn policy(&self, plugin_id: &str) -> Option<&ProducerPolicy> {
        self.producers.get(plugin_id).map(|p| &p.policy)
    }

    pub fn set_policy(&mut self, plugin_id: &str, policy: ProducerPolicy) {
        if let Some(producer) = self.producers.get_mut(plugin_id) {
            producer.policy = policy;
        }
    }

    /// Verify a submission credential. A wrong token is plain
    /// unauthorized; a wrong hash marks the producer compromised.
    pub fn verify(&mut self, auth: &AuthContext) -> Result<(), ValidationError> {
        let unauthorized = || ValidationError::Unauthorized {
            producer: auth.plugin_id.clone(),
        };
        let Some(producer) = self.producers.get_mut(&auth.plugin_id) else {
            return Err(unauthorized());
        };
        match producer.status {
            ProducerStatus::Active => {}
            ProducerStatus::Pending
            | ProducerStatus::Suspended
            | ProducerStatus::Deactivated
            | ProducerStatus::SecurityViolation
            | ProducerStatus::VersionIncompatible => return Err(unauthorized()),
        }
        if producer.token != auth.token {
            return Err(unauthorized());
        }
        if producer.security_hash != auth.security_hash {
            warn!(plugin = %auth.plugin_id, "security hash mismatch; producer locked out");
            producer.status = ProducerStatus::SecurityViolation;
            return Err(unauthorized());
        }
        Ok(())
    }
}
