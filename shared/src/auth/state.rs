//! # Sealed OAuth State
//!
//! Authenticated encryption of the OAuth `state` parameter.
//!
//! ## Design
//!
//! Instead of storing a CSRF token server-side, the whole flow context is
//! sealed into the `state` value itself: provider name, the client's
//! redirect URI, an optional pre-existing session id (for migrating
//! anonymous activity after sign-in), a random nonce, and a creation
//! timestamp. The callback opens the value, checks freshness, and has
//! everything it needs - no storage, no sticky sessions, horizontally
//! scalable.
//!
//! ## Wire Format
//!
//! ```text
//! base64url( gcm_nonce(12) || ciphertext || tag(16) )
//! ```
//!
//! AES-256-GCM with a random 96-bit nonce prepended to the ciphertext; the
//! plaintext is the JSON encoding of [`StateEnvelope`].
//!
//! ## Failure Policy
//!
//! [`StateManager::open`] returns the single opaque [`StateError::Invalid`]
//! for *every* failure - bad encoding, failed authentication, malformed
//! envelope, missing fields, stale timestamp - so an attacker cannot
//! distinguish tampering from expiry.

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::OAuthStateConfig;

/// GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

/// Random bytes carried inside the envelope, independent of the GCM nonce.
const ENVELOPE_NONCE_LEN: usize = 16;

// =============================================================================
// Errors
// =============================================================================

/// State sealing/opening failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// Opening failed. Deliberately undifferentiated.
    #[error("invalid or expired state")]
    Invalid,

    /// Sealing failed; treated as an internal fault.
    #[error("state sealing failed")]
    Seal,

    /// Key material could not be loaded or generated.
    #[error("state key error: {0}")]
    Key(String),
}

impl From<StateError> for crate::errors::ApiError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Invalid => crate::errors::ApiError::invalid_state(),
            StateError::Seal | StateError::Key(_) => crate::errors::ApiError::Internal {
                message: err.to_string(),
            },
        }
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// The flow context sealed into the `state` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEnvelope {
    /// Provider the flow was initiated for
    pub provider: String,

    /// Client-supplied redirect URI the callback returns to
    pub redirect_uri: String,

    /// Pre-existing anonymous session to migrate after sign-in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Random bytes (hex) making every sealed state unique even for
    /// identical parameters
    pub nonce: String,

    /// Creation time, unix seconds; enforces the validity window
    pub created_at: i64,
}

// =============================================================================
// State Manager
// =============================================================================

/// Seals and opens OAuth state values.
///
/// # Thread Safety
///
/// The key is immutable after construction; the manager is shared behind an
/// `Arc` across workers.
pub struct StateManager {
    /// AES-256-GCM key
    key: LessSafeKey,
    /// CSPRNG for GCM nonces and envelope nonces
    rng: SystemRandom,
    /// How long a sealed state stays valid
    ttl: chrono::Duration,
}

impl StateManager {
    /// Creates a manager from configuration.
    ///
    /// The key is the base64-decoded `OAUTH_STATE_KEY`; when absent a random
    /// key is generated, which silently invalidates states sealed before a
    /// restart (acceptable for development).
    pub fn from_config(config: &OAuthStateConfig) -> Result<Self, StateError> {
        let key_bytes: [u8; 32] = match &config.state_key {
            Some(encoded) => {
                let decoded = general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| StateError::Key(format!("invalid base64: {}", e)))?;
                decoded
                    .try_into()
                    .map_err(|_| StateError::Key("state key must be 32 bytes".to_string()))?
            }
            None => {
                tracing::warn!(
                    "OAUTH_STATE_KEY not configured; generating an ephemeral state key. \
                     In-flight OAuth flows will not survive a restart."
                );
                let rng = SystemRandom::new();
                let mut bytes = [0u8; 32];
                rng.fill(&mut bytes)
                    .map_err(|_| StateError::Key("rng failure".to_string()))?;
                bytes
            }
        };

        Self::new(&key_bytes, config.state_ttl())
    }

    /// Creates a manager from a raw 32-byte key.
    pub fn new(key_bytes: &[u8; 32], ttl: chrono::Duration) -> Result<Self, StateError> {
        let unbound = UnboundKey::new(&AES_256_GCM, key_bytes)
            .map_err(|_| StateError::Key("invalid AES-256-GCM key".to_string()))?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
            ttl,
        })
    }

    // =========================================================================
    // Seal
    // =========================================================================

    /// Seals a fresh state value for an OAuth initiation.
    ///
    /// Populates a random envelope nonce and the current timestamp, then
    /// encrypts. The result is URL-safe and carried verbatim through the
    /// provider as the `state` query parameter.
    pub fn seal(
        &self,
        provider: &str,
        redirect_uri: &str,
        session_id: Option<String>,
    ) -> Result<String, StateError> {
        let mut nonce_extra = [0u8; ENVELOPE_NONCE_LEN];
        self.rng.fill(&mut nonce_extra).map_err(|_| StateError::Seal)?;

        let envelope = StateEnvelope {
            provider: provider.to_string(),
            redirect_uri: redirect_uri.to_string(),
            session_id,
            nonce: hex::encode(nonce_extra),
            created_at: Utc::now().timestamp(),
        };

        self.seal_envelope(&envelope)
    }

    /// Seals a fully built envelope. Shared with tests that need control
    /// over `created_at`.
    fn seal_envelope(&self, envelope: &StateEnvelope) -> Result<String, StateError> {
        let mut plaintext = serde_json::to_vec(envelope).map_err(|_| StateError::Seal)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce_bytes).map_err(|_| StateError::Seal)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut plaintext)
            .map_err(|_| StateError::Seal)?;

        // Prepend the nonce so the value is self-contained
        let mut combined = nonce_bytes.to_vec();
        combined.extend(plaintext);

        Ok(general_purpose::URL_SAFE_NO_PAD.encode(combined))
    }

    // =========================================================================
    // Open
    // =========================================================================

    /// Opens a sealed state value.
    ///
    /// Rejects anything that fails decoding, authentication, or parsing;
    /// envelopes with an empty provider or redirect URI; and envelopes older
    /// than the validity window. All failures are [`StateError::Invalid`].
    pub fn open(&self, sealed: &str) -> Result<StateEnvelope, StateError> {
        let combined = general_purpose::URL_SAFE_NO_PAD
            .decode(sealed)
            .map_err(|_| StateError::Invalid)?;

        if combined.len() < NONCE_LEN + TAG_LEN {
            return Err(StateError::Invalid);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::assume_unique_for_key(
            nonce_bytes.try_into().map_err(|_| StateError::Invalid)?,
        );

        let mut buffer = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut buffer)
            .map_err(|_| StateError::Invalid)?;

        let envelope: StateEnvelope =
            serde_json::from_slice(plaintext).map_err(|_| StateError::Invalid)?;

        if envelope.provider.is_empty() || envelope.redirect_uri.is_empty() {
            return Err(StateError::Invalid);
        }

        let age = Utc::now().timestamp() - envelope.created_at;
        if age > self.ttl.num_seconds() {
            return Err(StateError::Invalid);
        }

        Ok(envelope)
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
