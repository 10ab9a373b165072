//! Bearer credential handling.
//!
//! The credential is published over a `watch` channel so the sync client
//! notices refreshes. A change while connected forces a new handshake; a
//! change after an authentication rejection triggers a new attempt.

use tokio::sync::watch;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Bearer credential. Zeroized on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for putting on the wire.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("len", &self.0.len())
            .finish()
    }
}

/// Source of the current credential.
#[derive(Debug)]
pub struct CredentialProvider {
    tx: watch::Sender<Option<Credential>>,
}

impl CredentialProvider {
    pub fn new(initial: Option<Credential>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Publish a refreshed credential.
    pub fn set(&self, credential: Credential) {
        self.tx.send_replace(Some(credential));
    }

    /// Withdraw the credential (sign-out).
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    pub fn current(&self) -> Option<Credential> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.tx.subscribe()
    }
}
