use crate::pk::{PkDecryption, PkEncryption, PkSigning, Utility};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};
use vodozemac::megolm::{
    ExportedSessionKey, GroupSession, InboundGroupSession, MegolmMessage, SessionConfig,
    SessionKey,
};
use vodozemac::olm::{self, Account, Session};
use vodozemac::Curve25519PublicKey;

const PROBE_PLAINTEXT: &str = "river-encryption-probe";

/// Gatekeeper for the primitive library. Every factory fails with
/// [`Error::Uninitialized`] until [`EncryptionDelegate::init`] has succeeded.
pub struct EncryptionDelegate {
    initialized: AtomicBool,
    init_lock: Mutex<()>,
}

impl EncryptionDelegate {
    pub fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        }
    }

    /// Idempotent. The flag is only set once a round trip through the
    /// primitives has produced the expected output.
    pub fn init(&self) -> Result<()> {
        self.init_with_probe(probe_primitives)
    }

    pub(crate) fn init_with_probe<F>(&self, probe: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        if self.is_initialized() {
            return Ok(());
        }

        let _guard = self
            .init_lock
            .lock()
            .map_err(|_| Error::InitFailed("init lock poisoned".to_string()))?;
        if self.is_initialized() {
            return Ok(());
        }

        probe()?;
        self.initialized.store(true, Ordering::SeqCst);
        info!("encryption delegate initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::Uninitialized)
        }
    }

    pub fn create_account(&self) -> Result<Account> {
        self.ensure_initialized()?;
        Ok(Account::new())
    }

    /// Outbound one-to-one session towards `their_identity_key`, using one of
    /// their one-time or fallback keys.
    pub fn create_session(
        &self,
        account: &Account,
        their_identity_key: &str,
        their_one_time_key: &str,
    ) -> Result<Session> {
        self.ensure_initialized()?;
        let identity_key = Curve25519PublicKey::from_base64(their_identity_key)
            .map_err(|e| Error::InvalidKey(format!("identity key: {e}")))?;
        let one_time_key = Curve25519PublicKey::from_base64(their_one_time_key)
            .map_err(|e| Error::InvalidKey(format!("one-time key: {e}")))?;
        Ok(account.create_outbound_session(
            olm::SessionConfig::version_1(),
            identity_key,
            one_time_key,
        ))
    }

    pub fn create_outbound_group_session(&self) -> Result<GroupSession> {
        self.ensure_initialized()?;
        Ok(GroupSession::new(SessionConfig::version_1()))
    }

    pub fn create_inbound_group_session(&self, session_key: &SessionKey) -> Result<InboundGroupSession> {
        self.ensure_initialized()?;
        Ok(InboundGroupSession::new(session_key, SessionConfig::version_1()))
    }

    pub fn import_inbound_group_session(
        &self,
        exported: &ExportedSessionKey,
    ) -> Result<InboundGroupSession> {
        self.ensure_initialized()?;
        Ok(InboundGroupSession::import(exported, SessionConfig::version_1()))
    }

    pub fn create_pk_encryption(&self, recipient_key: &str) -> Result<PkEncryption> {
        self.ensure_initialized()?;
        PkEncryption::new(recipient_key)
    }

    pub fn create_pk_decryption(&self) -> Result<PkDecryption> {
        self.ensure_initialized()?;
        Ok(PkDecryption::new())
    }

    pub fn create_pk_signing(&self) -> Result<PkSigning> {
        self.ensure_initialized()?;
        Ok(PkSigning::new())
    }

    pub fn create_utility(&self) -> Result<Utility> {
        self.ensure_initialized()?;
        Ok(Utility)
    }
}

impl Default for EncryptionDelegate {
    fn default() -> Self {
        Self::new()
    }
}

fn probe_primitives() -> Result<()> {
    let mut outbound = GroupSession::new(SessionConfig::version_1());
    let mut inbound = InboundGroupSession::new(&outbound.session_key(), SessionConfig::version_1());

    let message = outbound.encrypt(PROBE_PLAINTEXT).to_base64();
    let message = MegolmMessage::from_base64(&message)
        .map_err(|e| Error::InitFailed(format!("megolm decode: {e}")))?;
    let decrypted = inbound
        .decrypt(&message)
        .map_err(|e| Error::InitFailed(format!("megolm decrypt: {e}")))?;
    if decrypted.plaintext != PROBE_PLAINTEXT.as_bytes() {
        return Err(Error::InitFailed("megolm round trip mismatch".to_string()));
    }

    let account = Account::new();
    let signature = account.sign(PROBE_PLAINTEXT.as_bytes());
    account
        .ed25519_key()
        .verify(PROBE_PLAINTEXT.as_bytes(), &signature)
        .map_err(|e| Error::InitFailed(format!("ed25519 verify: {e}")))?;

    debug!("primitive probe passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factories_fail_before_init() {
        let delegate = EncryptionDelegate::new();
        assert!(!delegate.is_initialized());
        assert!(matches!(delegate.create_account(), Err(Error::Uninitialized)));
        assert!(matches!(
            delegate.create_outbound_group_session(),
            Err(Error::Uninitialized)
        ));
        assert!(matches!(delegate.create_pk_decryption(), Err(Error::Uninitialized)));
        assert!(matches!(delegate.create_pk_signing(), Err(Error::Uninitialized)));
        assert!(matches!(delegate.create_utility(), Err(Error::Uninitialized)));
    }

    #[test]
    fn init_is_idempotent() {
        let delegate = EncryptionDelegate::new();
        delegate.init().unwrap();
        delegate.init().unwrap();
        assert!(delegate.is_initialized());
        assert!(delegate.create_account().is_ok());
    }

    #[test]
    fn failed_probe_leaves_delegate_uninitialized() {
        let delegate = EncryptionDelegate::new();
        let result =
            delegate.init_with_probe(|| Err(Error::InitFailed("probe said no".to_string())));
        assert!(matches!(result, Err(Error::InitFailed(_))));
        assert!(!delegate.is_initialized());
        assert!(matches!(delegate.create_account(), Err(Error::Uninitialized)));

        // A later successful init recovers.
        delegate.init().unwrap();
        assert!(delegate.is_initialized());
    }

    #[test]
    fn probe_runs_only_once() {
        let delegate = EncryptionDelegate::new();
        delegate.init().unwrap();
        delegate
            .init_with_probe(|| panic!("probe must not run again"))
            .unwrap();
    }

    #[test]
    fn create_session_from_peer_fallback_key() {
        let delegate = EncryptionDelegate::new();
        delegate.init().unwrap();

        let alice = delegate.create_account().unwrap();
        let mut bob = delegate.create_account().unwrap();
        bob.generate_fallback_key();
        let fallback = bob.fallback_key().values().next().copied().unwrap();

        let session = delegate
            .create_session(
                &alice,
                &bob.curve25519_key().to_base64(),
                &fallback.to_base64(),
            )
            .unwrap();
        assert!(!session.session_id().is_empty());

        assert!(matches!(
            delegate.create_session(&alice, "bad", &fallback.to_base64()),
            Err(Error::InvalidKey(_))
        ));
    }
}
