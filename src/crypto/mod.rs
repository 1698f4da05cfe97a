//! The crypto boundary.
//!
//! Passhold never encrypts anything itself. Passwords cross into an external
//! provider through [`CryptoProvider`]; the GnuPG command-line implementation
//! lives in [`crate::gpg`]. Only the `password` field of a credential is ever
//! passed through this boundary.
//!
//! Passphrase checking is opaque to this layer (it belongs to the private key),
//! so [`CryptoProvider::verify_passphrase`] proves a passphrase by round-tripping
//! a fixed sentinel before any real record is decrypted.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use thiserror::Error;

use crate::models::SensitiveString;

/// Plaintext encrypted and decrypted to prove a passphrase
pub const PASSPHRASE_SENTINEL: &str = "OK";

/// Crypto boundary errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("crypto provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("decryption failed: {0}")]
    DecryptionError(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("key management failed: {0}")]
    KeyManagement(String),

    #[error("no recipient configured and none found in the keyring")]
    NoRecipient,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// An asymmetric encryption provider bound to recipients
pub trait CryptoProvider {
    /// Encrypt `plaintext` to `recipient`, returning armored ciphertext
    fn encrypt(&self, plaintext: &str, recipient: &str) -> CryptoResult<String>;

    /// Decrypt `ciphertext` with the recipient's private key unlocked by `passphrase`
    fn decrypt(
        &self,
        ciphertext: &str,
        recipient: &str,
        passphrase: &str,
    ) -> CryptoResult<SensitiveString>;

    /// Fail with [`CryptoError::DecryptionError`] unless `passphrase` unlocks `recipient`
    fn verify_passphrase(&self, recipient: &str, passphrase: &str) -> CryptoResult<()> {
        let ciphertext = self.encrypt(PASSPHRASE_SENTINEL, recipient)?;
        let plaintext = self.decrypt(&ciphertext, recipient, passphrase)?;

        if plaintext.expose() != PASSPHRASE_SENTINEL {
            return Err(CryptoError::DecryptionError("wrong passphrase".to_string()));
        }
        Ok(())
    }

    /// Recipient to use when none is configured
    fn default_recipient(&self) -> CryptoResult<Option<String>> {
        Ok(None)
    }
}

impl<P: CryptoProvider + ?Sized> CryptoProvider for Box<P> {
    fn encrypt(&self, plaintext: &str, recipient: &str) -> CryptoResult<String> {
        (**self).encrypt(plaintext, recipient)
    }

    fn decrypt(
        &self,
        ciphertext: &str,
        recipient: &str,
        passphrase: &str,
    ) -> CryptoResult<SensitiveString> {
        (**self).decrypt(ciphertext, recipient, passphrase)
    }

    fn verify_passphrase(&self, recipient: &str, passphrase: &str) -> CryptoResult<()> {
        (**self).verify_passphrase(recipient, passphrase)
    }

    fn default_recipient(&self) -> CryptoResult<Option<String>> {
        (**self).default_recipient()
    }
}

/// Random password generator over letters and digits, plus symbols unless disabled
#[derive(Debug, Clone)]
pub struct PasswordGenerator {
    length: usize,
    use_symbols: bool,
    exclude_ambiguous: bool,
}

impl Default for PasswordGenerator {
    fn default() -> Self {
        Self {
            length: 32,
            use_symbols: true,
            exclude_ambiguous: false,
        }
    }
}

impl PasswordGenerator {
    const ALPHANUMERIC: &'static str =
        "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    const SYMBOLS: &'static str = "=+_*!?&%$#";
    const AMBIGUOUS: &'static str = "0O1lI";

    pub fn new(length: usize) -> Self {
        Self {
            length,
            ..Default::default()
        }
    }

    pub fn with_symbols(mut self, use_it: bool) -> Self {
        self.use_symbols = use_it;
        self
    }

    pub fn exclude_ambiguous(mut self, exclude: bool) -> Self {
        self.exclude_ambiguous = exclude;
        self
    }

    fn charset(&self) -> Vec<char> {
        let symbols = if self.use_symbols { Self::SYMBOLS } else { "" };

        Self::ALPHANUMERIC
            .chars()
            .chain(symbols.chars())
            .filter(|c| !(self.exclude_ambiguous && Self::AMBIGUOUS.contains(*c)))
            .collect()
    }

    pub fn generate(&self) -> SensitiveString {
        let charset = self.charset();
        let mut rng = OsRng;

        let password: String = (0..self.length)
            .filter_map(|_| charset.choose(&mut rng))
            .collect();

        SensitiveString::new(password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reversible stand-in: "ciphertext" is the plaintext reversed, tagged with
    /// the recipient, and only `passphrase` opens it.
    struct MirrorProvider {
        passphrase: &'static str,
    }

    impl CryptoProvider for MirrorProvider {
        fn encrypt(&self, plaintext: &str, recipient: &str) -> CryptoResult<String> {
            Ok(format!("{}:{}", recipient, plaintext.chars().rev().collect::<String>()))
        }

        fn decrypt(
            &self,
            ciphertext: &str,
            recipient: &str,
            passphrase: &str,
        ) -> CryptoResult<SensitiveString> {
            if passphrase != self.passphrase {
                return Err(CryptoError::DecryptionError("bad passphrase".to_string()));
            }
            let body = ciphertext
                .strip_prefix(&format!("{}:", recipient))
                .ok_or_else(|| CryptoError::DecryptionError("wrong recipient".to_string()))?;
            Ok(SensitiveString::new(body.chars().rev().collect::<String>()))
        }
    }

    /// Decrypts anything to garbage, as a provider with a mismatched key might
    struct GarblingProvider;

    impl CryptoProvider for GarblingProvider {
        fn encrypt(&self, plaintext: &str, _recipient: &str) -> CryptoResult<String> {
            Ok(plaintext.to_string())
        }

        fn decrypt(&self, _: &str, _: &str, _: &str) -> CryptoResult<SensitiveString> {
            Ok(SensitiveString::new(""))
        }
    }

    #[test]
    fn test_verify_passphrase() {
        let provider = MirrorProvider { passphrase: "right" };
        assert!(provider.verify_passphrase("me@local", "right").is_ok());
        assert!(matches!(
            provider.verify_passphrase("me@local", "wrong"),
            Err(CryptoError::DecryptionError(_))
        ));
    }

    #[test]
    fn test_verify_passphrase_detects_bad_round_trip() {
        assert!(matches!(
            GarblingProvider.verify_passphrase("me@local", "any"),
            Err(CryptoError::DecryptionError(_))
        ));
    }

    #[test]
    fn test_boxed_provider_delegates() {
        let provider: Box<dyn CryptoProvider> = Box::new(MirrorProvider { passphrase: "p" });
        let ciphertext = provider.encrypt("secret", "r").unwrap();
        assert_eq!(provider.decrypt(&ciphertext, "r", "p").unwrap().expose(), "secret");
        assert!(provider.default_recipient().unwrap().is_none());
    }

    #[test]
    fn test_password_generator_length() {
        let password = PasswordGenerator::new(24).generate();
        assert_eq!(password.expose().chars().count(), 24);
    }

    #[test]
    fn test_password_generator_without_symbols() {
        let password = PasswordGenerator::new(64).with_symbols(false).generate();
        assert!(password.expose().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_password_generator_has_no_whitespace() {
        let password = PasswordGenerator::new(500).generate();
        assert!(!password.expose().chars().any(char::is_whitespace));
    }

    #[test]
    fn test_password_generator_excludes_ambiguous() {
        let password = PasswordGenerator::new(200).exclude_ambiguous(true).generate();
        assert!(!password.expose().chars().any(|c| "0O1lI".contains(c)));
    }
}
