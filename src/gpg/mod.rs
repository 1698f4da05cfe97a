//! GnuPG support for Passhold
//!
//! [`GpgProvider`] drives the external `gpg2`/`gpg` binary in batch mode. Each
//! store carries its own keypair in `keys.yml`; opening the store imports that
//! bundle into a throwaway keyring that lives exactly as long as the provider.

use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::crypto::{CryptoError, CryptoProvider, CryptoResult};
use crate::models::SensitiveString;
use crate::process::{self, ProcessOutput};

/// Binaries tried in order
const GPG_BINARIES: &[&str] = &["gpg2", "gpg"];

pub const DEFAULT_KEY_LENGTH: u32 = 4096;

/// Armored keypair as stored in a store's `keys.yml`.
///
/// Both halves are `None` when the store encrypts to a recipient from the
/// user's own keyring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBundle {
    #[serde(rename = "PUBLIC")]
    pub public: Option<String>,
    #[serde(rename = "PRIVATE")]
    pub private: Option<String>,
}

impl KeyBundle {
    pub fn new(public: impl Into<String>, private: impl Into<String>) -> Self {
        Self {
            public: Some(public.into()),
            private: Some(private.into()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.public.is_some() && self.private.is_some()
    }

    pub fn from_yaml(text: &str) -> CryptoResult<Self> {
        // an empty keys.yml is a bundle with no keys
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
            .map_err(|e| CryptoError::KeyManagement(format!("malformed keys.yml: {}", e)))
    }

    pub fn to_yaml(&self) -> CryptoResult<String> {
        serde_yaml::to_string(self)
            .map_err(|e| CryptoError::KeyManagement(format!("cannot render keys.yml: {}", e)))
    }
}

/// Crypto provider backed by the `gpg` command line
#[derive(Debug)]
pub struct GpgProvider {
    binary: PathBuf,
    homedir: PathBuf,
    // keeps an imported keyring alive; removed on drop
    _keyring: Option<TempDir>,
}

impl GpgProvider {
    /// Use an existing keyring directory, such as `~/.gnupg`
    pub fn with_homedir(homedir: impl Into<PathBuf>) -> CryptoResult<Self> {
        Ok(Self {
            binary: locate()?,
            homedir: homedir.into(),
            _keyring: None,
        })
    }

    /// Import `bundle` into a fresh temporary keyring
    pub fn from_bundle(bundle: &KeyBundle) -> CryptoResult<Self> {
        let (public, private) = match (&bundle.public, &bundle.private) {
            (Some(public), Some(private)) => (public, private),
            _ => {
                return Err(CryptoError::KeyManagement(
                    "key bundle is missing a public or private key".to_string(),
                ))
            }
        };

        let binary = locate()?;
        let keyring = TempDir::new()?;
        let armored = format!("{}\n{}", public, private);

        let output = gpg_output(
            Command::new(&binary)
                .args(["--no-tty", "--batch", "--homedir"])
                .arg(keyring.path())
                .arg("--import"),
            Some(&armored),
        )?;
        if !output.success {
            return Err(CryptoError::KeyManagement(format!(
                "key import failed: {}",
                output.stderr.trim()
            )));
        }

        debug!("GpgProvider::from_bundle: keyring at {}", keyring.path().display());
        Ok(Self {
            binary,
            homedir: keyring.path().to_path_buf(),
            _keyring: Some(keyring),
        })
    }

    pub fn homedir(&self) -> &Path {
        &self.homedir
    }

    /// Generate a passphrase-protected RSA keypair in a scratch keyring and
    /// return it armored
    pub fn create_keys(passphrase: &str, key_length: u32) -> CryptoResult<KeyBundle> {
        let binary = locate()?;
        let scratch = TempDir::new()?;

        debug!("GpgProvider::create_keys: generating {}-bit RSA key", key_length);
        let output = gpg_output(
            Command::new(&binary)
                .args(["--batch", "--no-tty", "--homedir"])
                .arg(scratch.path())
                .arg("--gen-key"),
            Some(&key_input(passphrase, key_length)),
        )?;
        if !output.success {
            return Err(CryptoError::KeyManagement(format!(
                "key generation failed: {}",
                output.stderr.trim()
            )));
        }

        let public = export_keys(&binary, scratch.path(), None)?;
        let private = export_keys(&binary, scratch.path(), Some(passphrase))?;
        Ok(KeyBundle::new(public, private))
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(["--batch", "--no-tty", "--always-trust", "--homedir"]);
        command.arg(&self.homedir);
        command
    }
}

impl CryptoProvider for GpgProvider {
    fn encrypt(&self, plaintext: &str, recipient: &str) -> CryptoResult<String> {
        let output = gpg_output(
            self.command()
                .args(["--armor", "--recipient", recipient, "--encrypt"]),
            Some(plaintext),
        )?;

        if !output.success {
            return Err(CryptoError::EncryptionFailed(output.stderr.trim().to_string()));
        }
        Ok(output.stdout)
    }

    fn decrypt(
        &self,
        ciphertext: &str,
        _recipient: &str,
        passphrase: &str,
    ) -> CryptoResult<SensitiveString> {
        let output = gpg_output(
            self.command().args([
                "--pinentry-mode",
                "loopback",
                "--passphrase",
                passphrase,
                "-o",
                "-",
                "-d",
                "-",
            ]),
            Some(ciphertext),
        )?;

        if !output.success {
            return Err(CryptoError::DecryptionError(output.stderr.trim().to_string()));
        }
        Ok(SensitiveString::new(output.stdout))
    }

    fn default_recipient(&self) -> CryptoResult<Option<String>> {
        let output = gpg_output(
            self.command()
                .args(["--list-public-keys", "--with-colons"]),
            None,
        )?;

        if !output.success {
            return Err(CryptoError::KeyManagement(output.stderr.trim().to_string()));
        }
        Ok(first_fingerprint(&output.stdout))
    }
}

fn locate() -> CryptoResult<PathBuf> {
    process::which(GPG_BINARIES).ok_or_else(|| {
        CryptoError::ProviderUnavailable("neither gpg2 nor gpg found on PATH".to_string())
    })
}

/// Run a gpg command; a binary that vanished since `locate` is still "unavailable"
fn gpg_output(command: &mut Command, input: Option<&str>) -> CryptoResult<ProcessOutput> {
    process::run(command, input).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CryptoError::ProviderUnavailable(e.to_string()),
        _ => CryptoError::Io(e),
    })
}

/// Public keys, or secret keys when the unlocking `passphrase` is given
fn export_keys(binary: &Path, homedir: &Path, passphrase: Option<&str>) -> CryptoResult<String> {
    let mut command = Command::new(binary);
    command
        .args(["--batch", "--no-tty", "--homedir"])
        .arg(homedir);

    match passphrase {
        // gpg2 asks the agent to unlock secret keys before exporting them
        Some(passphrase) => command
            .args(["--pinentry-mode", "loopback", "--passphrase", passphrase])
            .arg("--export-secret-keys"),
        None => command.arg("--export"),
    };
    command.args(["--armor", "-o", "-"]);

    let output = gpg_output(&mut command, None)?;
    if !output.success || output.stdout.trim().is_empty() {
        return Err(CryptoError::KeyManagement(format!(
            "key export failed: {}",
            output.stderr.trim()
        )));
    }
    Ok(output.stdout)
}

/// Batch key generation parameters
fn key_input(passphrase: &str, key_length: u32) -> String {
    let protection = if passphrase.is_empty() {
        "%no-protection".to_string()
    } else {
        format!("Passphrase: {}", passphrase)
    };

    format!(
        "Key-Type: RSA\n\
         Key-Length: {length}\n\
         Subkey-Type: RSA\n\
         Subkey-Length: {length}\n\
         Name-Real: Passhold\n\
         Name-Comment: Auto-generated by Passhold\n\
         Name-Email: passhold@local\n\
         Expire-Date: 0\n\
         {protection}\n\
         %commit\n",
        length = key_length,
        protection = protection,
    )
}

/// First `fpr` record of a `--with-colons` key listing
fn first_fingerprint(listing: &str) -> Option<String> {
    listing
        .lines()
        .filter(|line| line.starts_with("fpr:"))
        .filter_map(|line| line.split(':').nth(9))
        .find(|fpr| !fpr.is_empty())
        .map(str::to_string)
}
