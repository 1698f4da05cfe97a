//! The credential store
//!
//! A [`Store`] ties together one materialised store tree, its configuration,
//! the file-backed storage, a crypto provider and the version-control
//! observers. Every mutation reads the current record set, computes the
//! desired set, persists it through reconciliation, and then notifies the
//! observers. Passwords are encrypted before anything touches the disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use chrono::Utc;
use log::{debug, info, warn};
use tempfile::TempDir;

use crate::archive::{self, SourceFormat, CONFIG_FILE, KEYS_FILE, MARKER_FILE};
use crate::config::Config;
use crate::crypto::{CryptoError, CryptoProvider, CryptoResult};
use crate::export::{ExportDocument, ExportRecord};
use crate::git::{Commit, GitError, GitObserver, MutationObserver, RemoteSpec, Repository};
use crate::gpg::{GpgProvider, KeyBundle};
use crate::import;
use crate::models::{check_key, split_fullname, Credential, CredentialChanges, SensitiveString};
use crate::search;
use crate::storage::FileStorage;
use crate::{PassholdError, PassholdResult};

/// Options for [`Store::init`]
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub format: SourceFormat,
    /// Encrypt to this recipient instead of generating store keys
    pub recipient: Option<String>,
    /// Protects generated keys; required unless `recipient` is set
    pub passphrase: Option<SensitiveString>,
    pub key_length: u32,
    pub git: bool,
    /// Replace whatever already exists at the destination
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            format: SourceFormat::default(),
            recipient: None,
            passphrase: None,
            key_length: crate::gpg::DEFAULT_KEY_LENGTH,
            git: true,
            force: false,
        }
    }
}

/// Outcome of [`Store::import`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Outcome of [`Store::sync`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// The tree was packed back over its archive
    pub packed: bool,
    pub pushed: bool,
    /// Problems that left changes unpublished
    pub warnings: Vec<String>,
}

/// Stands in for a provider that could not be started, so the store can
/// still be listed and searched
#[derive(Debug)]
struct UnavailableProvider(String);

impl CryptoProvider for UnavailableProvider {
    fn encrypt(&self, _plaintext: &str, _recipient: &str) -> CryptoResult<String> {
        Err(CryptoError::ProviderUnavailable(self.0.clone()))
    }

    fn decrypt(&self, _: &str, _: &str, _: &str) -> CryptoResult<SensitiveString> {
        Err(CryptoError::ProviderUnavailable(self.0.clone()))
    }
}

/// An open credential store
pub struct Store {
    source: String,
    format: SourceFormat,
    root: PathBuf,
    // owns the extracted or cloned tree of non-directory sources
    _workspace: Option<TempDir>,
    config: Config,
    storage: FileStorage,
    provider: Box<dyn CryptoProvider>,
    recipient: Option<String>,
    passphrase: Option<SensitiveString>,
    observers: Vec<Box<dyn MutationObserver>>,
}

impl Store {
    /// Open the store named by `config.database` with the GnuPG provider
    pub fn open(config: Config) -> PassholdResult<Self> {
        let opened = archive::materialize(&config.database_source())?;
        let config = config.with_store_file(&opened.root.join(CONFIG_FILE))?;

        let provider: Box<dyn CryptoProvider> = match gpg_provider(&opened.root, &config) {
            Ok(provider) => Box::new(provider),
            Err(CryptoError::ProviderUnavailable(reason)) => {
                warn!("encryption unavailable: {}", reason);
                Box::new(UnavailableProvider(reason))
            }
            Err(e) => return Err(e.into()),
        };

        Self::assemble(config, opened, provider)
    }

    /// Open the store named by `config.database` with a caller-supplied provider
    pub fn open_with(config: Config, provider: Box<dyn CryptoProvider>) -> PassholdResult<Self> {
        let opened = archive::materialize(&config.database_source())?;
        let config = config.with_store_file(&opened.root.join(CONFIG_FILE))?;
        Self::assemble(config, opened, provider)
    }

    fn assemble(
        config: Config,
        opened: archive::Materialized,
        provider: Box<dyn CryptoProvider>,
    ) -> PassholdResult<Self> {
        let recipient = match &config.recipient {
            Some(recipient) => Some(recipient.clone()),
            None => provider.default_recipient().unwrap_or_else(|e| {
                debug!("Store::open: no default recipient: {}", e);
                None
            }),
        };

        let mut observers: Vec<Box<dyn MutationObserver>> = Vec::new();
        if config.git {
            observers.push(Box::new(GitObserver));
        }

        info!("opened {} store at {}", opened.format, opened.root.display());

        Ok(Self {
            source: config.database_source(),
            format: opened.format,
            storage: FileStorage::new(&opened.root, config.extension.as_str()),
            root: opened.root,
            _workspace: opened.workspace,
            config,
            provider,
            recipient,
            passphrase: None,
            observers,
        })
    }

    /// Create a new store at `dest`.
    ///
    /// The tree is assembled in a temporary directory beside `dest` and only
    /// moved or packed into place once complete.
    pub fn init(dest: &Path, options: InitOptions) -> PassholdResult<()> {
        if dest.exists() {
            if !options.force {
                return Err(PassholdError::AlreadyExists(dest.to_path_buf()));
            }
            if dest.is_dir() {
                fs::remove_dir_all(dest)?;
            } else {
                fs::remove_file(dest)?;
            }
        }

        let parent = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        let staging = TempDir::new_in(parent)?;
        let tree = staging.path();

        let keys = match (&options.recipient, &options.passphrase) {
            (Some(_), _) => KeyBundle::default(),
            (None, Some(passphrase)) => {
                GpgProvider::create_keys(passphrase.expose(), options.key_length)?
            }
            (None, None) => return Err(PassholdError::PassphraseRequired),
        };
        fs::write(tree.join(KEYS_FILE), keys.to_yaml()?)?;

        let mut settings = Config::default();
        settings.recipient = options.recipient.clone();
        settings.write_store_file(&tree.join(CONFIG_FILE))?;
        fs::write(tree.join(MARKER_FILE), "")?;

        if options.git {
            let repo = Repository::new(tree);
            match repo.init().and_then(|_| repo.commit("Initialize database")) {
                Ok(()) => {}
                Err(e) if e.is_skipped() => debug!("Store::init: git skipped: {}", e),
                Err(e) => warn!("version control warning: {}", e),
            }
        }

        // a git-backed store is a plain directory at creation time
        let format = match options.format {
            SourceFormat::Git => SourceFormat::Dir,
            format => format,
        };
        archive::pack(tree, dest, format)?;

        info!("initialized {} store at {}", format, dest.display());
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    pub fn add_observer(&mut self, observer: Box<dyn MutationObserver>) {
        self.observers.push(observer);
    }

    /// Every stored credential, unordered
    pub fn credentials(&self) -> PassholdResult<Vec<Credential>> {
        Ok(self.storage.read()?)
    }

    /// Store a new credential with `password` encrypted.
    ///
    /// An existing credential with the same key is replaced only when `force`
    /// is set.
    pub fn add(
        &self,
        fullname: &str,
        password: &str,
        comment: &str,
        force: bool,
    ) -> PassholdResult<Credential> {
        self.add_many(&[fullname], password, comment, force)?
            .pop()
            .ok_or_else(|| PassholdError::NotFound(fullname.to_string()))
    }

    /// Add several credentials sharing one password and comment, in a single write
    pub fn add_many(
        &self,
        fullnames: &[&str],
        password: &str,
        comment: &str,
        force: bool,
    ) -> PassholdResult<Vec<Credential>> {
        let mut credentials = self.credentials()?;
        let mut added = Vec::with_capacity(fullnames.len());

        for fullname in fullnames {
            let (login, name) = split_fullname(fullname)?;
            if credentials.iter().any(|c| c.has_key(&login, &name)) {
                if !force {
                    return Err(PassholdError::DuplicateKey(fullname.to_string()));
                }
                credentials.retain(|c| !c.has_key(&login, &name));
                added.retain(|c: &Credential| !c.has_key(&login, &name));
            }

            let ciphertext = self.provider.encrypt(password, self.require_recipient()?)?;
            let credential = Credential::new(name, login, ciphertext, comment);
            credentials.push(credential.clone());
            added.push(credential);
        }

        if !added.is_empty() {
            self.persist(&credentials, &batch_message("Add", &added))?;
        }
        Ok(added)
    }

    /// Apply `changes` to the credential at `fullname`
    pub fn update(&self, fullname: &str, changes: CredentialChanges) -> PassholdResult<Credential> {
        let mut credentials = self.credentials()?;
        let existing = search::lookup(&credentials, fullname)?
            .ok_or_else(|| PassholdError::NotFound(fullname.to_string()))?;

        let mut updated = existing.clone();
        if let Some(name) = changes.name {
            updated.name = name;
        }
        if let Some(login) = changes.login {
            updated.login = login;
        }
        if let Some(comment) = changes.comment {
            updated.comment = comment;
        }
        check_key(&updated.login, &updated.name)?;

        if !updated.same_key(&existing)
            && credentials.iter().any(|c| c.same_key(&updated))
        {
            return Err(PassholdError::DuplicateKey(updated.fullname()));
        }

        if let Some(password) = changes.password {
            updated.password = self
                .provider
                .encrypt(password.expose(), self.require_recipient()?)?;
        }
        updated.touch();

        credentials.retain(|c| !c.same_key(&existing));
        credentials.push(updated.clone());

        self.persist(&credentials, &format!("Update credential '{}'", existing.fullname()))?;
        Ok(updated)
    }

    pub fn remove(&self, fullname: &str) -> PassholdResult<Credential> {
        self.remove_many(&[fullname])?
            .pop()
            .ok_or_else(|| PassholdError::NotFound(fullname.to_string()))
    }

    /// Remove several credentials in a single write; any unknown key aborts the lot
    pub fn remove_many(&self, fullnames: &[&str]) -> PassholdResult<Vec<Credential>> {
        let mut credentials = self.credentials()?;
        let mut removed = Vec::with_capacity(fullnames.len());

        for fullname in fullnames {
            let credential = search::lookup(&credentials, fullname)?
                .ok_or_else(|| PassholdError::NotFound(fullname.to_string()))?;
            credentials.retain(|c| !c.same_key(&credential));
            removed.push(credential);
        }

        if !removed.is_empty() {
            self.persist(&credentials, &batch_message("Remove", &removed))?;
        }
        Ok(removed)
    }

    /// Remove every credential; returns how many there were
    pub fn purge(&self) -> PassholdResult<usize> {
        let count = self.credentials()?.len();
        if count > 0 {
            self.persist(&[], "Purge database")?;
        }
        Ok(count)
    }

    pub fn lookup(&self, fullname: &str) -> PassholdResult<Option<Credential>> {
        Ok(search::lookup(&self.credentials()?, fullname)?)
    }

    /// Like [`Store::lookup`], but a missing credential is an error
    pub fn get(&self, fullname: &str) -> PassholdResult<Credential> {
        self.lookup(fullname)?
            .ok_or_else(|| PassholdError::NotFound(fullname.to_string()))
    }

    /// Credentials matching `pattern` under the configured search mode
    pub fn search(&self, pattern: &str) -> PassholdResult<Vec<Credential>> {
        Ok(search::search(
            &self.credentials()?,
            pattern,
            self.config.search_mode,
        )?)
    }

    pub fn list_all(&self) -> PassholdResult<Vec<Credential>> {
        Ok(search::list_all(&self.credentials()?))
    }

    /// Check `passphrase` against the store key and remember it for decryption
    pub fn verify_passphrase(&mut self, passphrase: SensitiveString) -> PassholdResult<()> {
        self.provider
            .verify_passphrase(self.require_recipient()?, passphrase.expose())?;
        self.passphrase = Some(passphrase);
        Ok(())
    }

    pub fn is_unlocked(&self) -> bool {
        self.passphrase.is_some()
    }

    /// Plaintext password of `credential`; needs a verified passphrase
    pub fn decrypt(&self, credential: &Credential) -> PassholdResult<SensitiveString> {
        let passphrase = self
            .passphrase
            .as_ref()
            .ok_or(PassholdError::PassphraseRequired)?;

        Ok(self.provider.decrypt(
            &credential.password,
            self.require_recipient()?,
            passphrase.expose(),
        )?)
    }

    /// Render every credential, decrypted, as an export document
    pub fn export(&self, json: bool) -> PassholdResult<String> {
        if !self.is_unlocked() {
            return Err(PassholdError::PassphraseRequired);
        }

        let records = self
            .list_all()?
            .iter()
            .map(|credential| {
                self.decrypt(credential)
                    .map(|password| ExportRecord::from_credential(credential, &password))
            })
            .collect::<PassholdResult<Vec<_>>>()?;

        Ok(ExportDocument::new(records).render(json)?)
    }

    /// Add the records of an export document, replacing existing keys only when `overwrite`
    pub fn import(&self, text: &str, overwrite: bool) -> PassholdResult<ImportReport> {
        let records = import::parse_document(text)?;
        let mut credentials = self.credentials()?;
        let mut report = ImportReport::default();

        for record in records {
            let exists = credentials
                .iter()
                .any(|c| c.has_key(&record.login, &record.name));
            if exists && !overwrite {
                debug!("Store::import: skipping existing {}@{}", record.login, record.name);
                report.skipped += 1;
                continue;
            }

            let ciphertext = self
                .provider
                .encrypt(&record.password, self.require_recipient()?)?;
            let mut credential =
                Credential::new(&record.name, &record.login, ciphertext, &record.comment);
            credential.modified = record.modified.unwrap_or_else(Utc::now);

            if exists {
                credentials.retain(|c| !c.same_key(&credential));
                report.updated += 1;
            } else {
                report.added += 1;
            }
            credentials.push(credential);
        }

        let changed = report.added + report.updated;
        if changed > 0 {
            self.persist(&credentials, &format!("Import {} credentials", changed))?;
        }
        Ok(report)
    }

    /// Change a setting and record it in the store's `config.yml`
    pub fn config_set(&mut self, key: &str, value: &str) -> PassholdResult<()> {
        self.config.set(key, value)?;
        self.config.write_store_file(&self.root.join(CONFIG_FILE))?;
        self.notify(&format!("Set config: {} = {}", key, value));
        Ok(())
    }

    /// Commit history of the store, oldest first
    pub fn log(&self) -> PassholdResult<Vec<Commit>> {
        Ok(Repository::new(&self.root).log()?)
    }

    /// Roll the store tree back to the commit at `index` of [`Store::log`]
    pub fn reset(&self, index: usize) -> PassholdResult<Commit> {
        Ok(Repository::new(&self.root).reset(index)?)
    }

    /// Run a git command inside the store tree
    pub fn git(&self, args: &[String]) -> PassholdResult<ExitStatus> {
        Ok(Repository::new(&self.root).passthrough(args)?)
    }

    /// Pack an archive source back over its artifact, then push when configured
    pub fn sync(&self) -> PassholdResult<SyncReport> {
        let mut report = SyncReport::default();

        if self.format.is_archive() {
            archive::pack(&self.root, Path::new(&self.source), self.format)?;
            report.packed = true;
        }

        match &self.config.git_push {
            Some(target) => match self.push(target) {
                Ok(()) => report.pushed = true,
                Err(e) => {
                    warn!("version control warning: push to {} failed: {}", target, e);
                    report.warnings.push(format!("push to {} failed: {}", target, e));
                }
            },
            None if self.format == SourceFormat::Git => {
                let message = format!(
                    "{} is a temporary clone of {}; set git_push to keep changes",
                    self.root.display(),
                    self.source
                );
                warn!("version control warning: {}", message);
                report.warnings.push(message);
            }
            None => {}
        }

        Ok(report)
    }

    fn push(&self, target: &str) -> Result<(), GitError> {
        let remote = RemoteSpec::parse(target)?;
        Repository::new(&self.root).push(&remote)
    }

    fn require_recipient(&self) -> PassholdResult<&str> {
        self.recipient
            .as_deref()
            .ok_or(PassholdError::Crypto(CryptoError::NoRecipient))
    }

    fn persist(&self, credentials: &[Credential], message: &str) -> PassholdResult<()> {
        self.storage.write(credentials)?;
        self.notify(message);
        Ok(())
    }

    fn notify(&self, message: &str) {
        for observer in &self.observers {
            observer.mutated(&self.root, message);
        }
    }
}

/// Provider for an opened store: its own keys when it carries them,
/// otherwise the configured or default keyring
/// Commit message for a mutation touching `credentials`
fn batch_message(verb: &str, credentials: &[Credential]) -> String {
    match credentials {
        [single] => format!("{} credential '{}'", verb, single.fullname()),
        many => format!("{} {} credentials", verb, many.len()),
    }
}

fn gpg_provider(root: &Path, config: &Config) -> CryptoResult<GpgProvider> {
    let keys_path = root.join(KEYS_FILE);
    let bundle = if keys_path.is_file() {
        KeyBundle::from_yaml(&fs::read_to_string(&keys_path)?)?
    } else {
        KeyBundle::default()
    };

    if bundle.is_complete() {
        return GpgProvider::from_bundle(&bundle);
    }

    let homedir = match &config.homedir {
        Some(homedir) => homedir.clone(),
        None => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gnupg"),
    };
    GpgProvider::with_homedir(homedir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::tempdir;

    /// Tags plaintext with the recipient; opens only with `passphrase`
    struct TaggingProvider;

    impl CryptoProvider for TaggingProvider {
        fn encrypt(&self, plaintext: &str, recipient: &str) -> CryptoResult<String> {
            Ok(format!("ENC[{}]{}", recipient, plaintext))
        }

        fn decrypt(
            &self,
            ciphertext: &str,
            recipient: &str,
            passphrase: &str,
        ) -> CryptoResult<SensitiveString> {
            if passphrase != "passphrase" {
                return Err(CryptoError::DecryptionError("bad passphrase".to_string()));
            }
            ciphertext
                .strip_prefix(&format!("ENC[{}]", recipient))
                .map(SensitiveString::new)
                .ok_or_else(|| CryptoError::DecryptionError("not for us".to_string()))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingObserver(Rc<RefCell<Vec<String>>>);

    impl MutationObserver for RecordingObserver {
        fn mutated(&self, _root: &Path, message: &str) {
            self.0.borrow_mut().push(message.to_string());
        }
    }

    fn open_dir_store(dir: &Path) -> Store {
        let dest = dir.join("store");
        Store::init(
            &dest,
            InitOptions {
                format: SourceFormat::Dir,
                recipient: Some("tester".to_string()),
                git: false,
                ..Default::default()
            },
        )
        .unwrap();

        let config = Config {
            database: dest.to_string_lossy().into_owned(),
            git: false,
            ..Default::default()
        };
        Store::open_with(config, Box::new(TaggingProvider)).unwrap()
    }

    #[test]
    fn test_init_writes_bundle() {
        let dir = tempdir().unwrap();
        let store = open_dir_store(dir.path());
        let root = store.root();

        assert!(root.join(MARKER_FILE).is_file());
        assert_eq!(fs::read_to_string(root.join(MARKER_FILE)).unwrap(), "");
        let keys = KeyBundle::from_yaml(&fs::read_to_string(root.join(KEYS_FILE)).unwrap()).unwrap();
        assert_eq!(keys, KeyBundle::default());
        assert_eq!(store.recipient(), Some("tester"));
        assert_eq!(store.format(), SourceFormat::Dir);
    }

    #[test]
    fn test_init_refuses_existing_destination() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("store");
        fs::create_dir(&dest).unwrap();

        let options = InitOptions {
            recipient: Some("tester".to_string()),
            git: false,
            ..Default::default()
        };
        assert!(matches!(
            Store::init(&dest, options.clone()),
            Err(PassholdError::AlreadyExists(_))
        ));

        Store::init(&dest, InitOptions { force: true, ..options }).unwrap();
        assert!(dest.is_file());
    }

    #[test]
    fn test_init_without_recipient_needs_passphrase() {
        let dir = tempdir().unwrap();
        let options = InitOptions {
            git: false,
            ..Default::default()
        };
        assert!(matches!(
            Store::init(&dir.path().join("store"), options),
            Err(PassholdError::PassphraseRequired)
        ));
    }

    #[test]
    fn test_add_encrypts_before_writing() {
        let dir = tempdir().unwrap();
        let store = open_dir_store(dir.path());

        store.add("foo@example", "pw", "note", false).unwrap();
        let on_disk =
            fs::read_to_string(store.root().join("example").join("foo.pass")).unwrap();
        assert!(on_disk.contains("ENC[tester]pw"));
        assert!(on_disk.contains("comment: note"));
    }

    #[test]
    fn test_update_changes_key() {
        let dir = tempdir().unwrap();
        let store = open_dir_store(dir.path());
        store.add("foo@example", "pw", "", false).unwrap();
        store.add("bar@example", "pw", "", false).unwrap();

        assert!(matches!(
            store.update("foo@example", CredentialChanges::new().with_login("bar")),
            Err(PassholdError::DuplicateKey(_))
        ));

        let updated = store
            .update("foo@example", CredentialChanges::new().with_name("other"))
            .unwrap();
        assert_eq!(updated.fullname(), "foo@other");
        assert!(store.lookup("foo@example").unwrap().is_none());
        assert!(store.root().join("other").join("foo.pass").is_file());

        assert!(matches!(
            store.update("nobody@nowhere", CredentialChanges::new().with_comment("x")),
            Err(PassholdError::NotFound(_))
        ));
        for bad in ["../up", "a@b", ""] {
            assert!(store
                .update("foo@other", CredentialChanges::new().with_name(bad))
                .is_err());
        }
    }

    #[test]
    fn test_update_password_reencrypts() {
        let dir = tempdir().unwrap();
        let mut store = open_dir_store(dir.path());
        let original = store.add("foo@example", "old", "", false).unwrap();

        let updated = store
            .update("foo@example", CredentialChanges::new().with_password("new"))
            .unwrap();
        assert!(updated.modified >= original.modified);

        store
            .verify_passphrase(SensitiveString::new("passphrase"))
            .unwrap();
        assert_eq!(store.decrypt(&updated).unwrap().expose(), "new");
    }

    #[test]
    fn test_decrypt_requires_passphrase() {
        let dir = tempdir().unwrap();
        let store = open_dir_store(dir.path());
        let credential = store.add("foo@example", "pw", "", false).unwrap();

        assert!(matches!(
            store.decrypt(&credential),
            Err(PassholdError::PassphraseRequired)
        ));
        assert!(matches!(
            store.export(false),
            Err(PassholdError::PassphraseRequired)
        ));
    }

    #[test]
    fn test_observers_see_each_mutation() {
        let dir = tempdir().unwrap();
        let mut store = open_dir_store(dir.path());
        let observer = RecordingObserver::default();
        store.add_observer(Box::new(observer.clone()));

        store.add("foo@example", "pw", "", false).unwrap();
        store
            .update("foo@example", CredentialChanges::new().with_comment("c"))
            .unwrap();
        store.remove("foo@example").unwrap();
        // nothing to purge, nothing to report
        store.purge().unwrap();
        store.config_set("search_mode", "regex").unwrap();

        assert_eq!(
            *observer.0.borrow(),
            vec![
                "Add credential 'foo@example'",
                "Update credential 'foo@example'",
                "Remove credential 'foo@example'",
                "Set config: search_mode = regex",
            ]
        );
    }

    #[test]
    fn test_config_set_persists_and_applies() {
        let dir = tempdir().unwrap();
        let mut store = open_dir_store(dir.path());
        store.add("carol@github", "pw", "", false).unwrap();

        store.config_set("search_mode", "regex").unwrap();
        assert_eq!(store.search("^git").unwrap().len(), 1);

        let written = fs::read_to_string(store.root().join(CONFIG_FILE)).unwrap();
        assert!(written.contains("search_mode: regex"));
        assert!(written.contains("recipient: tester"));
        assert!(!written.contains("database"));
    }

    #[test]
    fn test_import_report() {
        let dir = tempdir().unwrap();
        let store = open_dir_store(dir.path());
        store.add("foo@example", "old", "", false).unwrap();

        let text = "\
- {name: example, login: foo, password: new, comment: ''}
- {name: example, login: bar, password: pw, comment: ''}
";
        let report = store.import(text, false).unwrap();
        assert_eq!(
            report,
            ImportReport {
                added: 1,
                updated: 0,
                skipped: 1
            }
        );

        let report = store.import(text, true).unwrap();
        assert_eq!(report.updated, 2);
        assert_eq!(store.list_all().unwrap().len(), 2);
        assert_eq!(store.get("foo@example").unwrap().password, "ENC[tester]new");
    }

    #[test]
    fn test_batch_add_and_remove_write_once() {
        let dir = tempdir().unwrap();
        let mut store = open_dir_store(dir.path());
        let observer = RecordingObserver::default();
        store.add_observer(Box::new(observer.clone()));

        let added = store
            .add_many(&["foo@example", "bar@example", "@other"], "pw", "", false)
            .unwrap();
        assert_eq!(added.len(), 3);
        assert_eq!(store.list_all().unwrap().len(), 3);

        assert!(matches!(
            store.remove_many(&["foo@example", "nobody@example"]),
            Err(PassholdError::NotFound(name)) if name == "nobody@example"
        ));
        assert_eq!(store.list_all().unwrap().len(), 3);

        store.remove_many(&["foo@example", "bar@example"]).unwrap();
        let left: Vec<_> = store.list_all().unwrap().iter().map(|c| c.fullname()).collect();
        assert_eq!(left, vec!["@other"]);

        assert_eq!(
            *observer.0.borrow(),
            vec!["Add 3 credentials", "Remove 2 credentials"]
        );
    }

    #[test]
    fn test_batch_add_rejects_repeated_key() {
        let dir = tempdir().unwrap();
        let store = open_dir_store(dir.path());

        assert!(matches!(
            store.add_many(&["foo@example", "foo@example"], "pw", "", false),
            Err(PassholdError::DuplicateKey(_))
        ));
        assert!(store.list_all().unwrap().is_empty());

        let added = store
            .add_many(&["foo@example", "foo@example"], "pw", "", true)
            .unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_reserved_git_name_is_rejected() {
        let dir = tempdir().unwrap();
        let store = open_dir_store(dir.path());

        assert!(matches!(
            store.add("alice@.git", "pw", "", false),
            Err(PassholdError::Name(_))
        ));
        assert!(!store.root().join(".git").join("alice.pass").exists());

        let document = "- {name: .git, login: alice, password: pw, comment: ''}\n";
        assert!(matches!(
            store.import(document, false),
            Err(PassholdError::Import(_))
        ));
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_sync_dir_store_without_push() {
        let dir = tempdir().unwrap();
        let store = open_dir_store(dir.path());
        assert_eq!(store.sync().unwrap(), SyncReport::default());
    }

    #[test]
    fn test_sync_push_failure_is_a_warning() {
        let dir = tempdir().unwrap();
        let mut store = open_dir_store(dir.path());
        store.config_set("git_push", "origin/master").unwrap();

        let report = store.sync().unwrap();
        assert!(!report.pushed);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("origin/master"));
    }

    #[test]
    fn test_sync_git_clone_without_push_warns() {
        let dir = tempdir().unwrap();
        let mut store = open_dir_store(dir.path());
        store.format = SourceFormat::Git;

        let report = store.sync().unwrap();
        assert!(!report.packed);
        assert!(!report.pushed);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("git_push"));
    }

    #[test]
    fn test_missing_recipient() {
        let dir = tempdir().unwrap();
        let store = open_dir_store(dir.path());
        let mut config = store.config().clone();
        config.recipient = None;
        fs::write(store.root().join(CONFIG_FILE), "").unwrap();

        let store = Store::open_with(config, Box::new(TaggingProvider)).unwrap();
        assert!(matches!(
            store.add("foo@example", "pw", "", false),
            Err(PassholdError::Crypto(CryptoError::NoRecipient))
        ));
    }
}
