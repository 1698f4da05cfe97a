//! Command line interface for Passhold
//!
//! Thin layer over [`Store`]: parse arguments, prompt for what is missing,
//! print results. Every command that changes a store ends with
//! [`Store::sync`].

use std::fs;
use std::io;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Password};
use serde_yaml::{Mapping, Value};

use crate::archive::SourceFormat;
use crate::config::{expand_home, Config};
use crate::models::{Credential, CredentialChanges, SensitiveString};
use crate::store::{InitOptions, Store};

/// Passhold - personal credential manager
#[derive(Parser)]
#[command(name = "passhold")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Store location: directory, archive file or git URL (default: ~/.passhold)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<String>,

    /// Store passphrase (prompted for when needed)
    #[arg(short = 'P', long, global = true, env = "PASSHOLD_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,

    /// Push to <remote>/<branch> after changes
    #[arg(short = 'g', long, global = true)]
    pub git_push: Option<String>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new store
    Init {
        /// Where to create it (default: the configured database)
        path: Option<String>,

        /// Replace an existing store
        #[arg(short, long)]
        force: bool,

        /// Encrypt to a key from your own keyring instead of generating one
        #[arg(short, long)]
        recipient: Option<String>,

        /// Do not create a git repository
        #[arg(long)]
        no_git: bool,

        /// Store layout
        #[arg(long, value_enum, default_value = "gztar")]
        format: FormatArg,

        /// RSA key size for the generated key
        #[arg(long)]
        key_length: Option<u32>,
    },

    /// Add one or more credentials sharing a password
    Add {
        /// login@name
        #[arg(required = true)]
        fullnames: Vec<String>,

        /// Password (prompted for if not given)
        #[arg(short, long)]
        password: Option<String>,

        /// Generate a random password
        #[arg(short = 'R', long)]
        random: bool,

        /// Free-form comment
        #[arg(short, long, default_value = "")]
        comment: String,

        /// Replace an existing credential
        #[arg(short, long)]
        force: bool,
    },

    /// Change a credential; prompts for each field when no flag is given
    Update {
        /// login@name
        fullname: String,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// New login
        #[arg(long)]
        login: Option<String>,

        /// New password
        #[arg(short, long)]
        password: Option<String>,

        /// Generate a new random password
        #[arg(short = 'R', long)]
        random: bool,

        /// New comment
        #[arg(short, long)]
        comment: Option<String>,
    },

    /// Remove credentials, or all of them
    #[command(alias = "rm")]
    Remove {
        /// login@name
        #[arg(required_unless_present = "all")]
        fullnames: Vec<String>,

        /// Remove every credential
        #[arg(long, conflicts_with = "fullnames")]
        all: bool,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// List credentials, optionally matching a pattern
    #[command(alias = "ls")]
    List {
        /// Matched against name, login and comment
        pattern: Option<String>,
    },

    /// Print a decrypted password
    Show {
        /// login@name
        fullname: String,

        /// Write the password to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export every credential in plaintext
    Export {
        /// JSON instead of YAML
        #[arg(long)]
        json: bool,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import credentials from an export document
    Import {
        /// Document to read
        input: PathBuf,

        /// Replace existing credentials
        #[arg(short, long)]
        force: bool,
    },

    /// Show or change configuration
    Config {
        /// Setting name
        key: Option<String>,

        /// New value, stored in the store's config.yml
        value: Option<String>,
    },

    /// Show the store history
    Log,

    /// Roll the store back to an entry of `log`
    Reset {
        /// Index shown by `log`
        index: usize,
    },

    /// Run git inside the store
    Git {
        /// Arguments passed to git
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Dir,
    Tar,
    Gztar,
    Bztar,
    Zip,
}

impl From<FormatArg> for SourceFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Dir => SourceFormat::Dir,
            FormatArg::Tar => SourceFormat::Tar,
            FormatArg::Gztar => SourceFormat::Gztar,
            FormatArg::Bztar => SourceFormat::Bztar,
            FormatArg::Zip => SourceFormat::Zip,
        }
    }
}

/// CLI output helpers
pub struct Output;

impl Output {
    /// Print a success message
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    /// Print a warning message
    pub fn warning(message: &str) {
        eprintln!("{} {}", "⚠".yellow().bold(), message);
    }

    /// Print an info message
    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue().bold(), message);
    }

    /// Print a key-value pair
    pub fn field(key: &str, value: &str) {
        println!("  {}: {}", key.dimmed(), value);
    }

    /// One line per credential
    pub fn credential(credential: &Credential) {
        if credential.comment.is_empty() {
            println!("{}", credential.fullname());
        } else {
            println!("{}  {}", credential.fullname(), credential.comment.dimmed());
        }
    }
}

/// Interactive prompts
pub struct Prompts;

impl Prompts {
    /// Get hidden input, optionally asking twice
    pub fn secret(prompt: &str, confirm: bool) -> io::Result<String> {
        let theme = ColorfulTheme::default();
        let mut input = Password::with_theme(&theme).with_prompt(prompt);
        if confirm {
            input = input.with_confirmation("Confirm", "Values don't match");
        }
        input
            .interact()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }

    /// Ask for every field of `current`, keeping what is left unchanged
    pub fn credential_changes(current: &Credential) -> io::Result<CredentialChanges> {
        let theme = ColorfulTheme::default();
        let ask = |prompt: &str, value: &str| -> io::Result<String> {
            Input::<String>::with_theme(&theme)
                .with_prompt(prompt)
                .with_initial_text(value)
                .allow_empty(true)
                .interact_text()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
        };

        let name = ask("Name", &current.name)?;
        let login = ask("Login", &current.login)?;
        let comment = ask("Comment", &current.comment)?;
        let password = Password::with_theme(&theme)
            .with_prompt("Password (empty keeps the current one)")
            .allow_empty_password(true)
            .interact()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        Ok(CredentialChanges {
            name: (name != current.name).then_some(name),
            login: (login != current.login).then_some(login),
            comment: (comment != current.comment).then_some(comment),
            password: (!password.is_empty()).then(|| SensitiveString::new(password)),
        })
    }

    /// Confirm an action
    pub fn confirm(prompt: &str, default: bool) -> io::Result<bool> {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(default)
            .interact()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}

/// Settings given on the command line, as a configuration layer
fn cli_overrides(database: Option<String>, git_push: Option<String>) -> Mapping {
    let mut overrides = Mapping::new();
    if let Some(database) = database {
        overrides.insert("database".into(), database.into());
    }
    if let Some(git_push) = git_push {
        overrides.insert("git_push".into(), git_push.into());
    }
    overrides
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn generate_password(config: &Config) -> SensitiveString {
    config.password_generator().generate()
}

/// Verify the passphrase from the flag or a prompt
fn unlock(store: &mut Store, passphrase: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let passphrase = match passphrase {
        Some(p) => p,
        None => Prompts::secret("Passphrase", false)?,
    };
    store.verify_passphrase(SensitiveString::new(passphrase))?;
    Ok(())
}

fn sync(store: &Store) -> Result<(), Box<dyn std::error::Error>> {
    let report = store.sync()?;
    for warning in &report.warnings {
        Output::warning(warning);
    }
    Ok(())
}

/// Run the CLI command
pub fn run_command(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let Cli {
        database,
        passphrase,
        git_push,
        command,
        ..
    } = cli;

    let config = Config::load(&cli_overrides(database, git_push))?;

    match command {
        Commands::Init {
            path,
            force,
            recipient,
            no_git,
            format,
            key_length,
        } => {
            let dest = expand_home(path.as_deref().unwrap_or(&config.database));
            let recipient = recipient.or_else(|| config.recipient.clone());

            let passphrase = match (&recipient, passphrase) {
                (Some(_), _) => None,
                (None, Some(p)) => Some(SensitiveString::new(p)),
                (None, None) => Some(SensitiveString::new(Prompts::secret("Passphrase", true)?)),
            };

            if recipient.is_none() {
                Output::info("Generating store keys, this can take a while...");
            }
            Store::init(
                &dest,
                InitOptions {
                    format: format.into(),
                    recipient,
                    passphrase,
                    key_length: key_length.unwrap_or(config.key_length),
                    git: config.git && !no_git,
                    force,
                },
            )?;

            Output::success(&format!("Store created at {}", dest.display()));
            Ok(())
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }

        command => {
            let mut store = Store::open(config)?;
            run_store_command(&mut store, command, passphrase)
        }
    }
}

fn run_store_command(
    store: &mut Store,
    command: Commands,
    passphrase: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Add {
            fullnames,
            password,
            random,
            comment,
            force,
        } => {
            let password = match password {
                Some(p) => SensitiveString::new(p),
                None if random || store.config().password_random => {
                    generate_password(store.config())
                }
                None => SensitiveString::new(Prompts::secret("Password", true)?),
            };

            let fullnames: Vec<&str> = fullnames.iter().map(String::as_str).collect();
            let added = store.add_many(&fullnames, password.expose(), &comment, force)?;
            sync(store)?;
            for credential in &added {
                Output::success(&format!("Added {}", credential.fullname()));
            }
            Ok(())
        }

        Commands::Update {
            fullname,
            name,
            login,
            password,
            random,
            comment,
        } => {
            let mut changes = CredentialChanges {
                name,
                login,
                comment,
                password: password.map(SensitiveString::new),
            };
            if random {
                changes.password = Some(generate_password(store.config()));
            }
            if changes.is_empty() {
                changes = Prompts::credential_changes(&store.get(&fullname)?)?;
            }
            if changes.is_empty() {
                Output::warning("Nothing to update");
                return Ok(());
            }

            let credential = store.update(&fullname, changes)?;
            sync(store)?;
            Output::success(&format!("Updated {}", credential.fullname()));
            Ok(())
        }

        Commands::Remove {
            fullnames,
            all,
            yes,
        } => {
            if all {
                if !yes && !Prompts::confirm("Remove every credential?", false)? {
                    return Ok(());
                }
                let count = store.purge()?;
                sync(store)?;
                Output::success(&format!("Removed {} credentials", count));
                return Ok(());
            }

            if fullnames.is_empty() {
                return Err("a fullname or --all is required".into());
            }
            let prompt = format!("Remove {}?", fullnames.join(", "));
            if !yes && !Prompts::confirm(&prompt, false)? {
                return Ok(());
            }
            let fullnames: Vec<&str> = fullnames.iter().map(String::as_str).collect();
            let removed = store.remove_many(&fullnames)?;
            sync(store)?;
            for credential in &removed {
                Output::success(&format!("Removed {}", credential.fullname()));
            }
            Ok(())
        }

        Commands::List { pattern } => {
            let credentials = match pattern {
                Some(pattern) => store.search(&pattern)?,
                None => store.list_all()?,
            };
            credentials.iter().for_each(Output::credential);
            Ok(())
        }

        Commands::Show { fullname, output } => {
            let credential = store.get(&fullname)?;
            unlock(store, passphrase)?;
            let password = store.decrypt(&credential)?;

            match output {
                Some(path) => {
                    fs::write(&path, password.expose())?;
                    Output::success(&format!("Password written to {}", path.display()));
                }
                None => println!("{}", password.expose()),
            }
            Ok(())
        }

        Commands::Export { json, output } => {
            unlock(store, passphrase)?;
            let document = store.export(json)?;

            match output {
                Some(path) => {
                    fs::write(&path, document)?;
                    Output::success(&format!("Exported to {}", path.display()));
                    Output::warning("Passwords are exported in plaintext. Handle with care!");
                }
                None => print!("{}", document),
            }
            Ok(())
        }

        Commands::Import { input, force } => {
            let text = fs::read_to_string(&input)?;
            let report = store.import(&text, force)?;
            sync(store)?;
            Output::success(&format!(
                "Imported {} new, {} replaced, {} skipped",
                report.added, report.updated, report.skipped
            ));
            Ok(())
        }

        Commands::Config { key, value } => match (key, value) {
            (Some(key), Some(value)) => {
                store.config_set(&key, &value)?;
                sync(store)?;
                Output::success(&format!("{} = {}", key, value));
                Ok(())
            }
            (Some(key), None) => {
                println!("{}", display_value(&store.config().get(&key)?));
                Ok(())
            }
            (None, _) => {
                for (key, value) in store.config().entries()? {
                    Output::field(key, &display_value(&value));
                }
                Ok(())
            }
        },

        Commands::Log => {
            for (index, commit) in store.log()?.iter().enumerate() {
                println!("[{}] {}", index.to_string().cyan(), commit.message);
            }
            Ok(())
        }

        Commands::Reset { index } => {
            let commit = store.reset(index)?;
            sync(store)?;
            Output::success(&format!("Reset to [{}] {}", index, commit.message));
            Ok(())
        }

        Commands::Git { args } => {
            let status = store.git(&args)?;
            sync(store)?;
            if !status.success() {
                return Err(format!("git exited with {}", status).into());
            }
            Ok(())
        }

        Commands::Init { .. } | Commands::Completions { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "passhold", "ls", "-D", "/tmp/store.tar.gz", "-g", "origin/master", "-v",
        ])
        .unwrap();
        assert_eq!(cli.database.as_deref(), Some("/tmp/store.tar.gz"));
        assert_eq!(cli.git_push.as_deref(), Some("origin/master"));
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::List { pattern: None }));
    }

    #[test]
    fn test_remove_needs_target() {
        assert!(Cli::try_parse_from(["passhold", "rm"]).is_err());
        assert!(Cli::try_parse_from(["passhold", "rm", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["passhold", "rm", "foo@bar", "--all"]).is_err());
    }

    #[test]
    fn test_several_fullnames() {
        let cli = Cli::try_parse_from(["passhold", "add", "a@x", "b@x", "-R"]).unwrap();
        match cli.command {
            Commands::Add {
                fullnames, random, ..
            } => {
                assert_eq!(fullnames, vec!["a@x", "b@x"]);
                assert!(random);
            }
            _ => panic!("expected add"),
        }
        assert!(Cli::try_parse_from(["passhold", "add"]).is_err());

        let cli = Cli::try_parse_from(["passhold", "rm", "a@x", "b@x", "-y"]).unwrap();
        assert!(matches!(cli.command, Commands::Remove { fullnames, .. } if fullnames.len() == 2));
    }

    #[test]
    fn test_git_passes_arguments_through() {
        let cli = Cli::try_parse_from(["passhold", "git", "log", "--oneline", "-n", "3"]).unwrap();
        match cli.command {
            Commands::Git { args } => assert_eq!(args, vec!["log", "--oneline", "-n", "3"]),
            _ => panic!("expected git"),
        }
    }

    #[test]
    fn test_init_format() {
        let cli = Cli::try_parse_from(["passhold", "init", "--format", "zip"]).unwrap();
        match cli.command {
            Commands::Init { format, .. } => {
                assert_eq!(SourceFormat::from(format), SourceFormat::Zip)
            }
            _ => panic!("expected init"),
        }
        assert!(Cli::try_parse_from(["passhold", "init", "--format", "rar"]).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let overrides = cli_overrides(Some("/tmp/x".to_string()), None);
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides.get("database"), Some(&Value::from("/tmp/x")));
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&Value::Null), "");
        assert_eq!(display_value(&Value::from("abc")), "abc");
        assert_eq!(display_value(&Value::from(true)), "true");
        assert_eq!(display_value(&Value::from(4096)), "4096");
    }
}
