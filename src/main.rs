use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::{error::Error, fs, path::PathBuf};
use tracing_subscriber::EnvFilter;
use wordassoc::{
    config::{Config, ConfigStore, FileConfigStore},
    export::PrivacyMode,
    fingerprint::recompute_fingerprint,
    hashing::compute_words_sha256,
    import::{
        classify_payload, prepare_pack_import, prepare_session_import, ImportAction,
        ImportPolicy,
    },
    insights::build_insights,
    pack::{EmbeddedRegistry, StimulusRegistry},
    package::{build_package, verify_package_integrity},
    scoring::score_session,
    session::{SessionResult, Trial},
    storage::{SessionStore, SqliteStore},
};

/// word-association timing experiments: scoring, insights and sealed exports
#[derive(Parser, Debug)]
#[clap(version, about)]
pub struct Cli {
    /// sqlite database holding sessions and custom packs
    #[clap(long, global = true)]
    db: Option<PathBuf>,

    /// config file to use instead of the platform default
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// score a JSON array of trials
    Score { trials: PathBuf },
    /// derive insights from a session JSON file
    Insights { session: PathBuf },
    /// recompute a session's fingerprint and compare it with the stored one
    Fingerprint { session: PathBuf },
    /// build a sealed export package from a session JSON file
    Export {
        session: PathBuf,
        /// privacy mode; defaults to the configured mode
        #[clap(short = 'm', long, value_enum)]
        mode: Option<Mode>,
        /// strip session id and timestamps
        #[clap(long)]
        anonymize: bool,
        /// write the package here instead of stdout
        #[clap(short = 'o', long)]
        out: Option<PathBuf>,
    },
    /// check a package's integrity seal (exit status 1 when it does not match)
    Verify { package: PathBuf },
    /// classify a file and list what can be done with it
    Inspect { file: PathBuf },
    /// import a package, bundle or pack into the database
    Import {
        file: PathBuf,
        /// extract the stimulus pack from a package instead of importing its session
        #[clap(long)]
        pack: bool,
        /// score the imported session again with the current engine
        #[clap(long)]
        rescore: bool,
    },
    /// list stored session ids
    List,
    /// print the canonical hash of a word list
    WordsHash { words: Vec<String> },
    /// list bundled stimulus packs, or show one given as ID@VERSION
    Packs { pack: Option<String> },
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Mode {
    Full,
    Minimal,
    Redacted,
}

impl From<Mode> for PrivacyMode {
    fn from(m: Mode) -> Self {
        match m {
            Mode::Full => PrivacyMode::Full,
            Mode::Minimal => PrivacyMode::Minimal,
            Mode::Redacted => PrivacyMode::Redacted,
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T, Box<dyn Error>> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_store(cli: &Cli, config: &Config) -> Result<SqliteStore, Box<dyn Error>> {
    let store = match cli.db.as_ref().or(config.database_path.as_ref()) {
        Some(path) => SqliteStore::open(path)?,
        None => SqliteStore::new()?,
    };
    Ok(store)
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => FileConfigStore::with_path(path).load(),
        None => FileConfigStore::new().load(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    run(&cli, &config)
}

fn run(cli: &Cli, config: &Config) -> Result<(), Box<dyn Error>> {
    match &cli.command {
        Command::Score { trials } => {
            let trials: Vec<Trial> = read_json(trials)?;
            print_json(&score_session(&trials))
        }
        Command::Insights { session } => {
            let session: SessionResult = read_json(session)?;
            print_json(&build_insights(&session))
        }
        Command::Fingerprint { session } => {
            let session: SessionResult = read_json(session)?;
            let computed = recompute_fingerprint(&session);
            print_json(&json!({
                "stored": session.session_fingerprint,
                "computed": computed,
                "matches": computed == session.session_fingerprint,
            }))
        }
        Command::Export {
            session,
            mode,
            anonymize,
            out,
        } => {
            let session: SessionResult = read_json(session)?;
            let mode = mode.map(PrivacyMode::from).unwrap_or(config.default_privacy_mode);
            let (id, version) = (&session.config.pack_id, &session.config.pack_version);
            let pack = EmbeddedRegistry.lookup(id, version).or_else(|| {
                cli.db
                    .as_ref()
                    .or(config.database_path.as_ref())
                    .and_then(|p| SqliteStore::open(p).ok())
                    .and_then(|store| store.load_pack(id, version))
            });
            if pack.is_none() {
                tracing::warn!("pack {id}@{version} not found; exporting identity only");
            }
            let exported_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            let package = build_package(&session, pack.as_ref(), mode, &exported_at, *anonymize)?;
            let text = serde_json::to_string_pretty(&package)?;
            match out {
                Some(path) => fs::write(path, text)?,
                None => println!("{text}"),
            }
            Ok(())
        }
        Command::Verify { package } => {
            let value: serde_json::Value = read_json(package)?;
            let result = verify_package_integrity(&value);
            print_json(&result)?;
            if !result.valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Inspect { file } => {
            let preview = classify_payload(&fs::read_to_string(file)?)?;
            print_json(&json!({
                "type": preview.import_type,
                "wordCount": preview.word_count,
                "hash": preview.hash,
                "sizeBytes": preview.size_bytes,
                "integrityResult": preview.integrity_result,
                "packageVersion": preview.package_version,
                "packageHash": preview.package_hash,
                "sessionId": preview.session_to_import.as_ref().map(|s| s.id.clone()),
                "actions": preview.action_labels(),
            }))
        }
        Command::Import {
            file,
            pack,
            rescore,
        } => {
            let preview = classify_payload(&fs::read_to_string(file)?)?;
            let store = open_store(cli, config)?;
            if !*pack && preview.allows(ImportAction::ImportAsSession) {
                let policy = ImportPolicy {
                    rescore: *rescore,
                    ..config.import_policy()
                };
                let session = prepare_session_import(&preview, &store, policy)?;
                store.insert_session(&session)?;
                print_json(&json!({ "imported": "session", "id": session.id }))
            } else {
                let stimulus_pack = prepare_pack_import(&preview)?;
                store.save_pack(&stimulus_pack)?;
                print_json(&json!({
                    "imported": "pack",
                    "id": stimulus_pack.id,
                    "version": stimulus_pack.version,
                }))
            }
        }
        Command::List => {
            let store = open_store(cli, config)?;
            print_json(&store.list_sessions())
        }
        Command::WordsHash { words } => {
            println!("{}", compute_words_sha256(words));
            Ok(())
        }
        Command::Packs { pack: Some(pack_ref) } => {
            let (id, version) = pack_ref
                .split_once('@')
                .ok_or_else(|| format!("expected ID@VERSION, got {pack_ref}"))?;
            let pack = EmbeddedRegistry.require(id, version)?;
            print_json(&json!({
                "id": pack.id,
                "version": pack.version,
                "language": pack.language,
                "words": pack.words,
                "wordsSha256": compute_words_sha256(&pack.words),
                "provenance": pack.provenance,
            }))
        }
        Command::Packs { pack: None } => {
            let packs: Vec<String> = EmbeddedRegistry
                .list()
                .into_iter()
                .map(|(id, version)| format!("{id}@{version}"))
                .collect();
            print_json(&packs)
        }
    }
}
