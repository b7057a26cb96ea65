//! Medivault: GDPR-minded patient record console.
//!
//! Main entry point for the command-line application.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use medivault::adapters::sanitize::SanitizingMakeWriter;
use medivault::adapters::{FileKeyStore, SqliteStorage};
use medivault::application::{
    seed_sample_patients, AnalyticsService, AuditService, AuthService, ExportKind, ExportService,
    OperationOutcome, PatientView, RecordService,
};
use medivault::domain::{AuditAction, FieldCipher, LogQuery, DEFAULT_LOG_LIMIT};
use medivault::ports::KeyStore;
use medivault::{Config, Identity, PatientInput, Role, Session};

#[derive(Parser)]
#[command(name = "medivault")]
#[command(version)]
#[command(about = "Patient records with encryption, masking, anonymization and audit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file (overrides MEDIVAULT_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Key file (overrides MEDIVAULT_KEY_FILE)
    #[arg(long, global = true)]
    key_file: Option<PathBuf>,

    /// User to sign in as
    #[arg(short, long, global = true, env = "MEDIVAULT_USER")]
    user: Option<String>,

    /// Password for --user
    #[arg(short, long, global = true, env = "MEDIVAULT_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the schema, key file and default users
    Init {
        /// Also insert the 25 demonstration patients
        #[arg(long)]
        with_samples: bool,
    },

    /// Show dashboard counts and the latest log entries (admin)
    Stats,

    /// Show activity and demographic aggregates (admin)
    Report,

    /// List patients as the signed-in role may see them
    Patients {
        /// Include anonymized records (admin)
        #[arg(long)]
        include_anonymized: bool,
    },

    /// Show one patient
    Show { id: i64 },

    /// Register a patient (receptionist or higher)
    AddPatient {
        #[command(flatten)]
        fields: PatientFields,
    },

    /// Edit a patient (receptionist or higher)
    UpdatePatient {
        id: i64,

        #[command(flatten)]
        fields: PatientFields,

        /// Keep the stored diagnosis and ignore --diagnosis
        #[arg(long)]
        keep_diagnosis: bool,
    },

    /// Irreversibly anonymize a patient (admin)
    Anonymize { id: i64 },

    /// Read the audit log (admin)
    Logs {
        #[arg(short, long, default_value_t = DEFAULT_LOG_LIMIT)]
        limit: usize,

        /// Only this action, e.g. ADD_PATIENT
        #[arg(short, long)]
        action: Option<AuditAction>,

        /// Only entries by this user id
        #[arg(long)]
        user_id: Option<i64>,

        /// Only entries by this role
        #[arg(long)]
        role: Option<Role>,

        /// Only entries at or after this RFC 3339 instant
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },

    /// Export data as JSON (admin)
    Export {
        #[arg(value_enum)]
        what: ExportTarget,

        /// Output file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Create a user (admin)
    CreateUser {
        username: String,

        #[arg(short, long)]
        role: Role,

        /// Password for the new account
        #[arg(long, env = "MEDIVAULT_NEW_PASSWORD", hide_env_values = true)]
        new_password: String,
    },

    /// List users (admin)
    Users,

    /// Print the effective configuration
    Config,
}

#[derive(clap::Args)]
struct PatientFields {
    #[arg(long)]
    name: String,

    #[arg(long)]
    age: u32,

    #[arg(long)]
    gender: String,

    #[arg(long, default_value = "")]
    contact: String,

    #[arg(long, default_value = "")]
    diagnosis: String,
}

impl From<PatientFields> for PatientInput {
    fn from(fields: PatientFields) -> Self {
        Self {
            name: fields.name,
            age: fields.age,
            gender: fields.gender,
            contact: fields.contact,
            diagnosis: fields.diagnosis,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportTarget {
    Patients,
    Logs,
}

impl From<ExportTarget> for ExportKind {
    fn from(target: ExportTarget) -> Self {
        match target {
            ExportTarget::Patients => Self::Patients,
            ExportTarget::Logs => Self::Logs,
        }
    }
}

/// Opened store, cipher and services for one invocation.
struct Console {
    config: Config,
    storage: Arc<SqliteStorage>,
    cipher: Arc<FieldCipher>,
    auth: AuthService<SqliteStorage>,
}

impl Console {
    fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(
            SqliteStorage::new(&config.db_path)
                .with_context(|| format!("Failed to open {}", config.db_path.display()))?,
        );
        let key = FileKeyStore::new(&config.key_file)
            .load_or_create()
            .with_context(|| format!("Failed to load key file {}", config.key_file.display()))?;
        let cipher = Arc::new(FieldCipher::new(&key));
        let auth = AuthService::new(Arc::clone(&storage), config.audit_policy, config.password_scheme)
            .with_legacy_login_until(config.legacy_login_until);

        Ok(Self {
            config,
            storage,
            cipher,
            auth,
        })
    }

    fn records(&self) -> RecordService<SqliteStorage> {
        RecordService::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.cipher),
            self.config.audit_policy,
        )
    }

    fn sign_in(&self, session: &mut Session, user: Option<&str>, password: Option<&str>) -> Result<Identity> {
        let user = user.context("--user (or MEDIVAULT_USER) is required for this command")?;
        let password = password.context("--password (or MEDIVAULT_PASSWORD) is required for this command")?;
        self.auth
            .sign_in(session, user, password)
            .map_err(|e| anyhow!(e.user_message()))
    }
}

fn open_log_file(path: &std::path::Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_mode = std::env::var("MEDIVAULT_LOG_MODE").unwrap_or_else(|_| "auto".to_string());

    // Interactive runs keep stdout for command output.
    let use_file = match log_mode.as_str() {
        "file" => true,
        "stdout" => false,
        _ => std::io::stdout().is_terminal(),
    };

    let (writer, guard) = if use_file {
        let log_file =
            std::env::var("MEDIVAULT_LOG_FILE").unwrap_or_else(|_| "medivault.log".to_string());

        let file = open_log_file(std::path::Path::new(&log_file))?;
        tracing_appender::non_blocking(file)
    } else {
        tracing_appender::non_blocking(std::io::stderr())
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();

    Ok(guard)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing()?;

    let mut config = Config::from_env().context("Invalid MEDIVAULT_* configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(key_file) = cli.key_file {
        config.key_file = key_file;
    }

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let console = Console::open(config)?;

    if let Commands::Init { with_samples } = cli.command {
        let users = console.auth.seed_default_users()?;
        println!("Database initialized: {}", console.config.db_path.display());
        println!("Key file: {}", console.config.key_file.display());
        println!("Default users created: {users}");
        if with_samples {
            let patients =
                seed_sample_patients(console.storage.as_ref(), &console.cipher, console.config.audit_policy)?;
            println!("Sample patients inserted: {patients}");
        }
        return Ok(());
    }

    let mut session = Session::default();
    let actor = console.sign_in(&mut session, cli.user.as_deref(), cli.password.as_deref())?;
    let result = run(&console, cli.command, &actor);
    console.auth.logout(&mut session);
    result
}

fn run(console: &Console, command: Commands, actor: &Identity) -> Result<()> {
    match command {
        Commands::Init { .. } | Commands::Config => {}

        Commands::Stats => {
            let dashboard = AnalyticsService::new(Arc::clone(&console.storage))
                .dashboard(actor)
                .map_err(|e| anyhow!(e.user_message()))?;
            println!("{}", serde_json::to_string_pretty(&dashboard)?);
        }

        Commands::Report => {
            let report = AnalyticsService::new(Arc::clone(&console.storage))
                .activity_report(actor)
                .map_err(|e| anyhow!(e.user_message()))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Patients { include_anonymized } => {
            let views = console
                .records()
                .list_views(actor, include_anonymized)
                .map_err(|e| anyhow!(e.user_message()))?;
            for view in &views {
                print_view(view);
            }
            println!("{} patient(s)", views.len());
        }

        Commands::Show { id } => {
            let records = console.records();
            let Some(record) = records.get(id).map_err(|e| anyhow!(e.user_message()))? else {
                bail!("Patient ID {id} not found");
            };
            println!("{}", serde_json::to_string_pretty(&records.view(&record, actor))?);
        }

        Commands::AddPatient { fields } => {
            let input = PatientInput::from(fields);
            report(OperationOutcome::patient_added(console.records().add(&input, actor)))?;
        }

        Commands::UpdatePatient {
            id,
            fields,
            keep_diagnosis,
        } => {
            let input = PatientInput::from(fields);
            let records = console.records();
            let result = if keep_diagnosis {
                records.update_demographics(id, &input, actor)
            } else {
                records.update(id, &input, actor)
            };
            report(OperationOutcome::patient_updated(id, result))?;
        }

        Commands::Anonymize { id } => {
            report(OperationOutcome::patient_anonymized(
                id,
                console.records().anonymize(id, actor),
            ))?;
        }

        Commands::Logs {
            limit,
            action,
            user_id,
            role,
            since,
        } => {
            let query = LogQuery {
                limit,
                action,
                user_id,
                role,
                since,
            };
            let entries = AuditService::new(Arc::clone(&console.storage), console.config.audit_policy)
                .query(actor, &query)
                .map_err(|e| anyhow!(e.user_message()))?;
            for entry in &entries {
                println!(
                    "{}  {:<18} {:<13} user={:<5} {}",
                    entry.timestamp.to_rfc3339(),
                    entry.action.as_str(),
                    entry.role.map_or("-", Role::as_str),
                    entry.user_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
                    entry.details
                );
            }
        }

        Commands::Export { what, out } => {
            let count = ExportService::new(Arc::clone(&console.storage), console.config.audit_policy)
                .export_to_path(what.into(), actor, &out)
                .map_err(|e| anyhow!(e.user_message()))?;
            println!("Exported {count} item(s) to {}", out.display());
        }

        Commands::CreateUser {
            username,
            role,
            new_password,
        } => {
            let account = console
                .auth
                .create_user(&username, &new_password, role, actor)
                .map_err(|e| anyhow!(e.user_message()))?;
            println!("Created user {} ({}) with id {}", account.username, account.role, account.id);
        }

        Commands::Users => {
            let users = console
                .auth
                .list_users(actor)
                .map_err(|e| anyhow!(e.user_message()))?;
            println!("{}", serde_json::to_string_pretty(&users)?);
        }
    }
    Ok(())
}

fn print_view(view: &PatientView) {
    println!(
        "{:>4}  {:<20} {:>3}  {:<7} {:<22} {:<24} {}",
        view.id,
        view.name,
        view.age,
        view.gender,
        view.contact,
        view.diagnosis.to_string(),
        view.admission_date.format("%Y-%m-%d %H:%M")
    );
}

fn report(outcome: OperationOutcome) -> Result<()> {
    if !outcome.success {
        bail!(outcome.message);
    }
    println!("{outcome}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_log_file_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("nested").join("medivault.log");
        open_log_file(&path).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn test_open_log_file_reports_blocked_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("logs");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = open_log_file(&blocker.join("medivault.log")).unwrap_err();
        assert!(err.to_string().starts_with("Failed to create log directory"));
    }
}
