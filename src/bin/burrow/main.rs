//! Binary entry point for the burrow administrative CLI.
#![forbid(unsafe_code)]

mod ui;

use std::error::Error;
use std::io;
use std::path::PathBuf;

use burrow::{
    admin::{
        inspect_log, list_files, recover, verify_index, FilesReport, LogEntry, LogReport,
        RecoverReport, VerifyIndexReport,
    },
    cli::{init_logging, CliConfig, Profile},
    db::{DatabaseOptions, Synchronous},
    types::{DataType, IndexId},
};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;

use ui::{ColorMode, Ui};

#[derive(Parser, Debug)]
#[command(
    name = "burrow",
    version,
    about = "Administrative CLI for burrow database directories",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        default_value = "warn",
        help = "Log filter (overridden by RUST_LOG)"
    )]
    log_level: String,

    #[arg(long, global = true, env = "BURROW_CONFIG", help = "Path to the CLI config file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Config profile to apply")]
    profile: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = ColorMode::Auto)]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Replay the log, completing committed transactions")]
    Recover {
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    #[command(about = "List log records without applying them")]
    Log {
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,

        #[arg(long, help = "Show at most this many records")]
        limit: Option<usize>,
    },

    #[command(name = "verify-index", about = "Check the structure of one index file")]
    VerifyIndex {
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,

        #[arg(long, help = "Index id")]
        index: u64,

        #[arg(
            long,
            value_name = "TYPE,TYPE",
            value_delimiter = ',',
            required = true,
            help = "Key column types, row id excluded (e.g. string,bigint)"
        )]
        types: Vec<String>,
    },

    #[command(about = "Classify the files in a database directory")]
    Files {
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    #[command(about = "Inspect the CLI configuration")]
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },

    #[command(about = "Print shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCmd {
    #[command(about = "Show the loaded configuration and effective options")]
    Show,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct ConfigView<'a> {
    path: Option<String>,
    exists: bool,
    default_profile: Option<&'a str>,
    default_database: Option<String>,
    profiles: Vec<&'a Profile>,
    effective: EffectiveOptions,
}

#[derive(Serialize)]
struct EffectiveOptions {
    buffer_size: usize,
    page_size: usize,
    synchronous: Synchronous,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    let config = CliConfig::load(cli.config.clone())?;
    let profile = cli.profile.as_deref();
    let opts = config.database_options(profile)?;
    let ui = Ui::new(cli.color);

    match cli.command {
        Command::Recover { dir } => {
            let dir = resolve_dir(dir, &config, profile)?;
            let report = recover(&dir, opts.synchronous.syncs())?;
            emit(cli.format, &report, || print_recover_text(&ui, &report))?;
        }
        Command::Log { dir, limit } => {
            let dir = resolve_dir(dir, &config, profile)?;
            let report = inspect_log(&dir, limit)?;
            emit(cli.format, &report, || print_log_text(&ui, &report))?;
        }
        Command::VerifyIndex { dir, index, types } => {
            let dir = resolve_dir(dir, &config, profile)?;
            let types = types
                .iter()
                .map(|t| t.parse::<DataType>())
                .collect::<Result<Vec<_>, _>>()?;
            let report = verify_index(&dir, IndexId(index), &types, &opts)?;
            emit(cli.format, &report, || print_verify_text(&ui, &report))?;
            if !report.success {
                std::process::exit(2);
            }
        }
        Command::Files { dir } => {
            let dir = resolve_dir(dir, &config, profile)?;
            let report = list_files(&dir)?;
            emit(cli.format, &report, || print_files_text(&ui, &report))?;
        }
        Command::Config {
            action: ConfigCmd::Show,
        } => {
            let view = config_view(&config, &opts);
            emit(cli.format, &view, || print_config_text(&ui, &view))?;
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "burrow", &mut io::stdout());
        }
    }

    Ok(())
}

fn resolve_dir(
    explicit: Option<PathBuf>,
    config: &CliConfig,
    profile: Option<&str>,
) -> Result<PathBuf, Box<dyn Error>> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    config
        .database_dir(profile)?
        .ok_or_else(|| "no database directory given and none configured".into())
}

fn config_view<'a>(config: &'a CliConfig, opts: &DatabaseOptions) -> ConfigView<'a> {
    ConfigView {
        path: config.path().map(|p| p.display().to_string()),
        exists: config.path().is_some_and(|p| p.exists()),
        default_profile: config.default_profile_name(),
        default_database: config.default_db_path().map(|p| p.display().to_string()),
        profiles: config.profiles().collect(),
        effective: EffectiveOptions {
            buffer_size: opts.buffer_size,
            page_size: opts.page_size,
            synchronous: opts.synchronous,
        },
    }
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_recover_text(ui: &Ui, report: &RecoverReport) {
    let r = &report.recovery;
    ui.section(
        "Recovery",
        [
            ("dir", report.dir.clone()),
            ("transactions", r.transactions.to_string()),
            ("entries_applied", r.entries_applied.to_string()),
            ("entries_discarded", r.entries_discarded.to_string()),
            ("torn_tail", r.torn_tail.to_string()),
            ("duration", format!("{:.2} ms", report.duration_ms)),
        ],
    );
    ui.list(
        "Files touched",
        r.files_touched.iter().map(|id| id.to_string()),
    );
    ui.list(
        "Files deleted",
        r.files_deleted.iter().map(|id| id.to_string()),
    );
}

fn print_log_text(ui: &Ui, report: &LogReport) {
    if !report.exists {
        ui.warn(&format!("no log at {}", report.path));
        return;
    }
    ui.section(
        "Log",
        [
            ("path", report.path.clone()),
            ("size", report.size_bytes.to_string()),
            ("committed", report.committed_transactions.to_string()),
            ("uncommitted", report.uncommitted_entries.to_string()),
            ("torn_tail", report.torn_tail.to_string()),
        ],
    );
    ui.list(
        "Records",
        report.entries.iter().map(|entry| match entry {
            LogEntry::Write {
                file,
                offset,
                len,
                preview,
            } => format!("write    file={file} offset={offset} len={len} {preview}"),
            LogEntry::Truncate { file, len } => format!("truncate file={file} len={len}"),
            LogEntry::Commit { checksum, valid } => {
                format!("commit   crc={checksum:08x} valid={valid}")
            }
        }),
    );
    if report.truncated > 0 {
        println!("  ... {} more", report.truncated);
    }
}

fn print_verify_text(ui: &Ui, report: &VerifyIndexReport) {
    match (&report.counts, &report.error) {
        (Some(c), _) => {
            ui.success(&format!("index {} is consistent", c.index_id));
            ui.section(
                "Pages",
                [
                    ("total", c.pages),
                    ("leaf", c.leaf_pages),
                    ("parent", c.parent_pages),
                    ("records", c.records),
                    ("depth", u64::from(c.depth)),
                ],
            );
        }
        (None, Some(err)) => ui.warn(&format!("verification failed: {err}")),
        (None, None) => ui.warn("verification failed"),
    }
}

fn print_files_text(ui: &Ui, report: &FilesReport) {
    ui.list(
        &format!("Files in {}", report.dir),
        report
            .files
            .iter()
            .map(|f| format!("{:>6}  {:<18} {} bytes", f.file_id, f.kind, f.size_bytes)),
    );
    if let Some(bytes) = report.log_bytes {
        println!("  log: {bytes} bytes");
    }
    ui.list("Unrecognized", report.unknown.iter().cloned());
}

fn print_config_text(ui: &Ui, view: &ConfigView<'_>) {
    ui.section(
        "Config",
        [
            ("path", view.path.clone().unwrap_or_else(|| "<none>".into())),
            ("exists", view.exists.to_string()),
            (
                "default_profile",
                view.default_profile.unwrap_or("<none>").to_string(),
            ),
            (
                "default_database",
                view.default_database.clone().unwrap_or_else(|| "<none>".into()),
            ),
        ],
    );
    ui.section(
        "Effective options",
        [
            ("buffer_size", view.effective.buffer_size.to_string()),
            ("page_size", view.effective.page_size.to_string()),
            ("synchronous", view.effective.synchronous.to_string()),
        ],
    );
    ui.list(
        "Profiles",
        view.profiles.iter().map(|p| p.name.clone()),
    );
}
