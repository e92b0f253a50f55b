use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use bookdesk_core::config::{SyncConfig, load_config};
use bookdesk_core::error::sync_error_of;
use bookdesk_core::ledger::read_ledger;
use bookdesk_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, inspect_runtime, resolve_paths,
};
use bookdesk_core::sync::{RunOptions, RunReport, SyncReport, build_only, sync_book};
use bookdesk_core::archive::ArchiveReport;
use bookdesk_core::toc::{html_path_for, read_toc};
use bookdesk_core::logging;
use clap::{Args, CommandFactory, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "bookdesk",
    version,
    about = "Publish a Jupyter Book to a Zendesk help center"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Book source directory (holds _toc.yml)")]
    source_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Directory for zendesk.json")]
    state_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    source_dir: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            source_dir: cli.source_dir.clone(),
            state_dir: cli.state_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Build the book HTML only")]
    Build,
    #[command(about = "Publish the book, or archive it with --archive")]
    Sync(SyncArgs),
    #[command(about = "Show resolved paths and the ledger")]
    Status,
    #[command(about = "Show the parsed table of contents")]
    Toc,
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(long, help = "Archive every published article instead of syncing")]
    archive: bool,
    #[arg(long, overrides_with = "no_draft", help = "Leave articles as drafts (default)")]
    draft: bool,
    #[arg(long, overrides_with = "draft", help = "Publish articles live")]
    no_draft: bool,
    #[arg(long, overrides_with = "no_public", help = "Visible to everyone (default)")]
    public: bool,
    #[arg(long, overrides_with = "public", help = "Restrict to the configured user segment")]
    no_public: bool,
    #[arg(long, help = "Use the existing _build/html output")]
    skip_build: bool,
}

impl SyncArgs {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            archive: self.archive,
            draft: !self.no_draft,
            public: !self.no_public,
            skip_build: self.skip_build,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);
    if let Err(error) = logging::init() {
        eprintln!("warning: {error:#}");
    }

    let result = match cli.command {
        Some(Commands::Build) => run_build(&runtime),
        Some(Commands::Sync(args)) => run_sync(&runtime, &args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Toc) => run_toc(&runtime),
        None => {
            let mut command = Cli::command();
            command
                .print_help()
                .map(|()| println!())
                .map_err(anyhow::Error::from)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(exit_code_for(&error))
        }
    }
}

fn exit_code_for(error: &anyhow::Error) -> u8 {
    match sync_error_of(error).map(|error| error.kind()) {
        Some("config") => 2,
        Some("authorization") => 3,
        Some("remote_resource") => 4,
        _ => 1,
    }
}

fn run_build(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    build_only(&paths, &config)?;
    println!("built book");
    println!("source_dir: {}", normalize_path(&paths.source_dir));
    println!("html_dir: {}", normalize_path(&paths.html_dir));
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_sync(runtime: &RuntimeOptions, args: &SyncArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let options = args.run_options();
    match sync_book(&paths, &config, &options)? {
        RunReport::Synced(report) => print_sync_report(&report, &options),
        RunReport::Archived(report) => print_archive_report(&report, &paths),
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn print_sync_report(report: &SyncReport, options: &RunOptions) {
    println!("sync complete");
    println!("success: {}", format_flag(report.success));
    println!("draft: {}", format_flag(options.draft));
    println!("public: {}", format_flag(options.public));
    println!("category_id: {}", report.category_id);
    println!("sections: {}", report.sections);
    println!("created: {}", report.created);
    println!("updated: {}", report.updated);
    println!("uploaded_images: {}", report.uploaded_images);
    println!("relinked: {}", report.relinked);
    println!("request_count: {}", report.request_count);
    println!("ledger: {}", report.ledger_path);
    for entry in &report.articles {
        println!(
            "article: {} [{}] -> {}",
            entry.article_id, entry.section_name, entry.article_html_url
        );
    }
    if !report.article_failures.is_empty() {
        println!("article_failures:");
        for failure in &report.article_failures {
            println!("  - {}: {}", failure.html_file_path, failure.message);
        }
    }
    if !report.asset_failures.is_empty() {
        println!("asset_failures:");
        for failure in &report.asset_failures {
            println!(
                "  - {} ({}): {}",
                failure.html_file_path, failure.failure.src, failure.failure.message
            );
        }
    }
    if !report.unresolved_links.is_empty() {
        println!("unresolved_links:");
        for link in &report.unresolved_links {
            println!("  - {}: {}", link.html_file_path, link.href);
        }
    }
    if !report.unlisted_pages.is_empty() {
        println!("unlisted_pages:");
        for page in &report.unlisted_pages {
            println!("  - {page}");
        }
    }
}

fn print_archive_report(report: &ArchiveReport, paths: &ResolvedPaths) {
    println!("archive complete");
    println!("archived: {}", report.archived.len());
    println!("ledger: {}", normalize_path(&paths.ledger_path));
    println!("ledger_truncated: {}", format_flag(report.ledger_truncated));
    println!("build_removed: {}", format_flag(report.build_removed));
    println!("request_count: {}", report.request_count);
    if !report.warnings.is_empty() {
        println!("warnings:");
        for warning in &report.warnings {
            println!("  - article {}: {}", warning.article_id, warning.message);
        }
    }
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths);
    let ledger = read_ledger(&paths.ledger_path);

    println!("runtime status");
    println!("source_dir: {}", normalize_path(&paths.source_dir));
    println!("toc_exists: {}", format_flag(status.toc_exists));
    println!("html_dir_exists: {}", format_flag(status.html_dir_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("ledger: {}", normalize_path(&paths.ledger_path));
    println!("ledger_exists: {}", format_flag(status.ledger_exists));
    println!(
        "ledger_timestamp: {}",
        if ledger.timestamp.is_empty() {
            "n/a"
        } else {
            ledger.timestamp.as_str()
        }
    );
    println!("ledger_articles: {}", ledger.articles.len());
    for entry in &ledger.articles {
        println!(
            "  - {} [{}:{}] {} -> {}",
            entry.article_id,
            entry.section_id,
            entry.section_name,
            entry.html_file_path,
            entry.article_html_url
        );
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_toc(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let entries = read_toc(&paths.source_dir, config.book.include_root)?;
    println!("toc: {}", normalize_path(&paths.toc_path));
    println!("entries: {}", entries.len());
    for entry in &entries {
        let html_path = html_path_for(&paths.html_dir, &entry.source_file);
        println!(
            "  - [{}] {} -> {} ({})",
            entry.section_name,
            entry.source_file,
            normalize_path(&html_path),
            if html_path.is_file() { "built" } else { "missing" }
        );
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn load_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, SyncConfig)> {
    let paths = resolve_runtime_paths(runtime)?;
    let file = load_config(&paths.config_path)?;
    Ok((paths, SyncConfig::from_config(&file)))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        source_dir: runtime.source_dir.clone(),
        state_dir: runtime.state_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let book_env = initial.source_dir.join(".env");
    if book_env.exists() {
        let _ = dotenvy::from_path_override(&book_env);
    }

    resolve_paths(&context, &overrides)
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
        tracing::debug!("diagnostics printed");
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
