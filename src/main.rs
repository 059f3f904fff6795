//! mdflow CLI - Markdown agentic workflow compiler

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use walkdir::WalkDir;

use mdflow::compiler::Compiler;
use mdflow::error::{Diagnostics, Severity};

#[derive(Parser)]
#[command(name = "mdflow")]
#[command(about = "Compiles Markdown agentic workflows to GitHub Actions lock files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ActionMode {
    /// Reference action scripts by local checkout path
    Dev,
    /// Reference published action refs
    Release,
}

impl ActionMode {
    fn as_str(&self) -> &'static str {
        match self {
            ActionMode::Dev => "dev",
            ActionMode::Release => "release",
        }
    }
}

impl std::fmt::Display for ActionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a workflow file (or every workflow under .github/workflows)
    Compile {
        /// Path to the .md workflow file
        file: Option<PathBuf>,

        /// Escalate upgradeable warnings to errors
        #[arg(long)]
        strict: bool,

        /// Action reference mode
        #[arg(long, value_enum, default_value_t = ActionMode::Release)]
        action_mode: ActionMode,
    },

    /// Parse and validate a workflow file without writing the lock file
    Validate {
        /// Path to the .md workflow file
        file: PathBuf,

        /// Escalate upgradeable warnings to errors
        #[arg(long)]
        strict: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Compile {
            file,
            strict,
            action_mode,
        } => {
            let compiler = Compiler::new(action_mode.as_str(), strict);
            match file {
                Some(path) => exit_code(compile_one(&compiler, &path)),
                None => compile_all(&compiler),
            }
        }
        Commands::Validate { file, strict } => validate_one(strict, &file),
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn compile_one(compiler: &Compiler, path: &Path) -> bool {
    match compiler.compile_and_write(path) {
        Ok(result) => {
            print_warnings(&result.warnings);
            println!(
                "{} {} {} {}",
                "✓".green(),
                path.display(),
                "→".cyan(),
                result.lock_path.display()
            );
            true
        }
        Err(diags) => {
            print_diagnostics(&diags);
            false
        }
    }
}

/// With no file argument, compile every Markdown workflow under
/// `.github/workflows`. One failure does not stop the rest.
fn compile_all(compiler: &Compiler) -> ExitCode {
    let root = Path::new(".github/workflows");
    if !root.is_dir() {
        eprintln!(
            "{} no workflow file given and {} does not exist",
            "Error:".red().bold(),
            root.display()
        );
        return ExitCode::FAILURE;
    }

    let mut failures = 0usize;
    let mut compiled = 0usize;
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        compiled += 1;
        if !compile_one(compiler, path) {
            failures += 1;
        }
    }

    if compiled == 0 {
        println!("{} no Markdown workflows found under {}", "→".cyan(), root.display());
    }
    if failures > 0 {
        eprintln!(
            "{} {failures} of {compiled} workflows failed to compile",
            "Error:".red().bold()
        );
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn validate_one(strict: bool, path: &Path) -> ExitCode {
    let compiler = Compiler::new("release", strict);
    match compiler.compile_workflow(path) {
        Ok(result) => {
            print_warnings(&result.warnings);
            println!("{} Workflow '{}' is valid", "✓".green(), path.display());
            ExitCode::SUCCESS
        }
        Err(diags) => {
            print_diagnostics(&diags);
            ExitCode::FAILURE
        }
    }
}

fn print_diagnostics(diags: &Diagnostics) {
    for diag in &diags.items {
        match diag.severity {
            Severity::Error => eprintln!("{} {}", "Error:".red().bold(), diag),
            Severity::Warning => eprintln!("{} {}", "Warning:".yellow().bold(), diag),
        }
        if let Some(suggestion) = diag.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
    }
}

fn print_warnings(warnings: &[mdflow::error::CompilerError]) {
    for warning in warnings {
        eprintln!("{} {}", "Warning:".yellow().bold(), warning);
        if let Some(suggestion) = warning.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
    }
}
