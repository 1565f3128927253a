use anyhow::{Context, Result};
use block_patcher::config::{
    commit_plan, load_from_path, locate_target, plan_patch, ApplicationError, PatchConfig,
    PatchPlan, PatchResult, Replacement, Workspace,
};
use block_patcher::edit::EditError;
use block_patcher::locate::{line_number, suggest_anchor, LocateError};
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;

#[derive(Parser)]
#[command(name = "block-patcher")]
#[command(about = "Replace one marker-delimited block in a source file", long_about = None)]
#[command(version)]
struct Cli {
    /// Refuse targets outside this directory. Relative FILE paths still resolve
    /// against the current directory; workspace-relative patch definitions resolve here
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Log more (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Log errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace the block pinned by the anchor
    Apply {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        replacement: ReplacementArgs,

        /// Dry run - show what would be changed without modifying the file
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show a line diff of the change
        #[arg(short, long)]
        diff: bool,
    },

    /// Check whether the block can be located and is already patched
    Check {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        replacement: ReplacementArgs,
    },

    /// Print the block pinned by the anchor
    Extract {
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// File to patch
    #[arg(required_unless_present = "patch")]
    file: Option<PathBuf>,

    /// Load the patch definition from a TOML file
    #[arg(short, long, conflicts_with_all = ["file", "anchor", "start_marker", "end_marker"])]
    patch: Option<PathBuf>,

    /// Substring inside the target block
    #[arg(long)]
    anchor: Option<String>,

    /// Start marker; the nearest one before the anchor is used
    #[arg(long = "start")]
    start_marker: Option<String>,

    /// End marker; the nearest one after the anchor is used
    #[arg(long = "end")]
    end_marker: Option<String>,

    /// Fail if the anchor occurs more than once
    #[arg(long)]
    unique_anchor: bool,
}

#[derive(Args)]
struct ReplacementArgs {
    /// Replacement block text
    #[arg(long, conflicts_with_all = ["replacement_file", "patch"])]
    replacement: Option<String>,

    /// Read the replacement block from a file
    #[arg(long, conflicts_with = "patch")]
    replacement_file: Option<PathBuf>,
}

impl ReplacementArgs {
    fn to_replacement(&self) -> Replacement {
        Replacement {
            text: self.replacement.clone(),
            file: self
                .replacement_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let workspace = match &cli.workspace {
        Some(root) => Workspace::guarded(root)
            .with_context(|| format!("invalid workspace {}", root.display()))?,
        None => Workspace::unrestricted(env::current_dir()?),
    };

    match cli.command {
        Commands::Apply {
            target,
            replacement,
            dry_run,
            diff,
        } => {
            let config = build_config(&target, Some(&replacement))?;
            cmd_apply(&config, &workspace, dry_run, diff)
        }

        Commands::Check {
            target,
            replacement,
        } => {
            let config = build_config(&target, Some(&replacement))?;
            cmd_check(&config, &workspace)
        }

        Commands::Extract { target } => {
            let config = build_config(&target, None)?;
            cmd_extract(&config, &workspace)
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

/// Build the patch definition from `--patch` or the inline arguments.
fn build_config(
    target: &TargetArgs,
    replacement: Option<&ReplacementArgs>,
) -> Result<PatchConfig> {
    if let Some(path) = &target.patch {
        let config = load_from_path(path)?;
        return Ok(if target.unique_anchor {
            config.with_unique_anchor(true)
        } else {
            config
        });
    }

    let file = target
        .file
        .as_ref()
        .context("a target file or --patch is required")?;

    let config = PatchConfig::inline(
        file.to_string_lossy(),
        target.anchor.clone().unwrap_or_default(),
        target.start_marker.clone().unwrap_or_default(),
        target.end_marker.clone().unwrap_or_default(),
        replacement
            .map(ReplacementArgs::to_replacement)
            .unwrap_or_default(),
    )
    .with_unique_anchor(target.unique_anchor);

    let validation = match replacement {
        Some(_) => config.validate(),
        None => config.validate_target(),
    };
    validation.map_err(|e| anyhow::anyhow!("invalid arguments:\n{e}"))?;

    Ok(config)
}

fn lines_label(plan: &PatchPlan) -> String {
    let start = plan.span.start_line(&plan.original);
    let end = plan.span.end_line(&plan.original);
    if start == end {
        format!("line {start}")
    } else {
        format!("lines {start}-{end}")
    }
}

/// Helper: Show a line diff between original and patched content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
    if !modified.ends_with('\n') {
        println!();
    }
}

/// Print a failure with likely causes, then exit non-zero.
fn fail(config: &PatchConfig, error: &ApplicationError) -> ! {
    let id = &config.patch.id;
    eprintln!("{} {}: Error - {}", "✗".red(), id, error);

    match error {
        ApplicationError::Locate { file, source } => {
            eprintln!("  File: {}", file.display());
            match source {
                LocateError::AnchorNotFound { anchor } => {
                    eprintln!("  {}", "CONFLICT: Anchor matched no locations".red());
                    eprintln!("  Possible causes:");
                    eprintln!("    - Target construct was renamed or removed");
                    eprintln!("    - Patch was already applied and rewrote the anchor");
                    let hint = fs::read_to_string(file)
                        .ok()
                        .and_then(|buffer| suggest_anchor(&buffer, anchor));
                    if let Some(hint) = hint {
                        eprintln!(
                            "  Closest line {}: {}",
                            hint.line,
                            hint.text.as_str().yellow()
                        );
                    }
                }
                LocateError::StartMarkerNotFound { anchor_line, .. } => {
                    eprintln!(
                        "  {}",
                        format!("CONFLICT: No start marker before the anchor (line {anchor_line})")
                            .red()
                    );
                    eprintln!("  Possible causes:");
                    eprintln!("    - Start marker was removed or changed");
                    eprintln!("    - Anchor now sits outside any delimited block");
                }
                LocateError::EndMarkerNotFound { anchor_line, .. } => {
                    eprintln!(
                        "  {}",
                        format!("CONFLICT: No end marker after the anchor (line {anchor_line})")
                            .red()
                    );
                    eprintln!("  Possible causes:");
                    eprintln!("    - End marker was removed or changed");
                    eprintln!("    - Markers were reordered");
                }
                LocateError::AmbiguousAnchor { count, .. } => {
                    eprintln!(
                        "  {}",
                        format!("CONFLICT: Anchor matched {} locations (expected 1)", count).red()
                    );
                    eprintln!("  Action: Make the anchor more specific");
                }
                LocateError::EmptyPattern { .. } => {}
            }
        }
        ApplicationError::Edit(EditError::BeforeTextMismatch { file, .. }) => {
            eprintln!("  File: {}", file.display());
            eprintln!("  {}", "File changed while patching; nothing was written".red());
        }
        e if e.is_filesystem() => {
            eprintln!("  Nothing was written");
        }
        _ => {}
    }

    std::process::exit(1);
}

fn cmd_apply(
    config: &PatchConfig,
    workspace: &Workspace,
    dry_run: bool,
    show_diff: bool,
) -> Result<()> {
    let id = &config.patch.id;
    let plan = plan_patch(config, workspace).unwrap_or_else(|e| fail(config, &e));

    if plan.already_applied {
        println!(
            "{} {}: Already applied to {}",
            "⊙".yellow(),
            id,
            plan.file.display()
        );
        return Ok(());
    }

    if show_diff {
        display_diff(&plan.file, &plan.original, &plan.patched);
    }

    if dry_run {
        println!("{}", "[DRY RUN - nothing written]".cyan());
        println!(
            "{} {}: Would apply to {} ({})",
            "✓".green(),
            id,
            plan.file.display(),
            lines_label(&plan)
        );
        return Ok(());
    }

    match commit_plan(&plan).unwrap_or_else(|e| fail(config, &e)) {
        PatchResult::AlreadyApplied { file } => {
            println!("{} {}: Already applied to {}", "⊙".yellow(), id, file.display());
        }
        result => {
            println!(
                "{} {}: Applied to {} ({})",
                "✓".green(),
                id,
                result.file().display(),
                lines_label(&plan)
            );
        }
    }

    Ok(())
}

fn cmd_check(config: &PatchConfig, workspace: &Workspace) -> Result<()> {
    let id = &config.patch.id;
    let plan = plan_patch(config, workspace).unwrap_or_else(|e| fail(config, &e));

    if plan.already_applied {
        println!(
            "{} {}: Applied ({}, {})",
            "✓".green(),
            id,
            plan.file.display(),
            lines_label(&plan)
        );
    } else {
        println!(
            "{} {}: Not applied ({}, block at {})",
            "⊙".yellow(),
            id,
            plan.file.display(),
            lines_label(&plan)
        );
    }

    Ok(())
}

fn cmd_extract(config: &PatchConfig, workspace: &Workspace) -> Result<()> {
    let located = locate_target(config, workspace).unwrap_or_else(|e| fail(config, &e));

    tracing::info!(
        file = %located.file.display(),
        line = line_number(&located.buffer, located.span.start),
        "block extracted"
    );
    println!("{}", located.text());
    Ok(())
}
