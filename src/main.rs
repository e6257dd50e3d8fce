use anyhow::{Context, Result};
use binpatch::config::{apply_patches, check_patches, load_from_path, PatchResult};
use binpatch::hex::parse_address;
use binpatch::manifest::{PatchManifest, VersionDetail};
use binpatch::{
    ByteOutcome, BytePatch, ByteState, EncodingRule, Patcher, PatternOutcome, PatternState,
    ReplacePattern, ReplacePlan, ScanOptions, SearchPattern, SearchStrategy, Version,
};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "binpatch")]
#[command(about = "Binary pattern search and patch engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patch files to an installation
    Apply {
        /// Directory that root-relative patch paths are resolved against
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Patch file or directory of patch files (defaults to <root>/patches)
        #[arg(short, long)]
        patches: Option<PathBuf>,

        /// Installed version, checked against each file's `versions` list
        #[arg(long = "target-version")]
        target_version: Option<String>,
    },

    /// Check status of patches without applying
    Status {
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        #[arg(short, long)]
        patches: Option<PathBuf>,

        #[arg(long = "target-version")]
        target_version: Option<String>,
    },

    /// Conditionally rewrite one byte
    Byte {
        file: PathBuf,

        /// Hex address, `0x` prefix optional
        #[arg(short, long)]
        address: String,

        #[arg(short, long)]
        expected: String,

        #[arg(short, long)]
        new: String,

        /// Only report the current state
        #[arg(long)]
        check: bool,
    },

    /// Replace a wildcard pattern
    Replace {
        file: PathBuf,

        /// Search pattern, e.g. "4D ?? 4B"
        #[arg(short, long)]
        search: String,

        /// Replacement, `??` leaves a byte unchanged
        #[arg(short, long)]
        replace: String,

        #[arg(short = 'c', long, default_value_t = 1)]
        max_count: usize,

        /// Write at these hex offsets instead of searching
        #[arg(long = "at", value_delimiter = ',')]
        offsets: Vec<String>,

        /// Treat `??` in the search pattern as an error
        #[arg(long)]
        no_wildcard: bool,

        /// Only report what would be replaced
        #[arg(long, conflicts_with = "offsets")]
        check: bool,
    },

    /// Search a file for a pattern
    Search {
        file: PathBuf,

        #[arg(short, long)]
        pattern: String,

        /// Report the offset of this pattern position instead of the match start
        #[arg(short, long)]
        target_index: Option<usize>,

        #[arg(long, value_enum, default_value_t = StrategyArg::Parallel)]
        strategy: StrategyArg,

        /// Worker multiplier for the parallel scan
        #[arg(long, default_value_t = binpatch::matcher::DEFAULT_PARALLEL_MULTIPLIER)]
        parallel_multiplier: usize,
    },

    /// Patch-metadata documents
    Manifest {
        #[command(subcommand)]
        command: ManifestCommands,
    },

    /// Packed version encoding
    Version {
        #[command(subcommand)]
        command: VersionCommands,
    },
}

#[derive(Subcommand)]
enum ManifestCommands {
    /// Apply the entry for a version to a file
    Apply {
        /// JSON document
        manifest: PathBuf,

        #[arg(long = "target-version")]
        target_version: String,

        #[arg(short, long)]
        file: PathBuf,

        #[arg(long)]
        check: bool,
    },

    /// Print a single-entry document
    Emit {
        #[arg(long = "target-version")]
        target_version: String,

        #[arg(long)]
        offset: String,

        #[arg(long)]
        old: String,

        #[arg(long)]
        new: String,
    },
}

#[derive(Subcommand)]
enum VersionCommands {
    /// Pack a dotted version
    Encode {
        version: Version,

        #[arg(short, long, default_value = "offset")]
        rule: EncodingRule,
    },

    /// Unpack a hex-encoded version
    Decode {
        encoded: String,

        #[arg(short, long, default_value = "offset")]
        rule: EncodingRule,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Parallel,
    SkipTable,
}

impl From<StrategyArg> for SearchStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Parallel => SearchStrategy::Parallel,
            StrategyArg::SkipTable => SearchStrategy::SkipTable,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("binpatch={level}").parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Apply {
            root,
            patches,
            target_version,
        } => cmd_apply(&root, patches, target_version.as_deref()),

        Commands::Status {
            root,
            patches,
            target_version,
        } => cmd_status(&root, patches, target_version.as_deref()),

        Commands::Byte {
            file,
            address,
            expected,
            new,
            check,
        } => run_byte(&file, BytePatch::parse(&address, &expected, &new)?, check),

        Commands::Replace {
            file,
            search,
            replace,
            max_count,
            offsets,
            no_wildcard,
            check,
        } => cmd_replace(
            &file,
            &search,
            &replace,
            max_count,
            &offsets,
            !no_wildcard,
            check,
        ),

        Commands::Search {
            file,
            pattern,
            target_index,
            strategy,
            parallel_multiplier,
        } => cmd_search(
            &file,
            &pattern,
            target_index,
            strategy.into(),
            parallel_multiplier,
        ),

        Commands::Manifest { command } => match command {
            ManifestCommands::Apply {
                manifest,
                target_version,
                file,
                check,
            } => cmd_manifest_apply(&manifest, &target_version, &file, check),
            ManifestCommands::Emit {
                target_version,
                offset,
                old,
                new,
            } => cmd_manifest_emit(target_version, offset, old, new),
        },

        Commands::Version { command } => match command {
            VersionCommands::Encode { version, rule } => {
                let encoded = version.encode(rule)?;
                println!("{encoded:#010X}");
                Ok(())
            }
            VersionCommands::Decode { encoded, rule } => {
                let value = u32::try_from(parse_address(&encoded)?)
                    .with_context(|| format!("{encoded} does not fit in 32 bits"))?;
                println!("{}", Version::decode(value, rule)?);
                Ok(())
            }
        },
    }
}

/// Helper: Collect patch files from a file or a directory of `*.toml`.
///
/// Defaults to `<root>/patches` when no path is given.
fn discover_patch_files(root: &Path, patches: Option<PathBuf>) -> Result<Vec<PathBuf>> {
    let location = patches.unwrap_or_else(|| root.join("patches"));
    if location.is_file() {
        return Ok(vec![location]);
    }
    if !location.is_dir() {
        anyhow::bail!("No patch file or directory at {}", location.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&location).max_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
        {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();

    if files.is_empty() {
        anyhow::bail!("No .toml patch files found in {}", location.display());
    }
    debug!(count = files.len(), dir = %location.display(), "discovered patch files");
    Ok(files)
}

fn print_header(root: &Path, target_version: Option<&str>) {
    println!("Root: {}", root.display());
    println!("Version: {}", target_version.unwrap_or("(not given)"));
    println!();
}

fn cmd_apply(root: &Path, patches: Option<PathBuf>, target_version: Option<&str>) -> Result<()> {
    let patch_files = discover_patch_files(root, patches)?;
    print_header(root, target_version);

    let mut total_applied = 0;
    let mut total_already_applied = 0;
    let mut total_skipped = 0;
    let mut total_failed = 0;

    for patch_file in patch_files {
        println!("Loading patches from {}...", patch_file.display());
        let config = load_from_path(&patch_file)?;

        for (patch_id, result) in apply_patches(&config, root, target_version) {
            match result {
                Ok(PatchResult::Applied { file, writes }) => {
                    println!(
                        "{} {}: Applied {} write(s) to {}",
                        "✓".green(),
                        patch_id,
                        writes,
                        file.display()
                    );
                    total_applied += 1;
                }
                Ok(PatchResult::AlreadyApplied { file }) => {
                    println!(
                        "{} {}: Already applied to {}",
                        "⊙".yellow(),
                        patch_id,
                        file.display()
                    );
                    total_already_applied += 1;
                }
                Ok(PatchResult::SkippedVersion { reason }) => {
                    println!("{} {}: Skipped ({})", "⊘".cyan(), patch_id, reason);
                    total_skipped += 1;
                }
                Ok(PatchResult::NoMatch { file }) => {
                    eprintln!("{} {}: Pattern not found", "✗".red(), patch_id);
                    eprintln!("  File: {}", file.display());
                    eprintln!("  Possible causes:");
                    eprintln!("    - The binary is a different build than the patch targets");
                    eprintln!("    - The signature needs more wildcards");
                    total_failed += 1;
                }
                Ok(PatchResult::Failed { file, reason }) => {
                    eprintln!("{} {}: Failed - {}", "✗".red(), patch_id, reason);
                    eprintln!("  File: {}", file.display());
                    total_failed += 1;
                }
                Err(e) => {
                    eprintln!("{} {}: Error - {}", "✗".red(), patch_id, e);
                    total_failed += 1;
                }
            }
        }

        println!();
    }

    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", total_applied).green());
    println!(
        "  {} already applied",
        format!("{}", total_already_applied).yellow()
    );
    println!("  {} skipped", format!("{}", total_skipped).cyan());
    println!("  {} failed", format!("{}", total_failed).red());

    if total_failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_status(root: &Path, patches: Option<PathBuf>, target_version: Option<&str>) -> Result<()> {
    let patch_files = discover_patch_files(root, patches)?;

    println!("{}", "Patch Status Report".bold());
    print_header(root, target_version);

    let mut applied = Vec::new();
    let mut not_applied = Vec::new();
    let mut skipped = Vec::new();
    let mut broken = Vec::new();

    for patch_file in patch_files {
        let config = load_from_path(&patch_file)?;

        for (patch_id, result) in check_patches(&config, root, target_version) {
            match result {
                Ok(PatchResult::Applied { writes, .. }) => {
                    not_applied.push((patch_id, format!("{writes} pending write(s)")));
                }
                Ok(PatchResult::AlreadyApplied { .. }) => applied.push(patch_id),
                Ok(PatchResult::SkippedVersion { reason }) => skipped.push((patch_id, reason)),
                Ok(PatchResult::NoMatch { .. }) => {
                    broken.push((patch_id, "pattern not found".to_string()));
                }
                Ok(PatchResult::Failed { reason, .. }) => broken.push((patch_id, reason)),
                Err(e) => broken.push((patch_id, e.to_string())),
            }
        }
    }

    if !applied.is_empty() {
        println!(
            "{} {} ({} patches)",
            "✓".green(),
            "APPLIED".green().bold(),
            applied.len()
        );
        for id in &applied {
            println!("  - {}", id);
        }
        println!();
    }

    let groups = [
        ("⊙".yellow(), "NOT APPLIED".yellow().bold(), &not_applied),
        ("⊘".cyan(), "SKIPPED".cyan().bold(), &skipped),
        ("✗".red(), "UNAPPLICABLE".red().bold(), &broken),
    ];
    for (glyph, title, entries) in groups {
        if entries.is_empty() {
            continue;
        }
        println!("{} {} ({} patches)", glyph, title, entries.len());
        for (id, reason) in entries {
            println!("  - {} ({})", id, reason.dimmed());
        }
        println!();
    }

    if !broken.is_empty() {
        std::process::exit(1);
    }

    Ok(())
}

fn run_byte(file: &Path, patch: BytePatch, check: bool) -> Result<()> {
    let patcher = Patcher::new(file)?;

    if check {
        match patcher.inspect_byte(&patch)? {
            ByteState::Patched => println!("{} {:#X}: patched", "✓".green(), patch.address),
            ByteState::Unpatched => {
                println!("{} {:#X}: not patched", "⊙".yellow(), patch.address)
            }
            ByteState::Unexpected(found) => {
                eprintln!(
                    "{} {:#X}: unexpected byte {:02X}",
                    "✗".red(),
                    patch.address,
                    found
                );
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    match patcher.replace_byte(&patch)? {
        ByteOutcome::Written => println!(
            "{} {:#X}: {:02X} -> {:02X}",
            "✓".green(),
            patch.address,
            patch.expected,
            patch.new
        ),
        ByteOutcome::AlreadyPatched => {
            println!("{} {:#X}: already patched", "⊙".yellow(), patch.address)
        }
        ByteOutcome::Mismatch { found } => {
            eprintln!(
                "{} {:#X}: found {:02X}, expected {:02X}",
                "✗".red(),
                patch.address,
                found,
                patch.expected
            );
            std::process::exit(1);
        }
    }
    Ok(())
}

fn format_offsets(offsets: &[usize]) -> String {
    offsets
        .iter()
        .map(|offset| format!("{offset:#X}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn cmd_replace(
    file: &Path,
    search: &str,
    replace: &str,
    max_count: usize,
    offsets: &[String],
    allow_wildcard: bool,
    check: bool,
) -> Result<()> {
    let plan = ReplacePlan::new(
        SearchPattern::parse(search, allow_wildcard)?,
        ReplacePattern::parse(replace)?,
    )?;
    let patcher = Patcher::new(file)?;

    if check {
        match patcher.inspect_pattern(&plan, max_count)? {
            PatternState::Pending { offsets } => println!(
                "{} would replace at {}",
                "⊙".yellow(),
                format_offsets(&offsets)
            ),
            PatternState::Applied => println!("{} already applied", "✓".green()),
            PatternState::Absent => {
                eprintln!("{} pattern not found", "✗".red());
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let outcome = if offsets.is_empty() {
        patcher.replace_pattern(&plan, max_count)?
    } else {
        let parsed = offsets
            .iter()
            .map(|text| {
                let value = parse_address(text)?;
                usize::try_from(value).with_context(|| format!("offset {text} is too large"))
            })
            .collect::<Result<Vec<_>>>()?;
        patcher.replace_at(&plan, parsed)?
    };

    match outcome {
        PatternOutcome::Replaced { offsets } => println!(
            "{} replaced at {}",
            "✓".green(),
            format_offsets(&offsets)
        ),
        PatternOutcome::AlreadyApplied => println!("{} already applied", "⊙".yellow()),
        PatternOutcome::NoMatch => {
            eprintln!("{} pattern not found", "✗".red());
            std::process::exit(1);
        }
    }
    Ok(())
}

fn cmd_search(
    file: &Path,
    pattern: &str,
    target_index: Option<usize>,
    strategy: SearchStrategy,
    parallel_multiplier: usize,
) -> Result<()> {
    let pattern: SearchPattern = pattern.parse()?;
    let scan = ScanOptions {
        parallel_multiplier,
        ..ScanOptions::default()
    };
    let patcher = Patcher::new(file)?.with_scan_options(scan);

    let offsets = match target_index {
        Some(index) => patcher.search_with_target_index(&pattern, index)?,
        None => {
            let buffer = patcher.read_buffer()?;
            strategy.find(&buffer, &pattern, &scan)
        }
    };

    for offset in &offsets {
        println!("{offset:#X}");
    }
    eprintln!("{} {} match(es)", "✓".green(), offsets.len());
    Ok(())
}

fn cmd_manifest_apply(
    manifest: &Path,
    target_version: &str,
    file: &Path,
    check: bool,
) -> Result<()> {
    let document = PatchManifest::load(manifest)?;
    let patch = document.byte_patch(target_version)?;
    println!(
        "Version {}: {:#X} {:02X} -> {:02X}",
        target_version, patch.address, patch.expected, patch.new
    );
    run_byte(file, patch, check)
}

fn cmd_manifest_emit(
    target_version: String,
    offset: String,
    old: String,
    new: String,
) -> Result<()> {
    let detail = VersionDetail::new(offset, old, new);
    detail
        .to_byte_patch()
        .context("refusing to emit an invalid entry")?;
    let document = PatchManifest::single(target_version, detail);
    println!("{}", document.to_json_pretty()?);
    Ok(())
}
