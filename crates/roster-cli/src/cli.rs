use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};
use roster_merge::ResolutionMode;

#[derive(Parser)]
#[command(
    name = "roster",
    about = "Roster administration: profile merges and their audit trail",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Configuration file (default: ./roster.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Merge duplicate user profiles into a main profile
    Merge(MergeArgs),
    /// Inspect the merge audit log
    Audit(AuditArgs),
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("resolution")
        .args(["prefer_main", "prefer_merge", "prefer_longest"])
        .multiple(false)
))]
pub struct MergeArgs {
    /// User that survives the merge
    #[arg(long = "main-id", allow_negative_numbers = true)]
    pub main_id: Option<i64>,
    /// User to merge into the main user (repeatable)
    #[arg(long = "merge-id", allow_negative_numbers = true)]
    pub merge_ids: Vec<i64>,
    /// Show planned actions without changing anything
    #[arg(long)]
    pub dry_run: bool,
    /// Resolve every conflict with the main user's value
    #[arg(long)]
    pub prefer_main: bool,
    /// Resolve every conflict with the merged user's value
    #[arg(long)]
    pub prefer_merge: bool,
    /// Resolve every conflict with the longer value
    #[arg(long)]
    pub prefer_longest: bool,
    /// Never prompt; conflicts need a --prefer-* flag
    #[arg(long)]
    pub no_interactive: bool,
}

impl MergeArgs {
    pub fn mode(&self) -> Option<ResolutionMode> {
        if self.prefer_main {
            Some(ResolutionMode::PreferPrimary)
        } else if self.prefer_merge {
            Some(ResolutionMode::PreferDuplicate)
        } else if self.prefer_longest {
            Some(ResolutionMode::PreferLongest)
        } else {
            None
        }
    }
}

#[derive(Args)]
pub struct AuditArgs {
    #[command(subcommand)]
    pub action: AuditAction,
}

#[derive(Subcommand)]
pub enum AuditAction {
    /// Validate every log line against the event schema
    Verify,
    /// Print recorded merge events
    List {
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}
