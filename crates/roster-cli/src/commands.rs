use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use roster_audit::AuditLog;
use roster_merge::{MergeEngine, MergeError, MergePreview, MergeReport, MergeRequest, MergeSuccess};
use roster_store::InMemoryRecordStore;
use roster_types::ReferenceRegistry;
use serde_json::json;

use crate::cli::*;
use crate::config::RosterConfig;
use crate::prompt::TerminalPrompter;

pub const EXIT_OK: i32 = 0;
pub const EXIT_STORAGE: i32 = 1;
pub const EXIT_UNRESOLVED: i32 = 2;
pub const EXIT_VALIDATION: i32 = 4;
pub const EXIT_ABORTED: i32 = 5;

/// Run one command and return the process exit code.
pub fn run_command(cli: Cli) -> anyhow::Result<i32> {
    let config = RosterConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Merge(args) => cmd_merge(&args, &config, cli.format),
        Command::Audit(args) => cmd_audit(args, &config, cli.format),
    }
}

pub fn exit_code(err: &MergeError) -> i32 {
    match err {
        MergeError::Validation(_) => EXIT_VALIDATION,
        MergeError::ConflictUnresolved { .. } => EXIT_UNRESOLVED,
        MergeError::Aborted => EXIT_ABORTED,
        MergeError::Storage(_) => EXIT_STORAGE,
    }
}

fn cmd_merge(args: &MergeArgs, config: &RosterConfig, format: OutputFormat) -> anyhow::Result<i32> {
    let Some(main_id) = args.main_id else {
        return Ok(print_failure(format, "--main-id is required", EXIT_VALIDATION));
    };
    let registry = config.registry()?;
    let store = open_store(&config.store_path, &registry)?;
    let audit = AuditLog::new(config.audit_log.clone(), config.audit_sync)?;
    let engine =
        MergeEngine::new(Arc::new(store), registry, Arc::new(audit), config.merge_config());

    let mut request = MergeRequest::new(main_id, args.merge_ids.iter().copied())
        .with_dry_run(args.dry_run)
        .with_non_interactive(args.no_interactive);
    if let Some(mode) = args.mode() {
        request = request.with_mode(mode);
    }

    let outcome = if args.no_interactive {
        engine.merge(&request)
    } else {
        engine.merge_interactive(&request, &mut TerminalPrompter)
    };

    match outcome {
        Ok(report) => {
            match (format, &report) {
                (OutputFormat::Json, _) => println!("{}", serde_json::to_string_pretty(&report)?),
                (OutputFormat::Text, MergeReport::Preview(preview)) => {
                    print_preview(preview);
                    println!("\n{} Dry run: nothing was changed.", "i".blue().bold());
                }
                (OutputFormat::Text, MergeReport::Committed(success)) => print_success(success),
            }
            Ok(EXIT_OK)
        }
        Err(e) => {
            let code = exit_code(&e);
            print_failure(format, &e.to_string(), code);
            if matches!(e, MergeError::ConflictUnresolved { .. }) && format == OutputFormat::Text {
                eprintln!("  rerun with --prefer-main, --prefer-merge or --prefer-longest");
            }
            Ok(code)
        }
    }
}

fn cmd_audit(args: AuditArgs, config: &RosterConfig, format: OutputFormat) -> anyhow::Result<i32> {
    let log = AuditLog::new(config.audit_log.clone(), config.audit_sync)?;
    match args.action {
        AuditAction::Verify => {
            let report = log.verify()?;
            match format {
                OutputFormat::Json => {
                    let invalid: Vec<_> = report
                        .invalid
                        .iter()
                        .map(|bad| json!({ "line": bad.line, "reason": bad.reason }))
                        .collect();
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({
                            "valid": report.valid,
                            "invalid": invalid,
                        }))?
                    );
                }
                OutputFormat::Text => {
                    for bad in &report.invalid {
                        println!("  {} line {}: {}", "✗".red(), bad.line, bad.reason);
                    }
                    if report.is_clean() {
                        println!("{} {} events, all valid.", "✓".green().bold(), report.valid);
                    } else {
                        println!(
                            "{} {} valid, {} invalid in {}",
                            "✗".red().bold(),
                            report.valid,
                            report.invalid.len(),
                            log.path().display()
                        );
                    }
                }
            }
            Ok(if report.is_clean() { EXIT_OK } else { EXIT_VALIDATION })
        }
        AuditAction::List { limit } => {
            let events = log.read_events()?;
            let skip = limit.map_or(0, |n| events.len().saturating_sub(n));
            let recent = &events[skip..];
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(recent)?),
                OutputFormat::Text => {
                    if recent.is_empty() {
                        println!("Audit log: no merges recorded.");
                    }
                    for event in recent {
                        let merged = id_list(&event.merged_ids);
                        println!(
                            "{}  {} <- {}",
                            event.timestamp.to_rfc3339().dimmed(),
                            format!("#{}", event.primary_id).yellow().bold(),
                            merged
                        );
                        for (field, tag) in &event.field_resolutions {
                            println!("    {:<16} {}", field.label(), tag.to_string().cyan());
                        }
                    }
                }
            }
            Ok(EXIT_OK)
        }
    }
}

/// Open the snapshot and declare any registered table it does not hold yet.
fn open_store(path: &Path, registry: &ReferenceRegistry) -> anyhow::Result<InMemoryRecordStore> {
    let store = InMemoryRecordStore::open(path)
        .with_context(|| format!("opening store {}", path.display()))?;
    for reference in registry.iter() {
        if store.has_table(&reference.table) {
            continue;
        }
        let keys = if reference.is_scoped() {
            let key = std::iter::once(reference.column.clone())
                .chain(reference.unique_scope.iter().cloned())
                .collect();
            vec![key]
        } else {
            Vec::new()
        };
        store.define_table(&reference.table, keys)?;
        tracing::debug!(table = %reference.table, "declared empty reference table");
    }
    Ok(store)
}

fn print_failure(format: OutputFormat, message: &str, code: i32) -> i32 {
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "outcome": "error", "error": message, "exit_code": code })
        ),
        OutputFormat::Text => eprintln!("{} {}", "error:".red().bold(), message),
    }
    code
}

/// Render a planned merge: duplicates, field changes, open conflicts, relinks.
pub(crate) fn print_preview(preview: &MergePreview) {
    println!(
        "{} {} ({})",
        "Merge into".bold(),
        format!("#{}", preview.primary_id).yellow().bold(),
        preview.primary_name
    );
    println!("  {:<8} {:<24} {:<12} {}", "ID", "Name", "Action", "Conflicts");
    for dup in &preview.duplicates {
        let conflicts = if dup.conflicts.is_empty() {
            "-".to_string()
        } else {
            dup.conflicts.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(", ")
        };
        println!(
            "  {:<8} {:<24} {} {}",
            dup.id.get(),
            dup.name,
            format!("{:<12}", "soft delete").red(),
            conflicts
        );
    }

    if !preview.field_changes.is_empty() {
        println!("\n{}", "Field changes".bold());
        for change in &preview.field_changes {
            let how = change
                .resolution
                .map_or_else(|| "filled".to_string(), |tag| tag.to_string());
            println!(
                "  {:<16} {} -> {} ({})",
                change.field.label(),
                shown(&change.before).dimmed(),
                shown(&change.after).green(),
                how
            );
        }
    }

    if preview.has_pending() {
        println!("\n{}", "Unresolved conflicts".yellow().bold());
        for conflict in &preview.pending {
            println!(
                "  {:<16} main #{}: {}  merge #{}: {}",
                conflict.field.label(),
                conflict.primary_id,
                conflict.primary,
                conflict.duplicate_id,
                conflict.duplicate
            );
        }
    }

    if !preview.relinks.is_empty() {
        println!("\n{}", "References".bold());
        for plan in &preview.relinks {
            println!(
                "  {}.{}: {} relinked, {} dropped",
                plan.table,
                plan.column,
                plan.relinked.len(),
                plan.dropped.len()
            );
        }
    }
}

fn print_success(success: &MergeSuccess) {
    println!(
        "{} Merged {} into {}",
        "✓".green().bold(),
        id_list(&success.merged_ids).yellow(),
        format!("#{}", success.primary_id).yellow().bold()
    );
    for (field, tag) in &success.field_resolutions {
        println!("  {:<16} {}", field.label(), tag.to_string().cyan());
    }
    let relinked: usize = success.relinks.iter().map(|p| p.relinked.len()).sum();
    let dropped: usize = success.relinks.iter().map(|p| p.dropped.len()).sum();
    println!("  References: {relinked} relinked, {dropped} dropped");
    for warning in &success.warnings {
        println!("{} {}", "warning:".yellow().bold(), warning);
    }
}

fn shown(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("(empty)")
}

fn id_list(ids: &[roster_types::UserId]) -> String {
    ids.iter().map(|id| format!("#{id}")).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    use clap::Parser;
    use roster_store::{RecordStore, RowFilter};
    use roster_types::{MergeField, UserId, UserRecord};
    use serde_json::Value;

    struct Workspace {
        dir: tempfile::TempDir,
    }

    impl Workspace {
        /// Users 3 and 5 disagree on phone; 5 has an email 3 lacks.
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = InMemoryRecordStore::new();
            store
                .insert_user(
                    UserRecord::new(uid(3), "Kim", "Ono").with(MergeField::Phone, "555-1234"),
                )
                .unwrap();
            store
                .insert_user(
                    UserRecord::new(uid(5), "Kim", "Ono")
                        .with(MergeField::Phone, "555-5678")
                        .with(MergeField::Email, "kim@example.org"),
                )
                .unwrap();
            store
                .define_table(
                    "organization_memberships",
                    vec![vec!["user_id".into(), "organization_id".into()]],
                )
                .unwrap();
            let mut row = RowFilter::new();
            row.insert("user_id".into(), Value::from(5));
            row.insert("organization_id".into(), Value::from(9));
            store.insert_row("organization_memberships", row).unwrap();
            store.save(&dir.path().join("roster.json")).unwrap();

            let config = format!(
                "store_path = {:?}\naudit_log = {:?}\n",
                dir.path().join("roster.json"),
                dir.path().join("logs").join("merge_profile.log"),
            );
            fs::write(dir.path().join("roster.toml"), config).unwrap();
            Self { dir }
        }

        fn config_path(&self) -> PathBuf {
            self.dir.path().join("roster.toml")
        }

        fn run(&self, args: &[&str]) -> i32 {
            let config = self.config_path();
            let mut argv = vec!["roster", "--config", config.to_str().unwrap()];
            argv.extend_from_slice(args);
            run_command(Cli::try_parse_from(argv).unwrap()).unwrap()
        }

        fn store(&self) -> InMemoryRecordStore {
            InMemoryRecordStore::load(&self.dir.path().join("roster.json")).unwrap()
        }

        fn audit_lines(&self) -> usize {
            fs::read_to_string(self.dir.path().join("logs").join("merge_profile.log"))
                .map(|text| text.lines().count())
                .unwrap_or(0)
        }
    }

    fn uid(raw: i64) -> UserId {
        UserId::new(raw).unwrap()
    }

    #[test]
    fn merge_with_prefer_main_persists_and_audits() {
        let ws = Workspace::new();
        let code = ws.run(&[
            "merge", "--main-id", "3", "--merge-id", "5", "--prefer-main", "--no-interactive",
        ]);
        assert_eq!(code, EXIT_OK);

        let store = ws.store();
        let main = store.user(uid(3)).unwrap().unwrap();
        assert_eq!(main.phone.as_deref(), Some("555-1234"));
        assert_eq!(main.email.as_deref(), Some("kim@example.org"));
        assert!(!store.user(uid(5)).unwrap().unwrap().is_active());
        let rows = store.rows("organization_memberships").unwrap();
        assert_eq!(rows[0].columns["user_id"], Value::from(3));
        assert_eq!(ws.audit_lines(), 1);
        assert_eq!(ws.run(&["audit", "verify"]), EXIT_OK);
    }

    #[test]
    fn unresolved_conflict_exits_2_and_changes_nothing() {
        let ws = Workspace::new();
        let code = ws.run(&["merge", "--main-id", "3", "--merge-id", "5", "--no-interactive"]);
        assert_eq!(code, EXIT_UNRESOLVED);
        assert!(ws.store().user(uid(5)).unwrap().unwrap().is_active());
        assert_eq!(ws.audit_lines(), 0);
    }

    #[test]
    fn dry_run_exits_0_and_changes_nothing() {
        let ws = Workspace::new();
        let before = fs::read_to_string(ws.dir.path().join("roster.json")).unwrap();
        let code = ws.run(&[
            "--format", "json", "merge", "--main-id", "3", "--merge-id", "5", "--dry-run",
        ]);
        assert_eq!(code, EXIT_OK);
        let after = fs::read_to_string(ws.dir.path().join("roster.json")).unwrap();
        assert_eq!(before, after);
        assert_eq!(ws.audit_lines(), 0);
    }

    #[test]
    fn validation_failures_exit_4() {
        let ws = Workspace::new();
        assert_eq!(ws.run(&["merge", "--merge-id", "5", "--no-interactive"]), EXIT_VALIDATION);
        assert_eq!(ws.run(&["merge", "--main-id", "3", "--no-interactive"]), EXIT_VALIDATION);
        assert_eq!(
            ws.run(&["merge", "--main-id", "3", "--merge-id", "3", "--no-interactive"]),
            EXIT_VALIDATION
        );
        assert_eq!(
            ws.run(&["merge", "--main-id", "3", "--merge-id", "99", "--no-interactive"]),
            EXIT_VALIDATION
        );
    }

    #[test]
    fn audit_verify_flags_corrupt_lines() {
        let ws = Workspace::new();
        let log = ws.dir.path().join("logs").join("merge_profile.log");
        fs::create_dir_all(log.parent().unwrap()).unwrap();
        fs::write(&log, "{\"event\":\"SOMETHING_ELSE\"}\n").unwrap();
        assert_eq!(ws.run(&["audit", "verify"]), EXIT_VALIDATION);
    }

    #[test]
    fn audit_list_on_missing_log_is_empty() {
        let ws = Workspace::new();
        assert_eq!(ws.run(&["audit", "list", "-n", "3"]), EXIT_OK);
    }

    #[test]
    fn missing_registry_table_is_declared_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        InMemoryRecordStore::new().save(&path).unwrap();
        let registry = RosterConfig::default().registry().unwrap();
        let store = open_store(&path, &registry).unwrap();
        assert!(store.has_table("organization_memberships"));
    }

    #[test]
    fn error_kinds_map_to_exit_codes() {
        use roster_merge::ValidationError;
        use roster_store::StoreError;

        assert_eq!(exit_code(&ValidationError::NoDuplicates.into()), EXIT_VALIDATION);
        assert_eq!(
            exit_code(&MergeError::ConflictUnresolved { fields: vec![MergeField::Phone] }),
            EXIT_UNRESOLVED
        );
        assert_eq!(exit_code(&MergeError::Aborted), EXIT_ABORTED);
        assert_eq!(
            exit_code(&StoreError::InjectedFault("disk".into()).into()),
            EXIT_STORAGE
        );
    }
}
