use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use roster_audit::{AuditSink, MergeEvent};
use roster_store::{RecordStore, Transaction};
use roster_types::{MergeField, ReferenceRegistry, ResolutionTag, UserId, UserRecord};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::MergeConfig;
use crate::detector::{self, Conflict};
use crate::error::{MergeError, MergeResult, ValidationError};
use crate::phase::{MergePhase, PhaseTracker};
use crate::relinker::{self, RelinkPlan};
use crate::report::{DuplicateSummary, FieldChange, MergePreview, MergeReport, MergeSuccess};
use crate::resolver::{self, ConflictPrompter, Resolution, ResolutionMode, Side};
use crate::validator::{self, MergeCandidates};

// ---------------------------------------------------------------------------
// MergeRequest
// ---------------------------------------------------------------------------

/// One merge invocation as supplied by the operator.
///
/// Ids are raw integers so that malformed input is reported as a validation
/// failure rather than rejected at the call site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeRequest {
    pub primary_id: i64,
    pub duplicate_ids: Vec<i64>,
    pub mode: Option<ResolutionMode>,
    pub dry_run: bool,
    pub non_interactive: bool,
}

impl MergeRequest {
    pub fn new(primary_id: i64, duplicate_ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            primary_id,
            duplicate_ids: duplicate_ids.into_iter().collect(),
            mode: None,
            dry_run: false,
            non_interactive: false,
        }
    }

    pub fn with_mode(mut self, mode: ResolutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_non_interactive(mut self, non_interactive: bool) -> Self {
        self.non_interactive = non_interactive;
        self
    }
}

// ---------------------------------------------------------------------------
// Conflict decisions
// ---------------------------------------------------------------------------

enum Decision {
    Resolved(Resolution),
    Pending,
}

/// How conflicts are decided for one invocation.
enum Decider<'p> {
    Automatic(fn(&Conflict) -> Resolution),
    Prompt(&'p mut dyn ConflictPrompter),
    Defer,
}

impl Decider<'_> {
    fn decide(&mut self, conflict: &Conflict) -> MergeResult<Decision> {
        match self {
            Self::Automatic(strategy) => Ok(Decision::Resolved(strategy(conflict))),
            Self::Prompt(prompter) => {
                resolver::resolve_interactively(&mut **prompter, conflict).map(Decision::Resolved)
            }
            Self::Defer => Ok(Decision::Pending),
        }
    }
}

/// The primary as it will look after the merge, and how it got there.
struct Folded {
    merged: UserRecord,
    field_resolutions: BTreeMap<MergeField, ResolutionTag>,
    pending: Vec<Conflict>,
    duplicates: Vec<DuplicateSummary>,
}

/// Fold every duplicate, in caller order, into the evolving primary.
fn fold(candidates: &MergeCandidates, decider: &mut Decider<'_>) -> MergeResult<Folded> {
    let mut merged = candidates.primary.clone();
    let mut field_resolutions = BTreeMap::new();
    let mut pending = Vec::new();
    let mut duplicates = Vec::with_capacity(candidates.duplicates.len());

    for duplicate in &candidates.duplicates {
        let comparison = detector::compare(&merged, duplicate);
        for fill in &comparison.fills {
            debug!(field = %fill.field, from = %duplicate.id, "field filled");
            merged.set_field(fill.field, Some(fill.value.clone()));
        }
        for conflict in &comparison.conflicts {
            match decider.decide(conflict)? {
                Decision::Resolved(resolution) => {
                    debug!(
                        field = %resolution.field,
                        duplicate = %duplicate.id,
                        tag = %resolution.tag,
                        "conflict resolved"
                    );
                    if resolution.side == Side::Duplicate {
                        merged.set_field(resolution.field, Some(resolution.value));
                    }
                    field_resolutions.insert(resolution.field, resolution.tag);
                }
                Decision::Pending => pending.push(conflict.clone()),
            }
        }
        duplicates.push(DuplicateSummary {
            id: duplicate.id,
            name: duplicate.display_name(),
            conflicts: comparison.conflicting_fields(),
        });
    }

    Ok(Folded {
        merged,
        field_resolutions,
        pending,
        duplicates,
    })
}

fn field_changes(
    before: &UserRecord,
    after: &UserRecord,
    resolutions: &BTreeMap<MergeField, ResolutionTag>,
) -> Vec<FieldChange> {
    MergeField::ALL
        .into_iter()
        .filter(|field| before.field(*field) != after.field(*field))
        .map(|field| FieldChange {
            field,
            before: before.field(field).map(str::to_string),
            after: after.field(field).map(str::to_string),
            resolution: resolutions.get(&field).copied(),
        })
        .collect()
}

/// Conflicting fields, once each, in [`MergeField::ALL`] order.
fn unique_fields(conflicts: &[Conflict]) -> Vec<MergeField> {
    let mut fields: Vec<MergeField> = conflicts.iter().map(|c| c.field).collect();
    fields.sort();
    fields.dedup();
    fields
}

// ---------------------------------------------------------------------------
// MergeEngine
// ---------------------------------------------------------------------------

/// Consolidates duplicate user records into a primary record.
///
/// A merge runs in two parts. The preview part validates the request,
/// detects conflicts, and resolves them (prompting if interactive) against
/// unlocked reads. The apply part locks every involved record, re-checks
/// that nothing changed since the preview, and writes the merged primary,
/// the relinked references, and the soft-deleted duplicates in a single
/// transaction. The audit event is written after commit; a failure there is
/// reported as a warning and never undoes the merge.
pub struct MergeEngine {
    store: Arc<dyn RecordStore>,
    registry: ReferenceRegistry,
    audit: Arc<dyn AuditSink>,
    config: MergeConfig,
}

impl MergeEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: ReferenceRegistry,
        audit: Arc<dyn AuditSink>,
        config: MergeConfig,
    ) -> Self {
        Self {
            store,
            registry,
            audit,
            config,
        }
    }

    pub fn registry(&self) -> &ReferenceRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Run a merge with no operator available.
    ///
    /// Equivalent to [`Self::merge_interactive`] with prompting disabled:
    /// conflicts need an automatic mode, and nothing asks for confirmation.
    pub fn merge(&self, request: &MergeRequest) -> MergeResult<MergeReport> {
        self.run(request, None)
    }

    /// Run a merge, consulting `prompter` for conflicts and confirmation
    /// unless the request is non-interactive.
    pub fn merge_interactive(
        &self,
        request: &MergeRequest,
        prompter: &mut dyn ConflictPrompter,
    ) -> MergeResult<MergeReport> {
        self.run(request, Some(prompter))
    }

    fn run(
        &self,
        request: &MergeRequest,
        prompter: Option<&mut dyn ConflictPrompter>,
    ) -> MergeResult<MergeReport> {
        let op = Uuid::now_v7();
        let span = info_span!("merge", %op, primary = request.primary_id);
        let _entered = span.enter();

        let mut phases = PhaseTracker::new();
        let result = self.run_phases(request, prompter, &mut phases);
        match &result {
            Ok(_) => {}
            Err(MergeError::Aborted) => {
                phases.advance(MergePhase::Aborted);
                info!("merge aborted by operator");
            }
            Err(e) => {
                phases.fail();
                warn!(error = %e, phase = %phases.current(), "merge failed");
            }
        }
        result
    }

    fn run_phases(
        &self,
        request: &MergeRequest,
        mut prompter: Option<&mut dyn ConflictPrompter>,
        phases: &mut PhaseTracker,
    ) -> MergeResult<MergeReport> {
        let ids = validator::check_ids(request.primary_id, &request.duplicate_ids)?;
        let interactive = !request.non_interactive && prompter.is_some();
        if request.mode == Some(ResolutionMode::Interactive)
            && (request.non_interactive || (!request.dry_run && !interactive))
        {
            return Err(ValidationError::InteractiveDisabled.into());
        }
        let candidates = validator::load_candidates(self.store.as_ref(), &ids)?;

        phases.advance(MergePhase::DetectingConflicts);
        let strategy = request.mode.and_then(ResolutionMode::strategy);
        let detected = fold(&candidates, &mut Decider::Defer)?;
        if !request.dry_run && strategy.is_none() && !interactive && !detected.pending.is_empty() {
            return Err(MergeError::ConflictUnresolved {
                fields: unique_fields(&detected.pending),
            });
        }

        phases.advance(MergePhase::Resolving);
        let mut decider = match (strategy, prompter.as_deref_mut()) {
            (Some(strategy), _) => Decider::Automatic(strategy),
            (None, Some(prompter)) if interactive && !request.dry_run => Decider::Prompt(prompter),
            _ => Decider::Defer,
        };
        let folded = fold(&candidates, &mut decider)?;
        drop(decider);
        if !request.dry_run && !folded.pending.is_empty() {
            return Err(MergeError::ConflictUnresolved {
                fields: unique_fields(&folded.pending),
            });
        }

        let relinks = {
            let tx = self.store.begin()?;
            let plans = relinker::plan(tx.as_ref(), &self.registry, ids.primary, &ids.duplicates);
            tx.rollback();
            plans?
        };
        let preview = MergePreview {
            primary_id: ids.primary,
            primary_name: candidates.primary.display_name(),
            duplicates: folded.duplicates,
            field_changes: field_changes(
                &candidates.primary,
                &folded.merged,
                &folded.field_resolutions,
            ),
            field_resolutions: folded.field_resolutions.clone(),
            pending: folded.pending,
            relinks,
            soft_deletes: ids.duplicates.clone(),
        };

        if request.dry_run {
            phases.advance(MergePhase::DryRunDone);
            info!(
                changes = preview.field_changes.len(),
                pending = preview.pending.len(),
                "dry run complete"
            );
            return Ok(MergeReport::Preview(preview));
        }

        if let Some(prompter) = prompter.filter(|_| interactive) {
            if !prompter.confirm(&preview) {
                return Err(MergeError::Aborted);
            }
        }

        phases.advance(MergePhase::Applying);
        let relinks = self.apply(&candidates, &folded.merged)?;
        phases.advance(MergePhase::Committed);
        info!(
            merged = ids.duplicates.len(),
            resolutions = folded.field_resolutions.len(),
            "merge committed"
        );

        let mut warnings = Vec::new();
        let event = MergeEvent::new(
            ids.primary,
            ids.duplicates.clone(),
            folded.field_resolutions.clone(),
        );
        match self.audit.record(&event) {
            Ok(()) => phases.advance(MergePhase::Logged),
            Err(e) => {
                warn!(error = %e, "merge committed but audit event was not written");
                warnings.push(format!("audit log write failed: {e}"));
            }
        }

        Ok(MergeReport::Committed(MergeSuccess {
            primary_id: ids.primary,
            merged_ids: ids.duplicates,
            field_resolutions: folded.field_resolutions,
            field_changes: preview.field_changes,
            relinks,
            phase: phases.current(),
            warnings,
        }))
    }

    /// Lock, re-check, write, and commit. Any error rolls everything back.
    fn apply(
        &self,
        candidates: &MergeCandidates,
        merged: &UserRecord,
    ) -> MergeResult<Vec<RelinkPlan>> {
        let mut ids = vec![candidates.primary.id];
        ids.extend(candidates.duplicates.iter().map(|d| d.id));
        let _locks = self.store.lock_users(&ids, self.config.lock_timeout)?;
        debug!(locked = ids.len(), "row locks acquired");

        let mut tx = self.store.begin()?;
        match self.stage(tx.as_mut(), candidates, merged) {
            Ok(relinks) => {
                tx.commit()?;
                Ok(relinks)
            }
            Err(e) => {
                tx.rollback();
                warn!(error = %e, "merge rolled back");
                Err(e)
            }
        }
    }

    fn stage(
        &self,
        tx: &mut dyn Transaction,
        candidates: &MergeCandidates,
        merged: &UserRecord,
    ) -> MergeResult<Vec<RelinkPlan>> {
        for expected in std::iter::once(&candidates.primary).chain(&candidates.duplicates) {
            match tx.user(expected.id)? {
                Some(current) if current == *expected => {}
                _ => return Err(ValidationError::Stale(expected.id).into()),
            }
        }

        let primary = candidates.primary.id;
        let duplicates: Vec<UserId> = candidates.duplicates.iter().map(|d| d.id).collect();

        tx.update_user(merged.clone())?;
        let relinks = relinker::relink(tx, &self.registry, primary, &duplicates)?;

        let deleted_at = Utc::now();
        for duplicate in &candidates.duplicates {
            let mut record = duplicate.clone();
            record.soft_delete(deleted_at);
            tx.update_user(record)?;
        }
        Ok(relinks)
    }
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
