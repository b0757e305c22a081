use std::fmt;

use serde::Serialize;
use tracing::debug;

/// Lifecycle of one merge invocation.
///
/// The forward path is `Validating -> DetectingConflicts -> Resolving ->
/// {DryRunDone | Applying -> Committed -> Logged}`. `Aborted` is reachable
/// before `Applying`, and `Failed` from any non-terminal state. There is no
/// retry edge: a failed or aborted merge is re-invoked from scratch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergePhase {
    Validating,
    DetectingConflicts,
    Resolving,
    DryRunDone,
    Applying,
    Committed,
    Logged,
    Aborted,
    Failed,
}

impl MergePhase {
    /// `Committed` is terminal when the audit write fails.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::DryRunDone | Self::Committed | Self::Logged | Self::Aborted | Self::Failed
        )
    }

    pub fn can_advance_to(self, next: MergePhase) -> bool {
        use MergePhase::*;
        matches!(
            (self, next),
            (Validating, DetectingConflicts)
                | (DetectingConflicts, Resolving)
                | (Resolving, DryRunDone)
                | (Resolving, Applying)
                | (Resolving, Aborted)
                | (Applying, Committed)
                | (Committed, Logged)
                | (Validating | DetectingConflicts | Resolving | Applying, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "VALIDATING",
            Self::DetectingConflicts => "DETECTING_CONFLICTS",
            Self::Resolving => "RESOLVING",
            Self::DryRunDone => "DRY_RUN_DONE",
            Self::Applying => "APPLYING",
            Self::Committed => "COMMITTED",
            Self::Logged => "LOGGED",
            Self::Aborted => "ABORTED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for MergePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records the phases a merge passes through.
#[derive(Clone, Debug)]
pub struct PhaseTracker {
    history: Vec<MergePhase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        debug!(phase = %MergePhase::Validating, "merge phase");
        Self {
            history: vec![MergePhase::Validating],
        }
    }

    pub fn current(&self) -> MergePhase {
        self.history[self.history.len() - 1]
    }

    pub fn history(&self) -> &[MergePhase] {
        &self.history
    }

    /// Move to `next`. Illegal transitions are a bug in the engine.
    pub fn advance(&mut self, next: MergePhase) {
        let current = self.current();
        debug_assert!(
            current.can_advance_to(next),
            "illegal merge phase transition {current} -> {next}"
        );
        debug!(from = %current, to = %next, "merge phase");
        self.history.push(next);
    }

    /// Mark the merge failed unless it already reached a terminal phase.
    pub fn fail(&mut self) {
        if !self.current().is_terminal() {
            self.advance(MergePhase::Failed);
        }
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
