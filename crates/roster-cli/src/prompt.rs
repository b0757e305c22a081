use colored::Colorize;
use dialoguer::{Confirm, Select};
use roster_merge::{Choice, Conflict, ConflictPrompter, MergePreview};

use crate::commands::print_preview;

const CHOICES: [&str; 3] = ["1 = keep main", "2 = keep merge", "s = skip"];

/// Asks the operator on the terminal. Escape or a closed terminal cancels.
pub struct TerminalPrompter;

impl ConflictPrompter for TerminalPrompter {
    fn choose(&mut self, conflict: &Conflict) -> Choice {
        println!(
            "\n{} {}",
            "Conflict on".yellow().bold(),
            conflict.field.label().bold()
        );
        println!("  main  #{}: {}", conflict.primary_id, conflict.primary.green());
        println!("  merge #{}: {}", conflict.duplicate_id, conflict.duplicate.cyan());

        let picked = Select::new()
            .with_prompt("Keep which value?")
            .items(&CHOICES)
            .default(0)
            .interact_opt();
        match picked {
            Ok(Some(0)) => Choice::KeepPrimary,
            Ok(Some(1)) => Choice::KeepDuplicate,
            Ok(Some(_)) => Choice::Skip,
            Ok(None) => Choice::Cancel,
            Err(e) => {
                tracing::warn!(error = %e, "prompt failed, cancelling merge");
                Choice::Cancel
            }
        }
    }

    fn confirm(&mut self, preview: &MergePreview) -> bool {
        print_preview(preview);
        match Confirm::new()
            .with_prompt("Proceed with merge?")
            .default(false)
            .interact_opt()
        {
            Ok(answer) => answer.unwrap_or(false),
            Err(e) => {
                tracing::warn!(error = %e, "confirmation prompt failed");
                false
            }
        }
    }
}
