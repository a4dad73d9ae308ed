//! Per-item outcomes of multi-call operations.
//!
//! Items are recorded in the order they were processed; one failure never stops the rest.

use tracing::{info, warn};

use crate::console::prompt::Prompter;

/// Status of a single batch item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Success,
    Failed,
}

/// Result for a single item in a batch operation
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    /// Position in the batch (0-based)
    pub index: usize,
    /// What the item acted on, e.g. "jane@contoso.com: ENTERPRISEPACK"
    pub name: String,
    pub status: ItemStatus,
    /// Error message if failed
    pub error: Option<String>,
}

/// Summary of a completed batch operation
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub operation: String,
    pub success_count: usize,
    pub failure_count: usize,
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            success_count: 0,
            failure_count: 0,
            items: Vec::new(),
        }
    }

    pub fn add_success(&mut self, name: impl Into<String>) {
        self.success_count += 1;
        self.items.push(BatchItem {
            index: self.items.len(),
            name: name.into(),
            status: ItemStatus::Success,
            error: None,
        });
    }

    pub fn add_failure(&mut self, name: impl Into<String>, error: impl Into<String>) {
        self.failure_count += 1;
        self.items.push(BatchItem {
            index: self.items.len(),
            name: name.into(),
            status: ItemStatus::Failed,
            error: Some(error.into()),
        });
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Ordered per-item statuses.
    #[cfg(test)]
    pub fn outcomes(&self) -> Vec<ItemStatus> {
        self.items.iter().map(|i| i.status).collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failure_count == 0
    }

    /// Print one line per item followed by the totals.
    pub fn print<P: Prompter + ?Sized>(&self, prompter: &mut P) {
        prompter.say(&format!("{}:", self.operation));
        for item in &self.items {
            match (&item.status, &item.error) {
                (ItemStatus::Failed, Some(error)) => {
                    prompter.say(&format!("  [FAILED] {} ({})", item.name, error))
                }
                (ItemStatus::Failed, None) => prompter.say(&format!("  [FAILED] {}", item.name)),
                (ItemStatus::Success, _) => prompter.say(&format!("  [OK] {}", item.name)),
            }
        }
        prompter.say(&format!(
            "{} succeeded, {} failed",
            self.success_count, self.failure_count
        ));
        if self.all_succeeded() {
            info!("{}: all {} item(s) succeeded", self.operation, self.total());
        } else {
            warn!(
                "{}: {} of {} item(s) failed",
                self.operation,
                self.failure_count,
                self.total()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedPrompter;

    #[test]
    fn test_report_keeps_order_and_counts() {
        let mut report = BatchReport::new("Remove methods");
        report.add_success("Phone");
        report.add_failure("Email", "Forbidden");
        report.add_success("FIDO2");

        assert_eq!(
            report.outcomes(),
            vec![ItemStatus::Success, ItemStatus::Failed, ItemStatus::Success]
        );
        assert_eq!(report.total(), 3);
        assert_eq!(report.success_count, 2);
        assert_eq!(report.failure_count, 1);
        assert_eq!(report.items[2].index, 2);
        assert!(!report.all_succeeded());
    }

    #[test]
    fn test_print() {
        let mut report = BatchReport::new("Add license");
        report.add_success("a@contoso.com");
        report.add_failure("b@contoso.com", "No seats");

        let mut prompter = ScriptedPrompter::new(Vec::<&str>::new());
        report.print(&mut prompter);

        assert_eq!(
            prompter.output(),
            &[
                "Add license:",
                "  [OK] a@contoso.com",
                "  [FAILED] b@contoso.com (No seats)",
                "1 succeeded, 1 failed"
            ]
        );
    }
}
