pub mod convert;
pub mod fetch;
pub mod run;
pub mod status;

use serde::Serialize;

use crate::harvest::extract::ActivityType;

/// Process exit status for a report that finished with issues.
pub const EXIT_ISSUES: i32 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    /// Detail line scoped to one record type, e.g. `Create: archived=3`.
    pub fn detail_for(&mut self, record_type: ActivityType, text: impl AsRef<str>) {
        self.detail(format!("{record_type}: {}", text.as_ref()));
    }

    pub fn issue_for(&mut self, record_type: ActivityType, text: impl AsRef<str>) {
        self.issue(format!("{record_type}: {}", text.as_ref()));
    }

    pub fn exit_code(&self) -> i32 {
        if self.ok { 0 } else { EXIT_ISSUES }
    }

    pub fn merge(&mut self, mut other: CommandReport) {
        self.ok &= other.ok;
        self.details.append(&mut other.details);
        self.issues.append(&mut other.issues);
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandReport, EXIT_ISSUES};
    use crate::harvest::extract::ActivityType;

    #[test]
    fn merge_carries_failure_forward() {
        let mut run = CommandReport::new("run");
        run.detail("fetch.success=2");

        let mut convert = CommandReport::new("convert");
        convert.issue_for(ActivityType::Create, "join failed");
        run.merge(convert);

        assert!(!run.ok);
        assert_eq!(run.command, "run");
        assert_eq!(run.details, vec!["fetch.success=2"]);
        assert_eq!(run.issues, vec!["Create: join failed"]);
        assert_eq!(run.exit_code(), EXIT_ISSUES);
    }

    #[test]
    fn record_type_lines_are_prefixed() {
        let mut report = CommandReport::new("convert");
        report.detail_for(ActivityType::Update, "archived=3");
        assert!(report.ok);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.details, vec!["Update: archived=3"]);

        report.issue_for(ActivityType::Remove, "archive failed for x.mrc");
        assert!(!report.ok);
        assert_eq!(report.issues, vec!["Remove: archive failed for x.mrc"]);
    }
}
