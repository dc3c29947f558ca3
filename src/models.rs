use serde::{Deserialize, Serialize};

/// Column names of a spending source file, in canonical order.
pub const SOURCE_COLUMNS: [&str; 7] = [
    "person_name",
    "spending_date",
    "category",
    "amount",
    "location",
    "description",
    "payment_method",
];

/// One source record exactly as read from the file. Nothing is parsed yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawSpendingRow {
    pub person_name: Option<String>,
    pub spending_date: Option<String>,
    pub category: Option<String>,
    pub amount: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub payment_method: Option<String>,
}

impl RawSpendingRow {
    pub fn field(&self, column: &str) -> Option<&str> {
        let value = match column {
            "person_name" => &self.person_name,
            "spending_date" => &self.spending_date,
            "category" => &self.category,
            "amount" => &self.amount,
            "location" => &self.location,
            "description" => &self.description,
            "payment_method" => &self.payment_method,
            _ => return None,
        };
        value.as_deref()
    }

    pub fn set_field(&mut self, column: &str, value: Option<String>) {
        let slot = match column {
            "person_name" => &mut self.person_name,
            "spending_date" => &mut self.spending_date,
            "category" => &mut self.category,
            "amount" => &mut self.amount,
            "location" => &mut self.location,
            "description" => &mut self.description,
            "payment_method" => &mut self.payment_method,
            _ => return,
        };
        *slot = value;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        }
    }
}

/// Outcome of one validation check, as written to `log_validation_results`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub check_name: String,
    pub check_type: Severity,
    pub passed: bool,
    pub records_checked: i64,
    pub records_failed: i64,
    pub message: Option<String>,
    pub sample_ids: Vec<i64>,
}

impl CheckResult {
    /// INFO checks always pass; `records_failed` still carries what they counted.
    pub fn new(check_name: &str, check_type: Severity, records_checked: i64, records_failed: i64) -> Self {
        Self {
            check_name: check_name.to_string(),
            check_type,
            passed: records_failed == 0 || check_type == Severity::Info,
            records_checked,
            records_failed,
            message: None,
            sample_ids: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_samples(mut self, ids: Vec<i64>) -> Self {
        self.sample_ids = ids;
        self
    }

    pub fn failure_pct(&self) -> f64 {
        if self.records_checked == 0 {
            0.0
        } else {
            (self.records_failed as f64 / self.records_checked as f64 * 10000.0).round() / 100.0
        }
    }

    pub fn status(&self) -> &'static str {
        if self.passed {
            "PASSED"
        } else {
            "FAILED"
        }
    }
}

/// All checks of one validation run of a stage.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationRun {
    pub stage: String,
    pub run_id: String,
    pub checks: Vec<CheckResult>,
}

impl ValidationRun {
    pub fn new(stage: &str, run_id: String) -> Self {
        Self {
            stage: stage.to_string(),
            run_id,
            checks: Vec::new(),
        }
    }

    fn failed_of(&self, severity: Severity) -> usize {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.check_type == severity)
            .count()
    }

    pub fn errors(&self) -> usize {
        self.failed_of(Severity::Error)
    }

    pub fn warnings(&self) -> usize {
        self.failed_of(Severity::Warning)
    }

    pub fn failed(&self) -> Vec<&CheckResult> {
        let mut failed: Vec<&CheckResult> = self.checks.iter().filter(|c| !c.passed).collect();
        failed.sort_by(|a, b| {
            (a.check_type != Severity::Error)
                .cmp(&(b.check_type != Severity::Error))
                .then(b.failure_pct().total_cmp(&a.failure_pct()))
        });
        failed
    }

    /// `ValidationFailed` when any ERROR-severity check failed.
    pub fn ensure_passed(&self) -> crate::error::Result<()> {
        match self.errors() {
            0 => Ok(()),
            failures => Err(crate::error::EtlError::ValidationFailed {
                stage: self.stage.clone(),
                failures,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_accessors() {
        let mut row = RawSpendingRow::default();
        row.set_field("amount", Some("12.50".into()));
        assert_eq!(row.field("amount"), Some("12.50"));
        assert_eq!(row.field("location"), None);
        assert_eq!(row.field("nonsense"), None);
    }

    #[test]
    fn test_failure_pct() {
        let c = CheckResult::new("x", Severity::Warning, 3, 1);
        assert_eq!(c.failure_pct(), 33.33);
        assert!(!c.passed);
        let empty = CheckResult::new("y", Severity::Error, 0, 0);
        assert_eq!(empty.failure_pct(), 0.0);
        assert_eq!(empty.status(), "PASSED");
        let info = CheckResult::new("z", Severity::Info, 4, 2);
        assert!(info.passed);
        assert_eq!(info.failure_pct(), 50.0);
    }

    #[test]
    fn test_validation_run_ordering_and_gate() {
        let mut run = ValidationRun::new("SRC", "VAL_1".into());
        run.checks.push(CheckResult::new("w", Severity::Warning, 10, 5));
        run.checks.push(CheckResult::new("e", Severity::Error, 10, 1));
        run.checks.push(CheckResult::new("ok", Severity::Error, 10, 0));
        assert_eq!(run.errors(), 1);
        assert_eq!(run.warnings(), 1);
        assert_eq!(run.failed()[0].check_name, "e");
        assert!(run.ensure_passed().is_err());
        run.checks.remove(1);
        assert!(run.ensure_passed().is_ok());
    }
}
