pub mod export;

use std::{fmt, time::Duration};

pub use export::{CsvExporter, ExportError, ExportFormat, Exporter, NoopExporter, exporter_for};
use time::OffsetDateTime;

use crate::scenario::TestCase;

/// Terminal view of a whole suite: every case lands in exactly one of
/// executed or dismissed, and failed indexes into executed.
#[derive(Clone, Debug)]
pub struct SuiteReport {
    pub identifier: String,
    pub network: String,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    executed: Vec<TestCase>,
    dismissed: Vec<TestCase>,
    failed: Vec<usize>,
}

impl SuiteReport {
    /// Consumes the terminal state of every case and partitions it.
    #[must_use]
    pub fn collect(
        identifier: impl Into<String>,
        network: impl Into<String>,
        cases: Vec<TestCase>,
        started_at: OffsetDateTime,
        finished_at: OffsetDateTime,
    ) -> Self {
        let (executed, dismissed): (Vec<_>, Vec<_>) =
            cases.into_iter().partition(|case| case.run.executed);
        let failed = executed
            .iter()
            .enumerate()
            .filter(|(_, case)| case.failed())
            .map(|(idx, _)| idx)
            .collect();

        Self {
            identifier: identifier.into(),
            network: network.into(),
            started_at,
            finished_at,
            executed,
            dismissed,
            failed,
        }
    }

    #[must_use]
    pub fn executed(&self) -> &[TestCase] {
        &self.executed
    }

    #[must_use]
    pub fn dismissed(&self) -> &[TestCase] {
        &self.dismissed
    }

    pub fn failed(&self) -> impl Iterator<Item = &TestCase> {
        self.failed.iter().filter_map(|idx| self.executed.get(*idx))
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.executed.len() + self.dismissed.len()
    }

    #[must_use]
    pub fn successful_count(&self) -> usize {
        self.executed.len() - self.failed.len()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    #[must_use]
    pub fn dismissed_count(&self) -> usize {
        self.dismissed.len()
    }

    /// Wall-clock time from suite start to suite end.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::try_from(self.finished_at - self.started_at).unwrap_or_default()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Regression run `{}` on {}: {} test case(s) in {:.1}s",
            self.identifier,
            self.network,
            self.total(),
            self.duration().as_secs_f64()
        )?;
        writeln!(f, "  Successful: {}", self.successful_count())?;
        writeln!(f, "  Failed:     {}", self.failed_count())?;
        writeln!(f, "  Dismissed:  {}", self.dismissed_count())?;

        if !self.executed.is_empty() {
            writeln!(f)?;
        }
        for case in &self.executed {
            let verdict = if case.passed() { "success" } else { "failed" };
            write!(f, "Testcase {} ({}): {verdict}", case.name, case.scenario)?;
            if let Some(error) = &case.run.error {
                write!(f, " ({error})")?;
            }
            writeln!(f)?;
        }

        if !self.dismissed.is_empty() {
            writeln!(f)?;
            writeln!(f, "Dismissed test cases:")?;
            for case in &self.dismissed {
                writeln!(
                    f,
                    "  {}: {}",
                    case.name,
                    case.run.dismissal.as_deref().unwrap_or("not executed")
                )?;
            }
        }
        Ok(())
    }
}
