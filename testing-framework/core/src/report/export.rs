use std::{
    fs,
    path::{Path, PathBuf},
};

use testing_framework_config::ExportConfig;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{info, warn};

use super::SuiteReport;
use crate::scenario::TestCase;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to create export directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Persists a finished suite report.
pub trait Exporter {
    /// Returns the written file, or `None` when nothing was written.
    fn export(&self, report: &SuiteReport) -> Result<Option<PathBuf>, ExportError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Unsupported(String),
}

impl ExportFormat {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "csv" => Self::Csv,
            _ => Self::Unsupported(raw.to_owned()),
        }
    }
}

/// Exporter for the configured format. Unsupported formats export nothing.
#[must_use]
pub fn exporter_for(config: &ExportConfig) -> Box<dyn Exporter> {
    match ExportFormat::parse(&config.format) {
        ExportFormat::Csv => Box::new(CsvExporter::new(&config.path)),
        ExportFormat::Unsupported(format) => {
            warn!(%format, "unsupported export format, report will not be written");
            Box::new(NoopExporter)
        }
    }
}

pub struct NoopExporter;

impl Exporter for NoopExporter {
    fn export(&self, _report: &SuiteReport) -> Result<Option<PathBuf>, ExportError> {
        Ok(None)
    }
}

/// Writes one CSV file per run: a row per test case followed by summary rows.
pub struct CsvExporter {
    dir: PathBuf,
}

const HEADER: [&str; 11] = [
    "name",
    "scenario",
    "status",
    "expected",
    "result",
    "started_at",
    "finished_at",
    "duration_secs",
    "transactions",
    "failed_transactions",
    "detail",
];

impl CsvExporter {
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn file_path(&self, report: &SuiteReport) -> PathBuf {
        self.dir.join(format!(
            "{}-{}.csv",
            report.identifier,
            report.started_at.unix_timestamp()
        ))
    }

    fn write(path: &Path, report: &SuiteReport) -> Result<(), csv::Error> {
        let mut writer = csv::WriterBuilder::new().flexible(true).from_path(path)?;
        writer.write_record(HEADER)?;

        for case in report.executed() {
            let status = if case.passed() { "success" } else { "failed" };
            writer.write_record(case_row(case, status))?;
        }
        for case in report.dismissed() {
            writer.write_record(case_row(case, "dismissed"))?;
        }

        writer.write_record([""])?;
        let summary = [
            ("identifier", report.identifier.clone()),
            ("network", report.network.clone()),
            ("started_at", timestamp(Some(report.started_at))),
            ("finished_at", timestamp(Some(report.finished_at))),
            (
                "duration_secs",
                format!("{:.3}", report.duration().as_secs_f64()),
            ),
            ("total", report.total().to_string()),
            ("successful", report.successful_count().to_string()),
            ("failed", report.failed_count().to_string()),
            ("dismissed", report.dismissed_count().to_string()),
        ];
        for (key, value) in &summary {
            writer.write_record([*key, value.as_str()])?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl Exporter for CsvExporter {
    fn export(&self, report: &SuiteReport) -> Result<Option<PathBuf>, ExportError> {
        fs::create_dir_all(&self.dir).map_err(|source| ExportError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.file_path(report);
        Self::write(&path, report).map_err(|source| ExportError::Write {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), "report exported");
        Ok(Some(path))
    }
}

fn case_row(case: &TestCase, status: &str) -> Vec<String> {
    let run = &case.run;
    let failed_transactions = run.transactions.iter().filter(|tx| !tx.success).count();
    let detail = run
        .error
        .clone()
        .or_else(|| run.dismissal.clone())
        .or_else(|| {
            run.checks
                .iter()
                .find(|check| !check.held)
                .map(|check| format!("{}: {}", check.label, check.detail))
        })
        .unwrap_or_default();

    vec![
        case.name.clone(),
        case.scenario.clone(),
        status.to_owned(),
        case.expected.to_string(),
        if run.executed {
            run.result.to_string()
        } else {
            String::new()
        },
        timestamp(run.started_at),
        timestamp(run.finished_at),
        case.duration()
            .map(|duration| format!("{:.3}", duration.as_secs_f64()))
            .unwrap_or_default(),
        run.transactions.len().to_string(),
        failed_transactions.to_string(),
        detail,
    ]
}

fn timestamp(at: Option<OffsetDateTime>) -> String {
    at.and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_default()
}
