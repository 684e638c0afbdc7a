//! Results of running units of work through the pipeline

use crate::identity::WorkIdentity;
use crate::work::WorkResult;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use workcell_cache::OriginMetadata;
use workcell_core::{Error, Result};

/// How a successful pipeline run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Nothing changed since the recorded execution
    UpToDate { origin: OriginMetadata },
    /// Every skip-when-empty input was empty and there were no outputs to clean up
    SkippedNoSource,
    /// Outputs were restored from the build cache
    RestoredFromCache { origin: OriginMetadata },
    Executed {
        work_result: WorkResult,
        /// Whether the work saw incremental input changes
        incremental: bool,
    },
}

impl ExecutionOutcome {
    /// Whether the outputs of the work were produced by this run
    pub fn produced_outputs(&self) -> bool {
        matches!(
            self,
            ExecutionOutcome::Executed { .. } | ExecutionOutcome::RestoredFromCache { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    Skipped,
    UpToDate,
    RestoredFromCache,
    Executed,
    Failed,
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutionStatus::Skipped => "NO-SOURCE",
            ExecutionStatus::UpToDate => "UP-TO-DATE",
            ExecutionStatus::RestoredFromCache => "FROM-CACHE",
            ExecutionStatus::Executed => "EXECUTED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        };
        f.write_str(label)
    }
}

/// Report of one unit of work in a build
#[derive(Debug)]
pub struct ExecutionReport {
    pub display_name: String,
    /// Absent when the identity itself could not be computed
    pub identity: Option<WorkIdentity>,
    pub result: Result<ExecutionOutcome>,
    pub duration: Duration,
    pub workspace: Option<PathBuf>,
}

impl ExecutionReport {
    pub fn status(&self) -> ExecutionStatus {
        match &self.result {
            Ok(ExecutionOutcome::SkippedNoSource) => ExecutionStatus::Skipped,
            Ok(ExecutionOutcome::UpToDate { .. }) => ExecutionStatus::UpToDate,
            Ok(ExecutionOutcome::RestoredFromCache { .. }) => ExecutionStatus::RestoredFromCache,
            Ok(ExecutionOutcome::Executed { .. }) => ExecutionStatus::Executed,
            Err(e) if e.is_cancellation() => ExecutionStatus::Cancelled,
            Err(_) => ExecutionStatus::Failed,
        }
    }

    pub fn outcome(&self) -> Option<&ExecutionOutcome> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }
}

/// Reports of every unit of work in one `execute_all` call, in submission order
#[derive(Debug, Default)]
pub struct BuildSummary {
    pub reports: Vec<ExecutionReport>,
}

impl BuildSummary {
    pub fn failures(&self) -> impl Iterator<Item = &ExecutionReport> {
        self.reports.iter().filter(|report| report.result.is_err())
    }

    pub fn count(&self, status: ExecutionStatus) -> usize {
        self.reports
            .iter()
            .filter(|report| report.status() == status)
            .count()
    }

    /// Fail with the first error, if any unit of work failed
    pub fn into_result(self) -> Result<Vec<ExecutionReport>> {
        let mut reports = self.reports;
        if let Some(index) = reports.iter().position(|report| report.result.is_err()) {
            if let Err(e) = reports.swap_remove(index).result {
                return Err(e);
            }
        }
        Ok(reports)
    }
}
