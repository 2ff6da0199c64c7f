use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use rung_core::{ErrorInfo, PtError};
use serde::{Deserialize, Serialize};

use crate::chain::{ChainDiagnostics, ChainState};

/// Path of the row file of chain `index`.
pub fn rows_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("chain_{index}.csv"))
}

/// Path of the statistics record of chain `index`.
pub fn stats_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("stats_{index}.json"))
}

/// Path of the debug diagnostics record of chain `index`.
pub fn diagnostics_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("diagnostics_{index}.json"))
}

/// Counters of one proposal kind in the statistics record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRecord {
    /// Proposals of this kind.
    pub n_proposed: u64,
    /// Accepted fraction of those proposals.
    pub acceptance_rate: f64,
}

/// Per-chain statistics record, overwritten on every save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStats {
    /// Counters keyed by proposal kind name.
    pub proposals: IndexMap<String, ProposalRecord>,
    /// Lifetime accepted swaps.
    pub n_swap_accepted: u64,
    /// Lifetime proposed swaps.
    pub n_swap_proposed: u64,
}

impl ChainStats {
    /// Snapshot of a chain's counters.
    pub fn from_chain(chain: &ChainState) -> Self {
        let proposals = chain
            .proposal_stats()
            .into_iter()
            .map(|(kind, stat)| {
                (
                    kind.as_str().to_string(),
                    ProposalRecord {
                        n_proposed: stat.n_proposed,
                        acceptance_rate: stat.acceptance_rate(),
                    },
                )
            })
            .collect();
        Self {
            proposals,
            n_swap_accepted: chain.swap_accepted(),
            n_swap_proposed: chain.swap_proposed(),
        }
    }

    /// Restores the record from disk.
    pub fn load(path: &Path) -> Result<Self, PtError> {
        read_json(path, "stats")
    }

    /// Writes the record to disk.
    pub fn store(&self, path: &Path) -> Result<(), PtError> {
        write_json(self, path, "stats")
    }
}

/// One stored row; the log-likelihood is absent in point-only files.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    /// Stored point.
    pub point: Vec<f64>,
    /// Stored log-likelihood, if the file carried one.
    pub log_likelihood: Option<f64>,
}

/// Persists a chain: appends rows not yet written, then rewrites the records.
///
/// The first save of a chain truncates the row file and writes the whole
/// history, so a resumed chain produces a self-contained file.
pub fn save(chain: &mut ChainState, dir: &Path) -> Result<(), PtError> {
    fs::create_dir_all(dir).map_err(|err| {
        PtError::Io(
            ErrorInfo::new("checkpoint-mkdir", err.to_string()).with_context("path", dir.display()),
        )
    })?;

    let path = rows_path(dir, chain.index());
    let first = chain.rows_persisted();
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(first > 0)
        .truncate(first == 0)
        .open(&path)
        .map_err(|err| io_error("checkpoint-open", err, &path))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    for row in &chain.history()[first..] {
        let record: Vec<String> = row
            .point
            .iter()
            .chain(std::iter::once(&row.log_likelihood))
            .map(|value| value.to_string())
            .collect();
        writer
            .write_record(&record)
            .map_err(|err| csv_error("checkpoint-write", err, &path))?;
    }
    writer
        .flush()
        .map_err(|err| io_error("checkpoint-flush", err, &path))?;
    let written = chain.history().len();
    chain.mark_persisted(written);

    ChainStats::from_chain(chain).store(&stats_path(dir, chain.index()))?;
    if let Some(diagnostics) = chain.diagnostics() {
        write_json(diagnostics, &diagnostics_path(dir, chain.index()), "diagnostics")?;
    }
    Ok(())
}

/// Reads stored rows, accepting `dim` (point only) or `dim + 1` columns.
pub fn load_rows(path: &Path, dim: usize) -> Result<Vec<StoredRow>, PtError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|err| csv_error("checkpoint-read", err, path))?;
    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|err| csv_error("checkpoint-read", err, path))?;
        let values = record
            .iter()
            .map(|field| field.parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|err| {
                PtError::InvalidConfig(
                    ErrorInfo::new("checkpoint-parse", err.to_string())
                        .with_context("path", path.display())
                        .with_context("line", line + 1),
                )
            })?;
        let row = if values.len() == dim {
            StoredRow {
                point: values,
                log_likelihood: None,
            }
        } else if values.len() == dim + 1 {
            let mut point = values;
            let log_likelihood = point.pop();
            StoredRow {
                point,
                log_likelihood,
            }
        } else {
            return Err(PtError::InvalidConfig(
                ErrorInfo::new("checkpoint-columns", "row width matches neither dim nor dim + 1")
                    .with_context("path", path.display())
                    .with_context("line", line + 1)
                    .with_context("columns", values.len())
                    .with_context("dim", dim),
            ));
        };
        rows.push(row);
    }
    Ok(rows)
}

/// Loads a debug diagnostics record.
pub fn load_diagnostics(path: &Path) -> Result<ChainDiagnostics, PtError> {
    read_json(path, "diagnostics")
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path, what: &str) -> Result<T, PtError> {
    let contents = fs::read_to_string(path)
        .map_err(|err| io_error(&format!("{what}-read"), err, path))?;
    serde_json::from_str(&contents).map_err(|err| {
        PtError::Serde(
            ErrorInfo::new(format!("{what}-parse"), err.to_string())
                .with_context("path", path.display()),
        )
    })
}

fn write_json<T: Serialize>(value: &T, path: &Path, what: &str) -> Result<(), PtError> {
    let json = serde_json::to_string_pretty(value).map_err(|err| {
        PtError::Serde(
            ErrorInfo::new(format!("{what}-serialize"), err.to_string())
                .with_context("path", path.display()),
        )
    })?;
    fs::write(path, json).map_err(|err| io_error(&format!("{what}-write"), err, path))
}

fn io_error(code: &str, err: std::io::Error, path: &Path) -> PtError {
    PtError::Io(ErrorInfo::new(code, err.to_string()).with_context("path", path.display()))
}

fn csv_error(code: &str, err: csv::Error, path: &Path) -> PtError {
    PtError::Io(ErrorInfo::new(code, err.to_string()).with_context("path", path.display()))
}
