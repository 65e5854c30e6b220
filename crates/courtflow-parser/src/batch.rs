use std::collections::HashMap;

use serde::Serialize;

use crate::model::{CaseReturnRow, RawCaseRow};
use crate::row::{FieldError, RowValidator};

pub const DEFAULT_EARLY_FAILURE_THRESHOLD: usize = 5;

/// Stops batch validation after `threshold` consecutive failing rows.
/// A threshold of zero never stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EarlyFailurePolicy {
    pub threshold: usize,
}

impl EarlyFailurePolicy {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn disabled() -> Self {
        Self { threshold: 0 }
    }

    fn trips(&self, consecutive: usize) -> bool {
        self.threshold > 0 && consecutive >= self.threshold
    }
}

impl Default for EarlyFailurePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_EARLY_FAILURE_THRESHOLD)
    }
}

#[derive(Debug, Clone)]
pub enum RowOutcome {
    Valid(CaseReturnRow),
    Invalid {
        row_number: u32,
        errors: Vec<FieldError>,
    },
    Duplicate {
        row_number: u32,
        first_seen: u32,
    },
}

impl RowOutcome {
    pub fn row_number(&self) -> u32 {
        match self {
            RowOutcome::Valid(row) => row.row_number,
            RowOutcome::Invalid { row_number, .. } | RowOutcome::Duplicate { row_number, .. } => {
                *row_number
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, RowOutcome::Valid(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarlyAbort {
    pub at_row: u32,
    pub consecutive: usize,
    pub threshold: usize,
}

#[derive(Debug, Clone)]
pub struct BatchValidation {
    pub total_rows: usize,
    pub outcomes: Vec<RowOutcome>,
    pub aborted: Option<EarlyAbort>,
}

impl BatchValidation {
    pub fn valid_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_valid()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.valid_count()
    }
}

/// Validates rows in file order. Row numbers are 1-based data-row indices.
pub fn validate_rows(
    rows: &[RawCaseRow],
    validator: &RowValidator,
    policy: EarlyFailurePolicy,
) -> BatchValidation {
    let mut outcomes = Vec::with_capacity(rows.len());
    let mut seen: HashMap<String, u32> = HashMap::new();
    let mut consecutive = 0usize;

    for (idx, raw) in rows.iter().enumerate() {
        let row_number = idx as u32 + 1;
        let validation = validator.validate_row(raw, row_number);

        match validation.validated {
            Some(row) => {
                consecutive = 0;
                match seen.get(&row.fingerprint) {
                    Some(first_seen) => outcomes.push(RowOutcome::Duplicate {
                        row_number,
                        first_seen: *first_seen,
                    }),
                    None => {
                        seen.insert(row.fingerprint.clone(), row_number);
                        outcomes.push(RowOutcome::Valid(row));
                    }
                }
            }
            None => {
                consecutive += 1;
                outcomes.push(RowOutcome::Invalid {
                    row_number,
                    errors: validation.errors,
                });

                if policy.trips(consecutive) {
                    return BatchValidation {
                        total_rows: rows.len(),
                        outcomes,
                        aborted: Some(EarlyAbort {
                            at_row: row_number,
                            consecutive,
                            threshold: policy.threshold,
                        }),
                    };
                }
            }
        }
    }

    BatchValidation {
        total_rows: rows.len(),
        outcomes,
        aborted: None,
    }
}
