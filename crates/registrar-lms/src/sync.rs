//! Batched enrollment writes: dedupe, partition, write sequentially, aggregate.

use registrar_types::{
    EnrollmentOutcome, EnrollmentRecord, LmsError, LmsResponse, LmsTransport, WriteMethod,
    WriteOutcome, LMS_ENROLLMENT_WRITE_MAX_SIZE,
};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Statuses whose bodies carry per-student results.
const EXPECTED_STATUSES: [u16; 4] = [200, 201, 207, 422];

/// Writes enrollment records to the LMS in bounded sub-batches.
pub struct EnrollmentSynchronizer {
    transport: Arc<dyn LmsTransport>,
    max_write_size: usize,
}

impl EnrollmentSynchronizer {
    pub fn new(transport: Arc<dyn LmsTransport>) -> Self {
        Self {
            transport,
            max_write_size: LMS_ENROLLMENT_WRITE_MAX_SIZE,
        }
    }

    /// Override the sub-batch size (at least 1).
    pub fn with_max_write_size(mut self, max_write_size: usize) -> Self {
        self.max_write_size = max_write_size.max(1);
        self
    }

    pub fn max_write_size(&self) -> usize {
        self.max_write_size
    }

    /// Write `records` to `url`.
    ///
    /// Every student key appearing more than once is left out of the write and tagged
    /// `duplicated`. The rest are written in input order, one call per sub-batch of at
    /// most `max_write_size`, each call finishing before the next starts. Keys start as
    /// `internal-error` and are overwritten by the statuses the LMS reports for their
    /// sub-batch. Failing to reach the LMS at all aborts with the transport error.
    pub async fn write(
        &self,
        method: WriteMethod,
        url: &str,
        records: &[EnrollmentRecord],
    ) -> Result<WriteOutcome, LmsError> {
        let (unique, duplicates) = split_duplicates(records);

        let mut outcome = WriteOutcome {
            good: false,
            bad: !duplicates.is_empty(),
            ..WriteOutcome::default()
        };
        for record in &unique {
            outcome
                .results
                .insert(record.student_key.clone(), EnrollmentOutcome::InternalError);
        }
        for key in duplicates {
            outcome.results.insert(key, EnrollmentOutcome::Duplicated);
        }

        for batch in unique.chunks(self.max_write_size) {
            let body = serde_json::to_value(batch)
                .map_err(|e| LmsError::InvalidData(e.to_string()))?;
            let res = self.transport.send(method.into(), url, Some(&body)).await?;
            tracing::info!(
                method = %method,
                url = %url,
                status = res.status,
                "LMS responded to {} {} with status {} and body {}",
                method,
                url,
                res.status,
                res.body
            );
            self.aggregate_batch(&mut outcome, batch, &res);
        }
        Ok(outcome)
    }

    fn aggregate_batch(
        &self,
        outcome: &mut WriteOutcome,
        batch: &[&EnrollmentRecord],
        res: &LmsResponse,
    ) {
        match res.status {
            200 | 201 => outcome.good = true,
            207 => {
                outcome.good = true;
                outcome.bad = true;
            }
            _ => outcome.bad = true,
        }
        if !EXPECTED_STATUSES.contains(&res.status) {
            return;
        }
        let batch_keys: HashSet<&str> = batch.iter().map(|r| r.student_key.as_str()).collect();
        match res.json() {
            Some(Value::Object(map)) => {
                for (key, value) in map {
                    if !batch_keys.contains(key.as_str()) {
                        tracing::warn!(student_key = %key, "LMS reported a student key that was not in the batch");
                        continue;
                    }
                    let status = match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    outcome
                        .results
                        .insert(key, EnrollmentOutcome::from(status.as_str()));
                }
            }
            Some(Value::String(message)) => outcome.messages.push(message),
            Some(Value::Null) => {}
            Some(other) => outcome.messages.push(other.to_string()),
            None if !res.body.trim().is_empty() => outcome.messages.push(res.body.clone()),
            None => {}
        }
    }
}

/// Records whose student key occurs once (in input order), and the set of keys
/// occurring more than once.
fn split_duplicates(records: &[EnrollmentRecord]) -> (Vec<&EnrollmentRecord>, BTreeSet<String>) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in records {
        *counts.entry(record.student_key.as_str()).or_default() += 1;
    }
    let duplicates: BTreeSet<String> = counts
        .iter()
        .filter(|(_, n)| **n > 1)
        .map(|(k, _)| k.to_string())
        .collect();
    let unique = records
        .iter()
        .filter(|r| counts.get(r.student_key.as_str()) == Some(&1))
        .collect();
    (unique, duplicates)
}
