//! Program directory loaded from configuration.

use async_trait::async_trait;
use registrar_types::{EnrollmentError, Program, ProgramDirectory};
use std::collections::HashMap;

/// Program key -> catalog uuid, fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProgramDirectory {
    programs: HashMap<String, Program>,
}

impl InMemoryProgramDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, key: &str, discovery_uuid: &str) -> Self {
        self.programs.insert(
            key.to_string(),
            Program {
                key: key.to_string(),
                discovery_uuid: discovery_uuid.to_string(),
            },
        );
        self
    }

    /// Parse `key=uuid,key=uuid`. Blank entries are skipped.
    pub fn parse(list: &str) -> Result<Self, EnrollmentError> {
        let mut dir = Self::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (key, uuid) = entry.split_once('=').ok_or_else(|| {
                EnrollmentError::InvalidInput(format!("expected key=uuid, got {}", entry))
            })?;
            let (key, uuid) = (key.trim(), uuid.trim());
            if key.is_empty() || uuid.is_empty() {
                return Err(EnrollmentError::InvalidInput(format!(
                    "expected key=uuid, got {}",
                    entry
                )));
            }
            dir = dir.with_program(key, uuid);
        }
        Ok(dir)
    }

    /// Programs from `REGISTRAR_PROGRAMS`; empty when unset.
    pub fn from_env() -> Result<Self, EnrollmentError> {
        match std::env::var("REGISTRAR_PROGRAMS") {
            Ok(list) => Self::parse(&list),
            Err(_) => Ok(Self::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

#[async_trait]
impl ProgramDirectory for InMemoryProgramDirectory {
    async fn get_program(&self, program_key: &str) -> Option<Program> {
        self.programs.get(program_key).cloned()
    }
}
