//! Report generation for audit and scoring results

use anyhow::Result;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::models::{AuditResult, ScoreReport};

/// Trait for report generators
pub trait Reporter {
    fn generate(&self, result: &AuditResult, output_path: &Path) -> Result<()>;

    fn generate_scores(&self, report: &ScoreReport, output_path: &Path) -> Result<()>;
}

/// JSON report generator
pub struct JsonReporter {
    pretty: bool,
}

impl JsonReporter {
    pub fn new() -> Self {
        Self { pretty: true }
    }

    pub fn compact() -> Self {
        Self { pretty: false }
    }

    fn write<T: Serialize>(&self, value: &T, output_path: &Path) -> Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        fs::write(output_path, json)?;
        Ok(())
    }
}

impl Default for JsonReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for JsonReporter {
    fn generate(&self, result: &AuditResult, output_path: &Path) -> Result<()> {
        self.write(result, output_path)
    }

    fn generate_scores(&self, report: &ScoreReport, output_path: &Path) -> Result<()> {
        self.write(report, output_path)
    }
}
