//! Flat-file JSON persistence for state that must survive restarts:
//! emergency shutdown reports and the per-session PDT ledger snapshot.
//! Timestamps serialize as ISO-8601.

use crate::domain::risk::pdt::PdtLedger;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const PDT_LEDGER_FILE: &str = "pdt_ledger.json";

pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create state directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.dir.join(name);
        let json = serde_json::to_string_pretty(value)
            .with_context(|| format!("failed to serialize {}", name))?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let raw =
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(value))
    }

    /// Persist a shutdown report under a timestamped name; returns the path.
    pub fn save_shutdown_report<T: Serialize>(
        &self,
        triggered_at: DateTime<Utc>,
        report: &T,
    ) -> Result<PathBuf> {
        let name = format!(
            "shutdown_report_{}.json",
            triggered_at.format("%Y%m%dT%H%M%SZ")
        );
        let path = self.write_json(&name, report)?;
        info!("StateStore: shutdown report written to {}", path.display());
        Ok(path)
    }

    pub fn save_pdt_ledger(&self, ledger: &PdtLedger) -> Result<()> {
        self.write_json(PDT_LEDGER_FILE, ledger)?;
        Ok(())
    }

    pub fn load_pdt_ledger(&self) -> Result<Option<PdtLedger>> {
        self.read_json(PDT_LEDGER_FILE)
    }
}
