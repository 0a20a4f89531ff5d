//! The catalogue of exports that can be synced.

use crate::config::{Config, ConfigError};
use serde::{Deserialize, Serialize};
use sheetsync_engine::{DuplicatePolicy, KeySpec};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Every export the backend offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    Transaksi,
    PointTrx,
    User,
    PembayaranKoin,
}

impl ExportKind {
    pub const ALL: [ExportKind; 4] = [
        ExportKind::Transaksi,
        ExportKind::PointTrx,
        ExportKind::User,
        ExportKind::PembayaranKoin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportKind::Transaksi => "transaksi",
            ExportKind::PointTrx => "point_trx",
            ExportKind::User => "user",
            ExportKind::PembayaranKoin => "pembayaran_koin",
        }
    }

    /// The built-in definition of this export.
    pub fn definition(self, duplicate_policy: DuplicatePolicy) -> ExportDefinition {
        let (name, key) = match self {
            ExportKind::Transaksi => ("Transaction Export", "Transaksi ID"),
            ExportKind::PointTrx => ("Point Transaction Export", "Point Transaction ID"),
            ExportKind::User => ("User Data Export", "User ID"),
            ExportKind::PembayaranKoin => ("Coin Payment Export", "Payment ID"),
        };
        ExportDefinition {
            kind: self,
            name: name.to_string(),
            key: KeySpec::column(key),
            file_prefix: format!("export_{}", self.as_str()),
            sheet_name: self.as_str().to_string(),
            duplicate_policy,
        }
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ExportKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| ConfigError::UnknownExport(s.to_string()))
    }
}

/// How one export is extracted and where it is synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDefinition {
    pub kind: ExportKind,
    /// Display name used in logs and notifications
    pub name: String,
    /// Natural key of the export's rows
    pub key: KeySpec,
    /// Downloaded files start with this prefix
    pub file_prefix: String,
    /// Sheet the export is synced into
    pub sheet_name: String,
    pub duplicate_policy: DuplicatePolicy,
}

impl ExportDefinition {
    fn validate(&self) -> Result<(), ConfigError> {
        self.key
            .validate()
            .map_err(|e| ConfigError::InvalidExport(format!("{}: {}", self.kind, e)))?;
        if self.file_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidExport(format!(
                "{}: empty file prefix",
                self.kind
            )));
        }
        if self.sheet_name.trim().is_empty() {
            return Err(ConfigError::InvalidExport(format!(
                "{}: empty sheet name",
                self.kind
            )));
        }
        Ok(())
    }
}

/// Validated, ordered set of enabled exports.
#[derive(Debug, Clone)]
pub struct ExportCatalog {
    exports: Vec<ExportDefinition>,
}

impl ExportCatalog {
    /// Build the catalogue from configuration.
    pub fn load(config: &Config) -> Result<Self, ConfigError> {
        let kinds: Vec<ExportKind> = match &config.enabled_exports {
            Some(enabled) => ExportKind::ALL
                .into_iter()
                .filter(|kind| enabled.contains(kind))
                .collect(),
            None => ExportKind::ALL.to_vec(),
        };
        Self::new(
            kinds
                .into_iter()
                .map(|kind| kind.definition(config.duplicate_policy))
                .collect(),
        )
    }

    /// Build from explicit definitions, validating each one.
    pub fn new(exports: Vec<ExportDefinition>) -> Result<Self, ConfigError> {
        let mut sheets = HashSet::new();
        let mut kinds = HashSet::new();
        for export in &exports {
            export.validate()?;
            if !kinds.insert(export.kind) {
                return Err(ConfigError::InvalidExport(format!(
                    "{} defined twice",
                    export.kind
                )));
            }
            if !sheets.insert(export.sheet_name.as_str()) {
                return Err(ConfigError::InvalidExport(format!(
                    "sheet '{}' used by more than one export",
                    export.sheet_name
                )));
            }
        }
        Ok(Self { exports })
    }

    pub fn get(&self, kind: ExportKind) -> Option<&ExportDefinition> {
        self.exports.iter().find(|e| e.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExportDefinition> {
        self.exports.iter()
    }

    pub fn kinds(&self) -> Vec<ExportKind> {
        self.exports.iter().map(|e| e.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.exports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }
}
