//! Fixture-backed rail source for development without network access.
//!
//! Loads boards from JSON files and serves them as if they were live
//! Huxley responses. Files are named `{CRS}.json` for departures and
//! `{CRS}_arrivals.json` for arrivals.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::config::ConfigurationError;
use crate::domain::{BoardKey, BoardMode, Crs, StationQuery};

use super::error::SourceError;
use super::types::HuxleyBoard;
use super::{RawSourceResponse, Schema, SourceAdapter, SourceKind};

const ARRIVALS_SUFFIX: &str = "_arrivals";

/// Rail source that serves boards from fixture files.
#[derive(Debug, Clone)]
pub struct MockSource {
    kind: SourceKind,
    boards: HashMap<BoardKey, String>,
}

impl MockSource {
    /// Load every fixture in `data_dir`.
    ///
    /// Fails if the directory cannot be read, a file name is not a CRS code,
    /// a file is not a valid board, or no fixtures are found.
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let data_dir = data_dir.as_ref();
        let fixture_error = |message: String| ConfigurationError::Fixtures {
            path: data_dir.display().to_string(),
            message,
        };

        let entries = std::fs::read_dir(data_dir).map_err(|e| fixture_error(e.to_string()))?;
        let mut boards = HashMap::new();

        for entry in entries {
            let path = entry.map_err(|e| fixture_error(e.to_string()))?.path();
            if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| fixture_error(format!("invalid file name {:?}", path)))?;

            let (crs, mode) = match stem.strip_suffix(ARRIVALS_SUFFIX) {
                Some(crs) => (crs, BoardMode::Arrivals),
                None => (stem, BoardMode::Departures),
            };
            let crs = Crs::parse(crs)
                .map_err(|_| fixture_error(format!("invalid CRS in file name {stem}")))?;

            let body = std::fs::read_to_string(&path)
                .map_err(|e| fixture_error(format!("failed to read {stem}: {e}")))?;
            serde_json::from_str::<HuxleyBoard>(&body)
                .map_err(|e| fixture_error(format!("failed to parse {stem}: {e}")))?;

            boards.insert(BoardKey::new(crs, mode), body);
        }

        if boards.is_empty() {
            return Err(fixture_error("no board files found".to_string()));
        }

        Ok(Self {
            kind: SourceKind::Fallback,
            boards,
        })
    }

    /// Serve fixtures under a different source role.
    #[cfg(test)]
    pub fn with_kind(mut self, kind: SourceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Boards available in the fixture set, sorted.
    pub fn available(&self) -> Vec<BoardKey> {
        let mut keys: Vec<BoardKey> = self.boards.keys().copied().collect();
        keys.sort();
        keys
    }

    fn lookup(&self, query: &StationQuery) -> Result<RawSourceResponse, SourceError> {
        let body = self.boards.get(&query.key()).ok_or_else(|| {
            SourceError::transient(self.kind, format!("no fixture for {}", query.key()))
        })?;

        Ok(RawSourceResponse {
            source: self.kind,
            schema: Schema::Huxley,
            station: query.station(),
            mode: query.mode(),
            status: 200,
            received_at: Utc::now(),
            retry_after: None,
            body: body.clone(),
        })
    }
}

impl SourceAdapter for MockSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn fetch<'a>(
        &'a self,
        query: &'a StationQuery,
    ) -> BoxFuture<'a, Result<RawSourceResponse, SourceError>> {
        let result = self.lookup(query);
        async move { result }.boxed()
    }
}
