//! Model descriptor loader
//!
//! - One model per `*.json` file in a directory
//! - Other files are skipped
//! - Files are read in name order so errors are reproducible
//! - A missing directory, an unreadable file or an invalid model fails the load

use std::fs;
use std::path::{Path, PathBuf};

use crate::observability::{log_event_with_fields, Event, ObservationScope};

use super::errors::{SchemaError, SchemaResult};
use super::model::{Model, ModelRegistry};

/// Reads model descriptors from disk into a `ModelRegistry`.
pub struct SchemaLoader {
    /// Directory containing model files
    model_dir: PathBuf,
}

impl SchemaLoader {
    pub fn new(model_dir: &Path) -> Self {
        Self {
            model_dir: model_dir.to_path_buf(),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Loads every model file and checks references between models.
    pub fn load_all(&self) -> SchemaResult<ModelRegistry> {
        let dir = self.model_dir.display().to_string();
        let scope = ObservationScope::with_fields("SCHEMA_LOAD", &[("dir", &dir)]);

        match self.load_registry() {
            Ok(registry) => {
                let count = registry.len().to_string();
                log_event_with_fields(Event::SchemasLoaded, &[("dir", &dir), ("models", &count)]);
                scope.complete_with_fields(&[("models", &count)]);
                Ok(registry)
            }
            Err(err) => {
                scope.fail(err.code(), &err.to_string());
                Err(err)
            }
        }
    }

    fn load_registry(&self) -> SchemaResult<ModelRegistry> {
        let mut registry = ModelRegistry::new();
        for path in self.model_files()? {
            registry.add_model(load_model_file(&path)?)?;
        }
        registry.validate_references()?;
        Ok(registry)
    }

    fn model_files(&self) -> SchemaResult<Vec<PathBuf>> {
        let io_error = |source| SchemaError::Io {
            path: self.model_dir.clone(),
            source,
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.model_dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();

            // Skip non-JSON files
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            files.push(path);
        }
        files.sort();
        Ok(files)
    }
}

/// Reads a single model file.
pub fn load_model_file(path: &Path) -> SchemaResult<Model> {
    let content = fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| SchemaError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
