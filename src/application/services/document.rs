//! Form document service
//!
//! Reads TOML form documents through the filesystem boundary and turns them
//! into live forms.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::application::{ApplicationError, ApplicationResult, Form, IoResultExt};
use crate::config::Settings;
use crate::domain::{DomainError, FormDocument};
use crate::infrastructure::traits::FileSystem;

/// Service for loading form documents.
pub struct DocumentService {
    fs: Arc<dyn FileSystem>,
    settings: Arc<Settings>,
}

impl DocumentService {
    /// Create a new document service.
    pub fn new(fs: Arc<dyn FileSystem>, settings: Arc<Settings>) -> Self {
        Self { fs, settings }
    }

    /// Parse and validate document text; `origin` names it in errors.
    pub fn parse(&self, content: &str, origin: &Path) -> ApplicationResult<FormDocument> {
        let document: FormDocument = toml::from_str(content).map_err(|e| {
            DomainError::InvalidDocument(format!("{}: {}", origin.display(), e.message()))
        })?;
        document.validate()?;
        Ok(document)
    }

    /// Read a document from disk.
    #[instrument(level = "debug", skip(self))]
    pub fn load(&self, path: &Path) -> ApplicationResult<FormDocument> {
        if !self.fs.exists(path) {
            return Err(ApplicationError::OperationFailed {
                context: format!("form document not found: {}", path.display()),
                source: Box::new(std::io::Error::from(std::io::ErrorKind::NotFound)),
            });
        }
        let content = self
            .fs
            .read_to_string(path)
            .with_path_context("read form document", path)?;
        let document = self.parse(&content, path)?;
        debug!("load: {} top-level fields", document.fields.len());
        Ok(document)
    }

    /// Read a document and build the form it describes.
    pub fn load_form(&self, path: &Path) -> ApplicationResult<Form> {
        let document = self.load(path)?;
        Form::from_document(&document, &self.settings)
    }

    /// Write a document as TOML.
    pub fn save(&self, path: &Path, document: &FormDocument) -> ApplicationResult<()> {
        let content = toml::to_string_pretty(document).map_err(|e| ApplicationError::OperationFailed {
            context: format!("serialize form document {}", path.display()),
            source: Box::new(e),
        })?;
        self.fs
            .write(path, &content)
            .with_path_context("write form document", path)
    }
}
