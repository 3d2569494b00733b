//! Per-format content extraction.
//!
//! Extraction is modeled as a finite table of [`ContentExtractor`]s keyed
//! by [`SourceType`]. The registry dispatches by the declared type; a type
//! with no registered extractor (pdf, web — handled by external
//! collaborators) is reported as not supported rather than guessed at.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::models::{DataSource, Metadata, SourceType};

/// What an extractor produces: the item title, the plain-text content, and
/// any extractor-specific metadata.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    pub title: String,
    pub content: String,
    pub metadata: Metadata,
}

/// A per-format extractor.
pub trait ContentExtractor: Send + Sync {
    /// The source types this extractor handles.
    fn supported_types(&self) -> &[SourceType];

    /// Cheap pre-check: does the source look processable at all?
    fn validate(&self, source: &DataSource) -> bool;

    /// Extract `(title, content, metadata)` from the source.
    fn extract(&self, source: &DataSource) -> Result<ExtractedContent>;
}

/// Finite dispatch table from source type to extractor.
pub struct ProcessorRegistry {
    processors: HashMap<SourceType, Arc<dyn ContentExtractor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    /// Registry with the built-in document and code extractors. `pdf` and
    /// `web` stay unregistered; ingesting them reports "not supported".
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DocumentProcessor));
        registry.register(Arc::new(CodeProcessor));
        registry
    }

    pub fn register(&mut self, processor: Arc<dyn ContentExtractor>) {
        for source_type in processor.supported_types() {
            self.processors.insert(*source_type, processor.clone());
        }
    }

    pub fn get(&self, source_type: SourceType) -> Option<&Arc<dyn ContentExtractor>> {
        self.processors.get(&source_type)
    }

    /// Validate and extract in one step.
    pub fn extract(&self, source: &DataSource) -> Result<ExtractedContent> {
        let Some(processor) = self.get(source.source_type) else {
            bail!(
                "source type '{}' is not supported by any registered processor",
                source.source_type.as_str()
            );
        };
        if !processor.validate(source) {
            bail!("invalid data source: {}", source.path);
        }
        processor.extract(source)
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Title override supplied by the caller, if any.
fn title_override(source: &DataSource) -> Option<String> {
    source
        .metadata
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

fn extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

// ============ document ============

/// Plain text and markdown files.
pub struct DocumentProcessor;

const DOCUMENT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "rst", "text"];

impl ContentExtractor for DocumentProcessor {
    fn supported_types(&self) -> &[SourceType] {
        &[SourceType::Document]
    }

    fn validate(&self, source: &DataSource) -> bool {
        let path = Path::new(&source.path);
        path.is_file()
            && (DOCUMENT_EXTENSIONS.contains(&extension(&source.path).as_str())
                || extension(&source.path).is_empty())
    }

    fn extract(&self, source: &DataSource) -> Result<ExtractedContent> {
        let content = std::fs::read_to_string(&source.path)
            .with_context(|| format!("reading document {}", source.path))?;

        // title: caller override, else first markdown heading, else file stem
        let title = title_override(source)
            .or_else(|| {
                content.lines().find_map(|line| {
                    line.strip_prefix('#')
                        .map(|rest| rest.trim_start_matches('#').trim().to_string())
                        .filter(|t| !t.is_empty())
                })
            })
            .unwrap_or_else(|| file_stem(&source.path));

        let mut metadata = Metadata::new();
        metadata.insert(
            "extension".to_string(),
            serde_json::json!(extension(&source.path)),
        );
        metadata.insert("length".to_string(), serde_json::json!(content.len()));

        Ok(ExtractedContent {
            title,
            content,
            metadata,
        })
    }
}

// ============ code ============

/// Source files. Content is indexed as-is; the language is recorded in
/// metadata.
pub struct CodeProcessor;

const CODE_LANGUAGES: &[(&str, &str)] = &[
    ("rs", "rust"),
    ("py", "python"),
    ("js", "javascript"),
    ("ts", "typescript"),
    ("java", "java"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("go", "go"),
    ("rb", "ruby"),
    ("sh", "shell"),
];

impl ContentExtractor for CodeProcessor {
    fn supported_types(&self) -> &[SourceType] {
        &[SourceType::Code]
    }

    fn validate(&self, source: &DataSource) -> bool {
        let ext = extension(&source.path);
        Path::new(&source.path).is_file()
            && CODE_LANGUAGES.iter().any(|(e, _)| *e == ext)
    }

    fn extract(&self, source: &DataSource) -> Result<ExtractedContent> {
        let content = std::fs::read_to_string(&source.path)
            .with_context(|| format!("reading source file {}", source.path))?;

        let title = title_override(source).unwrap_or_else(|| {
            Path::new(&source.path)
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| source.path.clone())
        });

        let ext = extension(&source.path);
        let language = CODE_LANGUAGES
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, lang)| *lang)
            .unwrap_or("unknown");

        let mut metadata = Metadata::new();
        metadata.insert("language".to_string(), serde_json::json!(language));
        metadata.insert(
            "line_count".to_string(),
            serde_json::json!(content.lines().count()),
        );

        Ok(ExtractedContent {
            title,
            content,
            metadata,
        })
    }
}
