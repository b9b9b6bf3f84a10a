//! Diagnostics cache fed by `textDocument/publishDiagnostics`.

use lsp_types::{Diagnostic, PublishDiagnosticsParams, Url};
use std::collections::HashMap;
use std::sync::RwLock;

/// Latest diagnostics per document. Each publish replaces what was there before.
#[derive(Debug, Default)]
pub struct DiagnosticsCache {
    cache: RwLock<HashMap<Url, Vec<Diagnostic>>>,
}

impl DiagnosticsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the diagnostics for `uri`. An empty list clears the entry.
    pub fn update(&self, uri: Url, diagnostics: Vec<Diagnostic>) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        if diagnostics.is_empty() {
            cache.remove(&uri);
        } else {
            cache.insert(uri, diagnostics);
        }
    }

    pub fn publish(&self, params: PublishDiagnosticsParams) {
        self.update(params.uri, params.diagnostics);
    }

    /// Diagnostics for `uri`; empty when none have been published.
    pub fn get(&self, uri: &Url) -> Vec<Diagnostic> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache.get(uri).cloned().unwrap_or_default()
    }

    #[cfg(test)]
    fn file_count(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{DiagnosticSeverity, Position, Range};

    fn diagnostic(line: u32, message: &str) -> Diagnostic {
        Diagnostic {
            range: Range::new(Position::new(line, 0), Position::new(line, 4)),
            severity: Some(DiagnosticSeverity::ERROR),
            message: message.to_string(),
            ..Default::default()
        }
    }

    fn uri(path: &str) -> Url {
        Url::parse(&format!("file://{}", path)).unwrap()
    }

    #[test]
    fn test_publish_replaces_not_merges() {
        let cache = DiagnosticsCache::new();
        let file = uri("/work/main.go");

        cache.update(file.clone(), vec![diagnostic(1, "a"), diagnostic(2, "b")]);
        cache.update(file.clone(), vec![diagnostic(7, "c")]);

        let current = cache.get(&file);
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].message, "c");
    }

    #[test]
    fn test_empty_publish_clears_entry() {
        let cache = DiagnosticsCache::new();
        let file = uri("/work/main.go");

        cache.update(file.clone(), vec![diagnostic(1, "unused variable")]);
        assert_eq!(cache.file_count(), 1);

        cache.update(file.clone(), Vec::new());
        assert!(cache.get(&file).is_empty());
        assert_eq!(cache.file_count(), 0);
    }

    #[test]
    fn test_unknown_uri_is_empty() {
        let cache = DiagnosticsCache::new();
        cache.update(uri("/work/a.rs"), vec![diagnostic(0, "x")]);
        assert!(cache.get(&uri("/work/b.rs")).is_empty());
    }
}
