//! Conversion between protocol shapes and the 1-indexed records handed to callers.
//!
//! Callers speak 1-indexed lines and columns; the protocol speaks 0-indexed positions.
//! Every crossing of that boundary goes through `to_position` / `from_position`.

use crate::{LspError, Result};
use lsp_types::{
    Diagnostic, DiagnosticSeverity, DocumentSymbol, Hover, HoverContents, Location, LocationLink,
    MarkedString, NumberOrString, Position, Range, SymbolInformation, SymbolKind, Url,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationResult {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticResult {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub severity: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolResult {
    pub name: String,
    pub kind: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Name of the enclosing symbol, if the server reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

/// 1-indexed line/column to a protocol position. Zero is rejected.
pub fn to_position(line: u32, column: u32) -> Result<Position> {
    if line < 1 || column < 1 {
        return Err(LspError::PositionRange { line, column });
    }
    Ok(Position::new(line - 1, column - 1))
}

/// Protocol position to 1-indexed (line, column).
pub fn from_position(position: Position) -> (u32, u32) {
    (
        position.line.saturating_add(1),
        position.character.saturating_add(1),
    )
}

pub fn path_to_uri(path: &Path) -> Result<Url> {
    let absolute =
        std::path::absolute(path).map_err(|_| LspError::InvalidPath(path.display().to_string()))?;
    Url::from_file_path(&absolute).map_err(|_| LspError::InvalidPath(path.display().to_string()))
}

/// File path for a `file://` URI; other schemes are returned verbatim.
pub fn uri_to_path(uri: &Url) -> String {
    match uri.to_file_path() {
        Ok(path) => path.to_string_lossy().into_owned(),
        Err(_) => uri.to_string(),
    }
}

impl LocationResult {
    pub fn new(file: impl Into<String>, range: Range) -> Self {
        let (line, column) = from_position(range.start);
        let (end_line, end_column) = from_position(range.end);
        Self {
            file: file.into(),
            line,
            column,
            end_line,
            end_column,
        }
    }

    fn from_location(location: &Location) -> Self {
        Self::new(uri_to_path(&location.uri), location.range)
    }

    fn from_link(link: &LocationLink) -> Self {
        Self::new(uri_to_path(&link.target_uri), link.target_selection_range)
    }
}

impl DiagnosticResult {
    pub fn new(file: impl Into<String>, diagnostic: &Diagnostic) -> Self {
        let location = LocationResult::new(file, diagnostic.range);
        Self {
            file: location.file,
            line: location.line,
            column: location.column,
            end_line: location.end_line,
            end_column: location.end_column,
            severity: severity_name(diagnostic.severity).to_string(),
            message: diagnostic.message.clone(),
            source: diagnostic.source.clone(),
            code: diagnostic.code.as_ref().map(|code| match code {
                NumberOrString::Number(n) => n.to_string(),
                NumberOrString::String(s) => s.clone(),
            }),
        }
    }
}

impl SymbolResult {
    fn new(
        name: String,
        kind: SymbolKind,
        file: String,
        range: Range,
        detail: Option<String>,
        container: Option<String>,
    ) -> Self {
        let location = LocationResult::new(file, range);
        Self {
            name,
            kind: symbol_kind_name(kind).to_string(),
            file: location.file,
            line: location.line,
            column: location.column,
            end_line: location.end_line,
            end_column: location.end_column,
            detail,
            container,
        }
    }

    fn from_information(info: SymbolInformation) -> Self {
        let file = uri_to_path(&info.location.uri);
        Self::new(
            info.name,
            info.kind,
            file,
            info.location.range,
            None,
            info.container_name,
        )
    }
}

pub fn severity_name(severity: Option<DiagnosticSeverity>) -> &'static str {
    match severity {
        Some(DiagnosticSeverity::ERROR) => "error",
        Some(DiagnosticSeverity::WARNING) => "warning",
        Some(DiagnosticSeverity::INFORMATION) => "info",
        Some(DiagnosticSeverity::HINT) => "hint",
        _ => "unknown",
    }
}

pub fn symbol_kind_name(kind: SymbolKind) -> &'static str {
    match kind {
        SymbolKind::FILE => "file",
        SymbolKind::MODULE => "module",
        SymbolKind::NAMESPACE => "namespace",
        SymbolKind::PACKAGE => "package",
        SymbolKind::CLASS => "class",
        SymbolKind::METHOD => "method",
        SymbolKind::PROPERTY => "property",
        SymbolKind::FIELD => "field",
        SymbolKind::CONSTRUCTOR => "constructor",
        SymbolKind::ENUM => "enum",
        SymbolKind::INTERFACE => "interface",
        SymbolKind::FUNCTION => "function",
        SymbolKind::VARIABLE => "variable",
        SymbolKind::CONSTANT => "constant",
        SymbolKind::STRING => "string",
        SymbolKind::NUMBER => "number",
        SymbolKind::BOOLEAN => "boolean",
        SymbolKind::ARRAY => "array",
        SymbolKind::OBJECT => "object",
        SymbolKind::KEY => "key",
        SymbolKind::NULL => "null",
        SymbolKind::ENUM_MEMBER => "enumMember",
        SymbolKind::STRUCT => "struct",
        SymbolKind::EVENT => "event",
        SymbolKind::OPERATOR => "operator",
        SymbolKind::TYPE_PARAMETER => "typeParameter",
        _ => "unknown",
    }
}

// Result shapes servers are allowed to send. Variant order is the sniffing order.

#[derive(Deserialize)]
#[serde(untagged)]
enum LocationShape {
    Single(Location),
    Locations(Vec<Location>),
    Links(Vec<LocationLink>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentSymbolShape {
    Nested(Vec<DocumentSymbol>),
    Flat(Vec<SymbolInformation>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WorkspaceSymbolShape {
    Flat(Vec<SymbolInformation>),
    Workspace(Vec<WorkspaceSymbolEntry>),
}

/// LSP 3.17 `WorkspaceSymbol`, whose location may omit the range.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceSymbolEntry {
    name: String,
    kind: SymbolKind,
    location: WorkspaceSymbolLocation,
    #[serde(default)]
    container_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WorkspaceSymbolLocation {
    Full(Location),
    UriOnly { uri: Url },
}

/// Decode a definition or references result: a single location, an array of
/// locations or location links, or null.
pub fn parse_locations(raw: Value) -> Vec<LocationResult> {
    if raw.is_null() {
        return Vec::new();
    }

    match serde_json::from_value::<LocationShape>(raw) {
        Ok(LocationShape::Single(location)) => vec![LocationResult::from_location(&location)],
        Ok(LocationShape::Locations(locations)) => {
            locations.iter().map(LocationResult::from_location).collect()
        }
        Ok(LocationShape::Links(links)) => links.iter().map(LocationResult::from_link).collect(),
        Err(e) => {
            warn!("unrecognized location result shape: {}", e);
            Vec::new()
        }
    }
}

/// Decode a `textDocument/documentSymbol` result into a flat list. Hierarchical symbols
/// carry no URI of their own, so `file` is threaded down through every level.
pub fn parse_document_symbols(raw: Value, file: &str) -> Vec<SymbolResult> {
    if raw.is_null() {
        return Vec::new();
    }

    match serde_json::from_value::<DocumentSymbolShape>(raw) {
        Ok(DocumentSymbolShape::Nested(symbols)) => {
            let mut results = Vec::new();
            flatten_document_symbols(symbols, file, None, &mut results);
            results
        }
        Ok(DocumentSymbolShape::Flat(infos)) => infos
            .into_iter()
            .map(SymbolResult::from_information)
            .collect(),
        Err(e) => {
            warn!("unrecognized document symbol result shape: {}", e);
            Vec::new()
        }
    }
}

fn flatten_document_symbols(
    symbols: Vec<DocumentSymbol>,
    file: &str,
    container: Option<&str>,
    out: &mut Vec<SymbolResult>,
) {
    for symbol in symbols {
        let children = symbol.children.unwrap_or_default();
        out.push(SymbolResult::new(
            symbol.name.clone(),
            symbol.kind,
            file.to_string(),
            symbol.range,
            symbol.detail,
            container.map(str::to_string),
        ));
        flatten_document_symbols(children, file, Some(&symbol.name), out);
    }
}

pub fn parse_workspace_symbols(raw: Value) -> Vec<SymbolResult> {
    if raw.is_null() {
        return Vec::new();
    }

    match serde_json::from_value::<WorkspaceSymbolShape>(raw) {
        Ok(WorkspaceSymbolShape::Flat(infos)) => infos
            .into_iter()
            .map(SymbolResult::from_information)
            .collect(),
        Ok(WorkspaceSymbolShape::Workspace(entries)) => entries
            .into_iter()
            .map(|entry| {
                let (file, range) = match entry.location {
                    WorkspaceSymbolLocation::Full(location) => {
                        (uri_to_path(&location.uri), location.range)
                    }
                    WorkspaceSymbolLocation::UriOnly { uri } => {
                        (uri_to_path(&uri), Range::default())
                    }
                };
                SymbolResult::new(entry.name, entry.kind, file, range, None, entry.container_name)
            })
            .collect(),
        Err(e) => {
            warn!("unrecognized workspace symbol result shape: {}", e);
            Vec::new()
        }
    }
}

/// Plain text of a hover result; empty when the server has nothing to say.
pub fn parse_hover(raw: Value) -> String {
    if raw.is_null() {
        return String::new();
    }

    let hover = match serde_json::from_value::<Hover>(raw) {
        Ok(hover) => hover,
        Err(e) => {
            warn!("unrecognized hover result shape: {}", e);
            return String::new();
        }
    };

    match hover.contents {
        HoverContents::Scalar(marked) => marked_string_text(marked),
        HoverContents::Array(items) => items
            .into_iter()
            .map(marked_string_text)
            .collect::<Vec<_>>()
            .join("\n"),
        HoverContents::Markup(markup) => markup.value,
    }
}

fn marked_string_text(marked: MarkedString) -> String {
    match marked {
        MarkedString::String(s) => s,
        MarkedString::LanguageString(language_string) => language_string.value,
    }
}

/// Resolve `path` against `root` when it is relative.
pub fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
