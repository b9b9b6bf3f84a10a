//! Agent-facing `lsp` tool: JSON arguments in, readable text plus structured data out.

use crate::manager::{LspManager, SymbolScope};
use crate::Result;
use codenav_client::{DiagnosticResult, LocationResult, SymbolResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const OPERATIONS: &str = "definition, references, hover, diagnostics, symbols";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            data: None,
        }
    }
}

pub struct LspTool {
    manager: LspManager,
}

impl LspTool {
    pub fn new(manager: LspManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &LspManager {
        &self.manager
    }

    pub fn name(&self) -> &'static str {
        "lsp"
    }

    pub fn description(&self) -> &'static str {
        "Language Server Protocol tool for code navigation and analysis.\n\
         \n\
         Operations:\n\
         - definition: where a symbol is defined. Args: file, line, column (1-indexed)\n\
         - references: every use of a symbol. Args: file, line, column (1-indexed)\n\
         - hover: type information and documentation. Args: file, line, column (1-indexed)\n\
         - diagnostics: compiler errors and warnings. Args: file\n\
         - symbols: symbols in a file or the workspace. Args: file, scope (\"file\" or \"workspace\"), query (optional, workspace scope)"
    }

    /// JSON schema of the tool arguments.
    pub fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["definition", "references", "hover", "diagnostics", "symbols"],
                    "description": "The LSP operation to perform"
                },
                "file": {"type": "string", "description": "File path relative to workspace root"},
                "line": {"type": "integer", "description": "Line number (1-indexed)"},
                "column": {"type": "integer", "description": "Column position (1-indexed)"},
                "scope": {
                    "type": "string",
                    "enum": ["file", "workspace"],
                    "description": "Scope for symbols operation (default: file)"
                },
                "query": {"type": "string", "description": "Workspace symbol filter"}
            },
            "required": ["operation", "file"]
        })
    }

    pub async fn execute(&self, args: &Value) -> ToolResult {
        let empty = Map::new();
        let args = args.as_object().unwrap_or(&empty);

        let Some(operation) = args.get("operation").and_then(Value::as_str) else {
            return ToolResult::failure(format!(
                "missing 'operation' parameter (required: {})",
                OPERATIONS
            ));
        };
        let Some(file) = args.get("file").and_then(Value::as_str) else {
            return ToolResult::failure("missing 'file' parameter");
        };

        let file = self.resolve(file);
        debug!("lsp tool: {} {}", operation, file.display());

        match operation {
            "definition" | "references" | "hover" => {
                let (line, column) = match position(args) {
                    Ok(position) => position,
                    Err(message) => return ToolResult::failure(message),
                };
                match operation {
                    "definition" => self.definition(&file, line, column).await,
                    "references" => self.references(&file, line, column).await,
                    _ => self.hover(&file, line, column).await,
                }
            }
            "diagnostics" => self.diagnostics(&file).await,
            "symbols" => {
                let scope = match args.get("scope").and_then(Value::as_str) {
                    None | Some("file") => SymbolScope::File,
                    Some("workspace") => SymbolScope::Workspace,
                    Some(other) => {
                        return ToolResult::failure(format!(
                            "invalid 'scope' parameter: {} (valid: file, workspace)",
                            other
                        ))
                    }
                };
                let query = args.get("query").and_then(Value::as_str);
                self.symbols(&file, scope, query).await
            }
            other => ToolResult::failure(format!(
                "unknown operation: {} (valid: {})",
                other, OPERATIONS
            )),
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.manager.shutdown().await
    }

    async fn definition(&self, file: &Path, line: u32, column: u32) -> ToolResult {
        match self.manager.definition(file, line, column).await {
            Ok(locations) => self.locations("definition", file, line, column, locations),
            Err(e) => ToolResult::failure(format!("definition lookup failed: {}", e)),
        }
    }

    async fn references(&self, file: &Path, line: u32, column: u32) -> ToolResult {
        match self.manager.references(file, line, column).await {
            Ok(locations) => self.locations("reference", file, line, column, locations),
            Err(e) => ToolResult::failure(format!("references lookup failed: {}", e)),
        }
    }

    fn locations(
        &self,
        noun: &str,
        file: &Path,
        line: u32,
        column: u32,
        locations: Vec<LocationResult>,
    ) -> ToolResult {
        if locations.is_empty() {
            return ToolResult::ok(format!(
                "No {} found at {}:{}:{}",
                if noun == "reference" { "references" } else { noun },
                self.display(file),
                line,
                column
            ));
        }

        let mut output = format!("Found {} {}(s):\n", locations.len(), noun);
        for location in &locations {
            let _ = writeln!(
                output,
                "  {}:{}:{}",
                self.display(Path::new(&location.file)),
                location.line,
                location.column
            );
        }
        ToolResult::ok(output).with_data(json!({ "locations": locations }))
    }

    async fn hover(&self, file: &Path, line: u32, column: u32) -> ToolResult {
        match self.manager.hover(file, line, column).await {
            Ok(content) if content.is_empty() => ToolResult::ok(format!(
                "No hover information at {}:{}:{}",
                self.display(file),
                line,
                column
            )),
            Ok(content) => ToolResult::ok(content.clone()).with_data(json!({ "content": content })),
            Err(e) => ToolResult::failure(format!("hover lookup failed: {}", e)),
        }
    }

    async fn diagnostics(&self, file: &Path) -> ToolResult {
        let diagnostics = match self.manager.diagnostics(file).await {
            Ok(diagnostics) => diagnostics,
            Err(e) => return ToolResult::failure(format!("diagnostics lookup failed: {}", e)),
        };
        if diagnostics.is_empty() {
            return ToolResult::ok(format!("No diagnostics for {}", self.display(file)));
        }

        let mut output = format!(
            "Found {} diagnostic(s) in {}:\n\n",
            diagnostics.len(),
            self.display(file)
        );

        let (errors, rest): (Vec<&DiagnosticResult>, Vec<&DiagnosticResult>) =
            diagnostics.iter().partition(|d| d.severity == "error");
        let (warnings, other): (Vec<&DiagnosticResult>, Vec<&DiagnosticResult>) =
            rest.into_iter().partition(|d| d.severity == "warning");

        for (heading, group) in [
            ("## Errors", &errors),
            ("## Warnings", &warnings),
            ("## Info/Hints", &other),
        ] {
            if group.is_empty() {
                continue;
            }
            output.push_str(heading);
            output.push('\n');
            for diagnostic in group {
                let _ = write!(output, "- Line {}: {}", diagnostic.line, diagnostic.message);
                if let Some(code) = &diagnostic.code {
                    let _ = write!(output, " [{}]", code);
                }
                output.push('\n');
            }
            output.push('\n');
        }

        ToolResult::ok(output.trim_end().to_string() + "\n")
            .with_data(json!({ "diagnostics": diagnostics }))
    }

    async fn symbols(&self, file: &Path, scope: SymbolScope, query: Option<&str>) -> ToolResult {
        let result = match (scope, query) {
            (SymbolScope::Workspace, Some(query)) => {
                self.manager.workspace_symbols(file, query).await
            }
            _ => self.manager.symbols(file, scope).await,
        };
        let symbols = match result {
            Ok(symbols) => symbols,
            Err(e) => return ToolResult::failure(format!("symbols lookup failed: {}", e)),
        };

        let scope_name = match scope {
            SymbolScope::File => "file",
            SymbolScope::Workspace => "workspace",
        };
        if symbols.is_empty() {
            return ToolResult::ok(format!(
                "No symbols found in {} (scope: {})",
                self.display(file),
                scope_name
            ));
        }

        let mut output = match scope {
            SymbolScope::Workspace => {
                format!("Found {} symbol(s) in workspace:\n\n", symbols.len())
            }
            SymbolScope::File => format!(
                "Found {} symbol(s) in {}:\n\n",
                symbols.len(),
                self.display(file)
            ),
        };
        self.write_symbols(&mut output, &symbols);

        ToolResult::ok(output).with_data(json!({ "symbols": symbols }))
    }

    /// One line per symbol, indented under the symbol it is nested in.
    fn write_symbols(&self, output: &mut String, symbols: &[SymbolResult]) {
        let mut depths: HashMap<&str, usize> = HashMap::new();
        for symbol in symbols {
            let depth = symbol
                .container
                .as_deref()
                .and_then(|container| depths.get(container))
                .map_or(0, |depth| depth + 1);
            depths.insert(&symbol.name, depth);

            let indent = "  ".repeat(depth);
            let location = format!("{}:{}", self.display(Path::new(&symbol.file)), symbol.line);
            let _ = match &symbol.detail {
                Some(detail) if !detail.is_empty() => writeln!(
                    output,
                    "{}- {} {} ({}) {}",
                    indent, symbol.kind, symbol.name, detail, location
                ),
                _ => writeln!(output, "{}- {} {} {}", indent, symbol.kind, symbol.name, location),
            };
        }
    }

    fn resolve(&self, file: &str) -> PathBuf {
        codenav_client::protocol::resolve_path(self.manager.root(), Path::new(file))
    }

    /// Path relative to the workspace root when it lies inside it.
    fn display(&self, path: &Path) -> String {
        match path.strip_prefix(self.manager.root()) {
            Ok(relative) => relative.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }
}

/// 1-indexed line and column from the arguments.
fn position(args: &Map<String, Value>) -> std::result::Result<(u32, u32), String> {
    let line = integer(args, "line")?;
    let column = integer(args, "column")?;
    Ok((line, column))
}

fn integer(args: &Map<String, Value>, name: &str) -> std::result::Result<u32, String> {
    let value = args
        .get(name)
        .and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        })
        .ok_or_else(|| format!("missing or invalid '{}' parameter (must be integer)", name))?;
    if value < 1 {
        return Err(format!("'{}' must be >= 1 (1-indexed)", name));
    }
    u32::try_from(value).map_err(|_| format!("'{}' is out of range", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LspConfig;

    fn tool() -> LspTool {
        LspTool::new(LspManager::new(LspConfig::default(), "/work"))
    }

    #[tokio::test]
    async fn test_missing_operation() {
        let result = tool().execute(&json!({"file": "main.go"})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("missing 'operation'"));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let result = tool().execute(&json!({"operation": "hover"})).await;
        assert_eq!(result.error.as_deref(), Some("missing 'file' parameter"));
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let result = tool()
            .execute(&json!({"operation": "rename", "file": "main.go"}))
            .await;
        assert_eq!(
            result.error.as_deref(),
            Some("unknown operation: rename (valid: definition, references, hover, diagnostics, symbols)")
        );
    }

    #[tokio::test]
    async fn test_position_validation() {
        let tool = tool();

        let result = tool
            .execute(&json!({"operation": "definition", "file": "main.go", "column": 3}))
            .await;
        assert_eq!(
            result.error.as_deref(),
            Some("missing or invalid 'line' parameter (must be integer)")
        );

        let result = tool
            .execute(&json!({"operation": "definition", "file": "main.go", "line": 0, "column": 3}))
            .await;
        assert_eq!(result.error.as_deref(), Some("'line' must be >= 1 (1-indexed)"));

        let result = tool
            .execute(&json!({"operation": "hover", "file": "main.go", "line": 2, "column": "x"}))
            .await;
        assert_eq!(
            result.error.as_deref(),
            Some("missing or invalid 'column' parameter (must be integer)")
        );
    }

    #[tokio::test]
    async fn test_invalid_scope() {
        let result = tool()
            .execute(&json!({"operation": "symbols", "file": "main.go", "scope": "galaxy"}))
            .await;
        assert!(result.error.unwrap().contains("invalid 'scope'"));
    }

    #[tokio::test]
    async fn test_manager_error_is_reported() {
        let result = tool()
            .execute(&json!({
                "operation": "definition", "file": "notes.txt", "line": 1, "column": 1
            }))
            .await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("definition lookup failed: unable to detect language for file: /work/notes.txt")
        );
    }

    #[test]
    fn test_display_paths() {
        let tool = tool();
        assert_eq!(tool.display(Path::new("/work/pkg/a.go")), "pkg/a.go");
        assert_eq!(tool.display(Path::new("/elsewhere/b.go")), "/elsewhere/b.go");
        assert_eq!(tool.resolve("pkg/a.go"), PathBuf::from("/work/pkg/a.go"));
    }

    #[test]
    fn test_result_serialization() {
        let value = serde_json::to_value(ToolResult::failure("nope")).unwrap();
        assert_eq!(value, json!({"success": false, "output": "", "error": "nope"}));
    }
}
