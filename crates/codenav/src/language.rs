//! File extension to language id, and the servers known to work out of the box.

use crate::config::ServerDefinition;
use std::path::Path;

const LANGUAGES: &[(&str, &str)] = &[
    ("go", "go"),
    ("py", "python"),
    ("js", "javascript"),
    ("jsx", "javascriptreact"),
    ("ts", "typescript"),
    ("tsx", "typescriptreact"),
    ("rs", "rust"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("hpp", "cpp"),
    ("cc", "cpp"),
    ("java", "java"),
    ("rb", "ruby"),
    ("php", "php"),
    ("sh", "shellscript"),
    ("bash", "shellscript"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("json", "json"),
    ("lua", "lua"),
    ("zig", "zig"),
    ("swift", "swift"),
    ("kt", "kotlin"),
    ("kts", "kotlin"),
];

/// Language id for `path` by extension, ignoring case. `None` for anything unknown.
pub fn detect_language(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    LANGUAGES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, language)| *language)
}

/// A server from the built-in registry.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinServer {
    pub name: &'static str,
    pub command: &'static str,
    pub args: &'static [&'static str],
    pub languages: &'static [&'static str],
}

pub const BUILTIN_SERVERS: &[BuiltinServer] = &[
    BuiltinServer {
        name: "gopls",
        command: "gopls",
        args: &["serve"],
        languages: &["go"],
    },
    BuiltinServer {
        name: "typescript-language-server",
        command: "typescript-language-server",
        args: &["--stdio"],
        languages: &["javascript", "javascriptreact", "typescript", "typescriptreact"],
    },
    BuiltinServer {
        name: "pylsp",
        command: "pylsp",
        args: &[],
        languages: &["python"],
    },
    BuiltinServer {
        name: "rust-analyzer",
        command: "rust-analyzer",
        args: &[],
        languages: &["rust"],
    },
    BuiltinServer {
        name: "clangd",
        command: "clangd",
        args: &[],
        languages: &["c", "cpp"],
    },
    BuiltinServer {
        name: "bash-language-server",
        command: "bash-language-server",
        args: &["start"],
        languages: &["shellscript"],
    },
    BuiltinServer {
        name: "yaml-language-server",
        command: "yaml-language-server",
        args: &["--stdio"],
        languages: &["yaml"],
    },
    BuiltinServer {
        name: "lua-language-server",
        command: "lua-language-server",
        args: &[],
        languages: &["lua"],
    },
    BuiltinServer {
        name: "zls",
        command: "zls",
        args: &[],
        languages: &["zig"],
    },
    BuiltinServer {
        name: "jdtls",
        command: "jdtls",
        args: &[],
        languages: &["java"],
    },
];

impl BuiltinServer {
    pub fn definition(&self) -> ServerDefinition {
        ServerDefinition::new(self.command, self.args, self.languages)
    }
}

pub fn builtin_server(language: &str) -> Option<&'static BuiltinServer> {
    BUILTIN_SERVERS
        .iter()
        .find(|server| server.languages.contains(&language))
}
