//! Tools: trait, registry, execution façade, and built-ins
//!
//! Tool names are namespaced `<namespace>:<command>` (`fs:read`,
//! `shell:exec`, `<pluginId>:<command>`). Function-calling APIs reject `:`
//! in function names, so names are sanitized on the wire and restored on
//! the way back in.

pub mod executor;
pub mod fs;
pub mod registry;
pub mod shell;
pub mod traits;

pub use executor::{normalize_input, ToolExecutor, ToolPermissions, MAX_TOOL_RETRIES};
pub use fs::{FsExists, FsList, FsRead, FsSearch, FsWrite};
pub use registry::ToolRegistry;
pub use shell::ShellExec;
pub use traits::{Tool, ToolCall, ToolErrorDetail, ToolOutput, ToolResult};

/// Separator replacing `:` in wire-safe tool names.
const WIRE_SEPARATOR: &str = "__";

/// Map a namespaced tool name to its wire-safe form (`fs:read` → `fs__read`).
pub fn sanitize_tool_name(name: &str) -> String {
    name.replace(':', WIRE_SEPARATOR)
}

/// Restore a wire-safe name to the namespaced form. Inverse of
/// [`sanitize_tool_name`] for every registered name: namespaces contain no
/// `__`, so the first separator is the namespace boundary.
pub fn restore_tool_name(name: &str) -> String {
    match name.find(WIRE_SEPARATOR) {
        Some(idx) => format!(
            "{}:{}",
            &name[..idx],
            &name[idx + WIRE_SEPARATOR.len()..]
        ),
        None => name.to_string(),
    }
}

/// Register the built-in tool set rooted at `working_dir`.
pub fn builtin_registry(working_dir: &std::path::Path) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(FsRead::new(working_dir));
    registry.register(FsWrite::new(working_dir));
    registry.register(FsList::new(working_dir));
    registry.register(FsExists::new(working_dir));
    registry.register(FsSearch::new(working_dir));
    registry.register(ShellExec::new(working_dir));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_round_trips_registry_names() {
        let dir = tempfile::tempdir().unwrap();
        let registry = builtin_registry(dir.path());
        for name in registry.names() {
            let wire = sanitize_tool_name(name);
            assert!(!wire.contains(':'));
            assert_eq!(restore_tool_name(&wire), name);
        }
    }

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(sanitize_tool_name("report"), "report");
        assert_eq!(restore_tool_name("report"), "report");
        assert_eq!(sanitize_tool_name("code:find-definition"), "code__find-definition");
        assert_eq!(restore_tool_name("code__find-definition"), "code:find-definition");
    }
}
