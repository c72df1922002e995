//! Error classification with actionable guidance

use serde::{Deserialize, Serialize};

use crate::sandbox::TrapKind;

/// Only this much of stderr is scanned for patterns
pub const STDERR_SCAN_LIMIT: usize = 8 * 1024;

/// Error taxonomy exposed in `metadata.error_guidance`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    OutOfFuel,
    MemoryExceeded,
    Timeout,
    VmFault,
    HostLoad,
    MissingModule,
    UnsupportedModule,
    TupleUnpacking,
    FileNotFound,
    PermissionDenied,
    OutOfMemory,
    RecursionLimit,
    SyntaxError,
    NameError,
    TypeError,
}

/// Classification of a failed execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorGuidance {
    pub error_type: ErrorType,
    pub actionable_guidance: Vec<String>,
    pub related_docs: Vec<String>,
}

impl ErrorGuidance {
    fn new(error_type: ErrorType, guidance: &[&str], docs: &[&str]) -> Self {
        ErrorGuidance {
            error_type,
            actionable_guidance: guidance.iter().map(|s| s.to_string()).collect(),
            related_docs: docs.iter().map(|s| s.to_string()).collect(),
        }
    }
}

const PY_EXCEPTIONS_DOC: &str = "https://docs.python.org/3/library/exceptions.html";
const WASI_DOC: &str = "https://github.com/WebAssembly/WASI/blob/main/legacy/preview1/docs.md";
const QUICKJS_DOC: &str = "https://bellard.org/quickjs/quickjs.html";

/// Stderr signal → guidance, checked in order; the first match wins
struct Pattern {
    needles: &'static [&'static str],
    error_type: ErrorType,
    guidance: &'static [&'static str],
    docs: &'static [&'static str],
}

const PATTERNS: &[Pattern] = &[
    Pattern {
        needles: &["Failed to load guest module", "failed to instantiate guest", "no primary mount"],
        error_type: ErrorType::HostLoad,
        guidance: &[
            "The interpreter module could not be started; this is an engine configuration problem, not a code problem",
            "Check that the configured interpreter .wasm path exists and is a WASI command module",
        ],
        docs: &[WASI_DOC],
    },
    Pattern {
        needles: &["ModuleNotFoundError", "No module named"],
        error_type: ErrorType::MissingModule,
        guidance: &[
            "Only the standard library and packages vendored into the session's site-packages are importable",
            "Native extension packages cannot be loaded inside WebAssembly; use a pure-Python alternative",
            "Enable inject_setup so site-packages is added to sys.path",
        ],
        docs: &["https://docs.python.org/3/reference/import.html"],
    },
    Pattern {
        needles: &["too many values to unpack", "not enough values to unpack", "cannot unpack non-iterable"],
        error_type: ErrorType::TupleUnpacking,
        guidance: &[
            "The call returned a different number of values than the assignment expects",
            "Print the return value first, or assign it to a single name and index into it",
        ],
        docs: &[PY_EXCEPTIONS_DOC],
    },
    Pattern {
        needles: &["FileNotFoundError", "No such file or directory"],
        error_type: ErrorType::FileNotFound,
        guidance: &[
            "Only the workspace mount and the optional data mount exist inside the sandbox",
            "Use paths under /app for files you create; earlier files persist only within the same session",
        ],
        docs: &[PY_EXCEPTIONS_DOC],
    },
    Pattern {
        needles: &["PermissionError", "Read-only file system", "Operation not permitted", "Permission denied"],
        error_type: ErrorType::PermissionDenied,
        guidance: &[
            "The data mount is read-only; write outputs under /app instead",
            "Paths outside the granted mounts are not accessible",
        ],
        docs: &[WASI_DOC],
    },
    Pattern {
        needles: &["MemoryError", "out of memory"],
        error_type: ErrorType::OutOfMemory,
        guidance: &[
            "The guest exhausted its memory limit while allocating",
            "Process data in smaller chunks or stream it instead of loading everything at once",
        ],
        docs: &[PY_EXCEPTIONS_DOC],
    },
    Pattern {
        needles: &["RecursionError", "maximum recursion depth", "stack overflow", "InternalError: stack"],
        error_type: ErrorType::RecursionLimit,
        guidance: &[
            "Recursion went too deep; rewrite the recursive function iteratively",
        ],
        docs: &[PY_EXCEPTIONS_DOC],
    },
    Pattern {
        needles: &["SyntaxError", "IndentationError"],
        error_type: ErrorType::SyntaxError,
        guidance: &[
            "The code failed to parse; check brackets, quotes and indentation near the reported line",
        ],
        docs: &["https://docs.python.org/3/reference/grammar.html"],
    },
    Pattern {
        needles: &["require is not defined", "'require' is not defined", "could not load module"],
        error_type: ErrorType::UnsupportedModule,
        guidance: &[
            "CommonJS require and npm packages are not available in the JavaScript runtime",
            "Use the built-in std and os modules (enable inject_setup to expose them as globals)",
        ],
        docs: &[QUICKJS_DOC],
    },
    Pattern {
        needles: &["NameError", "ReferenceError"],
        error_type: ErrorType::NameError,
        guidance: &[
            "A name was used before it was defined",
            "Variables from earlier executions are only available when auto_persist_globals is enabled",
        ],
        docs: &[PY_EXCEPTIONS_DOC],
    },
    Pattern {
        needles: &["TypeError"],
        error_type: ErrorType::TypeError,
        guidance: &[
            "A value of the wrong type was passed; check argument types and None/undefined values",
        ],
        docs: &[PY_EXCEPTIONS_DOC],
    },
];

/// Classify a failed execution.
///
/// A trap is authoritative; otherwise the first [`STDERR_SCAN_LIMIT`] bytes
/// of stderr are matched against known language signals.
pub fn classify_error(
    trap_kind: Option<TrapKind>,
    trap_message: Option<&str>,
    stderr: &str,
) -> Option<ErrorGuidance> {
    if let Some(kind) = trap_kind {
        return Some(classify_trap(kind, trap_message.unwrap_or_default()));
    }

    let head = bounded_prefix(stderr, STDERR_SCAN_LIMIT);
    PATTERNS
        .iter()
        .find(|p| p.needles.iter().any(|needle| head.contains(needle)))
        .map(|p| ErrorGuidance::new(p.error_type, p.guidance, p.docs))
}

fn classify_trap(kind: TrapKind, message: &str) -> ErrorGuidance {
    match kind {
        TrapKind::OutOfFuel => ErrorGuidance::new(
            ErrorType::OutOfFuel,
            &[
                "The instruction budget ran out before the program finished",
                "Look for unbounded loops, or raise fuel_budget (see fuel_analysis for a recommendation)",
            ],
            &[WASI_DOC],
        ),
        TrapKind::MemoryExceeded => ErrorGuidance::new(
            ErrorType::MemoryExceeded,
            &[
                "Linear memory would have grown past the memory limit",
                "Reduce the size of in-memory data or raise memory_bytes",
            ],
            &[WASI_DOC],
        ),
        TrapKind::Timeout => ErrorGuidance::new(
            ErrorType::Timeout,
            &[
                "The wall-clock timeout fired before the instruction budget ran out",
                "The program may be blocked reading input; provide stdin or remove the read",
            ],
            &[WASI_DOC],
        ),
        TrapKind::Other => {
            let mut guidance = ErrorGuidance::new(
                ErrorType::VmFault,
                &["The interpreter hit a fatal VM fault"],
                &[WASI_DOC],
            );
            if message.contains("call stack exhausted") {
                guidance.error_type = ErrorType::RecursionLimit;
                guidance
                    .actionable_guidance
                    .push("The native call stack overflowed; reduce recursion depth".to_string());
            }
            guidance
        }
    }
}

/// Longest prefix of `text` no longer than `limit` bytes, on a char boundary.
fn bounded_prefix(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_takes_priority() {
        let guidance = classify_error(
            Some(TrapKind::OutOfFuel),
            Some("all fuel consumed"),
            "Traceback ... ModuleNotFoundError: No module named 'x'",
        )
        .unwrap();
        assert_eq!(guidance.error_type, ErrorType::OutOfFuel);
        assert!(!guidance.actionable_guidance.is_empty());
    }

    #[test]
    fn test_missing_module() {
        let stderr = "Traceback (most recent call last):\n  File \"/app/user_code.py\", line 1\nModuleNotFoundError: No module named 'pandas'\n";
        let guidance = classify_error(None, None, stderr).unwrap();
        assert_eq!(guidance.error_type, ErrorType::MissingModule);
    }

    #[test]
    fn test_tuple_unpacking() {
        let stderr = "ValueError: too many values to unpack (expected 2)";
        assert_eq!(
            classify_error(None, None, stderr).unwrap().error_type,
            ErrorType::TupleUnpacking
        );
    }

    #[test]
    fn test_read_only_mount_write() {
        let stderr = "OSError: [Errno 58] Read-only file system: '/data/out.txt'";
        assert_eq!(
            classify_error(None, None, stderr).unwrap().error_type,
            ErrorType::PermissionDenied
        );
    }

    #[test]
    fn test_js_require() {
        let stderr = "ReferenceError: 'require' is not defined\n    at <eval> (/app/user_code.js:1)";
        assert_eq!(
            classify_error(None, None, stderr).unwrap().error_type,
            ErrorType::UnsupportedModule
        );
    }

    #[test]
    fn test_scan_is_bounded() {
        let mut stderr = "x".repeat(STDERR_SCAN_LIMIT);
        stderr.push_str("ModuleNotFoundError");
        assert!(classify_error(None, None, &stderr).is_none());
    }

    #[test]
    fn test_unknown_stderr() {
        assert!(classify_error(None, None, "").is_none());
        assert!(classify_error(None, None, "something odd happened").is_none());
    }

    #[test]
    fn test_stack_exhaustion_trap() {
        let guidance = classify_error(
            Some(TrapKind::Other),
            Some("wasm trap: call stack exhausted"),
            "",
        )
        .unwrap();
        assert_eq!(guidance.error_type, ErrorType::RecursionLimit);
    }

    #[test]
    fn test_bounded_prefix_char_boundary() {
        assert_eq!(bounded_prefix("héllo", 2), "h");
        assert_eq!(bounded_prefix("abc", 10), "abc");
    }
}
