//! WAT guest modules shared by unit tests

use std::path::{Path, PathBuf};

/// Loops forever
pub const SPIN: &str = r#"(module
    (memory (export "memory") 1)
    (func (export "_start") (loop $l (br $l))))"#;

/// Grows memory 1 MiB at a time until growth fails
pub const GROW: &str = r#"(module
    (memory (export "memory") 1)
    (func (export "_start")
        (loop $l
            (br_if $l (i32.ne (memory.grow (i32.const 16)) (i32.const -1))))))"#;

fn escape(text: &str) -> String {
    text.bytes().map(|b| format!("\\{:02x}", b)).collect()
}

/// Writes `text` to stdout then exits with `code`.
pub fn print_and_exit(text: &str, code: i32) -> String {
    format!(
        r#"(module
            (import "wasi_snapshot_preview1" "fd_write"
                (func $fd_write (param i32 i32 i32 i32) (result i32)))
            (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
            (memory (export "memory") 1)
            (data (i32.const 64) "{escaped}")
            (func (export "_start")
                (i32.store (i32.const 0) (i32.const 64))
                (i32.store (i32.const 4) (i32.const {len}))
                (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))
                (call $proc_exit (i32.const {code}))))"#,
        escaped = escape(text),
        len = text.len(),
    )
}

/// Writes `text` to `fd` in one `fd_write` and exits with its errno.
pub fn write_reporting_errno(fd: u32, text: &str) -> String {
    format!(
        r#"(module
            (import "wasi_snapshot_preview1" "fd_write"
                (func $fd_write (param i32 i32 i32 i32) (result i32)))
            (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
            (memory (export "memory") 1)
            (data (i32.const 64) "{escaped}")
            (func (export "_start")
                (i32.store (i32.const 0) (i32.const 64))
                (i32.store (i32.const 4) (i32.const {len}))
                (call $proc_exit
                    (call $fd_write (i32.const {fd}) (i32.const 0) (i32.const 1) (i32.const 8)))))"#,
        escaped = escape(text),
        len = text.len(),
    )
}

/// Creates `name` (write access, `O_CREAT`) relative to preopen `fd`,
/// writes `done\n` to stdout and exits with the `path_open` errno.
///
/// Preopens are numbered from 3 in mount order: the primary mount is 3,
/// the data mount 4.
pub fn create_file(fd: u32, name: &str) -> String {
    format!(
        r#"(module
            (import "wasi_snapshot_preview1" "path_open"
                (func $path_open (param i32 i32 i32 i32 i32 i64 i64 i32 i32) (result i32)))
            (import "wasi_snapshot_preview1" "fd_write"
                (func $fd_write (param i32 i32 i32 i32) (result i32)))
            (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
            (memory (export "memory") 1)
            (data (i32.const 64) "{escaped}")
            (data (i32.const 512) "done\0a")
            (func (export "_start")
                (local $errno i32)
                (local.set $errno
                    (call $path_open (i32.const {fd}) (i32.const 0) (i32.const 64) (i32.const {len})
                        (i32.const 1) (i64.const 64) (i64.const 0) (i32.const 0) (i32.const 16)))
                (i32.store (i32.const 0) (i32.const 512))
                (i32.store (i32.const 4) (i32.const 5))
                (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))
                (call $proc_exit (local.get $errno))))"#,
        escaped = escape(name),
        len = name.len(),
    )
}

/// Write a WAT guest to `dir/name` and return its path
pub fn write_guest(dir: &Path, name: &str, wat: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, wat).unwrap();
    path
}
