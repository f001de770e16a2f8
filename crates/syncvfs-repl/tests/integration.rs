//! Integration tests for the syncvfs REPL.
//!
//! These tests run scripts through the REPL and verify behavior.

use std::sync::Arc;

use syncvfs_kernel::{LocalStore, MemorySymlinkMap, Vfs, VfsOptions};
use syncvfs_repl::Repl;

/// Run each line through `repl`, collecting outputs and errors.
fn run_lines(repl: &mut Repl, script: &str) -> Vec<String> {
    let mut outputs = Vec::new();

    for line in script.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match repl.process_line(line) {
            Ok(Some(output)) => outputs.push(output),
            Ok(None) => {}
            Err(e) => outputs.push(format!("ERROR: {}", e)),
        }
    }

    outputs
}

fn run_script(script: &str) -> Vec<String> {
    let mut repl = Repl::new().expect("Failed to create REPL");
    run_lines(&mut repl, script)
}

fn outputs_contain(outputs: &[String], expected: &[&str]) -> bool {
    let joined = outputs.join("\n");
    expected.iter().all(|e| joined.contains(e))
}

// ============================================================================
// Files
// ============================================================================

#[test]
fn write_then_cat() {
    let outputs = run_script(
        r#"
        write notes/today.txt hello world
        cat notes/today.txt
    "#,
    );
    assert_eq!(outputs, vec!["hello world\n".to_string()]);
}

#[test]
fn append_extends_file() {
    let outputs = run_script(
        r#"
        write log.txt one
        append log.txt two
        cat log.txt
        stat log.txt
    "#,
    );
    assert_eq!(outputs[0], "one\ntwo\n");
    assert!(outputs[1].contains("file, 8 bytes"), "got {:?}", outputs);
}

#[test]
fn write_replaces_content() {
    let outputs = run_script(
        r#"
        write f.txt a much longer line
        write f.txt short
        cat f.txt
    "#,
    );
    assert_eq!(outputs, vec!["short\n".to_string()]);
}

#[test]
fn truncate_and_touch() {
    let outputs = run_script(
        r#"
        touch empty.txt
        stat empty.txt
        write t.txt 0123456789
        truncate t.txt 4
        cat t.txt
    "#,
    );
    assert!(outputs[0].contains("0 bytes"));
    assert_eq!(outputs[1], "0123");
}

#[test]
fn cat_missing_file_is_error() {
    let outputs = run_script("cat nope.txt");
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].starts_with("ERROR: not found"), "got {:?}", outputs);
}

// ============================================================================
// Directories
// ============================================================================

#[test]
fn ls_marks_kinds() {
    let outputs = run_script(
        r#"
        mkdir dir
        touch file
        ln -s file link
        ls
    "#,
    );
    assert_eq!(outputs, vec!["dir/\nfile\nlink@".to_string()]);
}

#[test]
fn mkdir_parents_and_cd() {
    let outputs = run_script(
        r#"
        mkdir -p a/b/c
        mkdir -p a/b/c
        cd a/b
        pwd
        ls
        cd ..
        pwd
        cd
        pwd
    "#,
    );
    assert_eq!(outputs, vec!["/a/b", "c/", "/a", "/"]);
}

#[test]
fn mkdir_without_parent_fails() {
    let outputs = run_script("mkdir x/y");
    assert!(outputs_contain(&outputs, &["ERROR: not found"]));
}

#[test]
fn rmdir_removes_tree() {
    let outputs = run_script(
        r#"
        mkdir -p d/e
        touch d/e/f
        ln -s /d/e/f d/link
        rmdir d
        ls
        /status
        rm d
    "#,
    );
    assert!(outputs[0].contains("symlinks: 0"), "got {:?}", outputs);
    assert!(outputs[1].starts_with("ERROR: not found"));
}

#[test]
fn cd_into_file_fails() {
    let outputs = run_script(
        r#"
        touch f
        cd f
        pwd
    "#,
    );
    assert!(outputs[0].contains("not a directory"));
    assert_eq!(outputs[1], "/");
}

// ============================================================================
// Namespace
// ============================================================================

#[test]
fn symlink_read_through() {
    let outputs = run_script(
        r#"
        mkdir real
        write real/data.txt payload
        ln -s /real alias
        cat alias/data.txt
        readlink alias
        stat alias
        stat -L alias
    "#,
    );
    assert_eq!(outputs[0], "payload\n");
    assert_eq!(outputs[1], "/real");
    assert_eq!(outputs[2], "alias: symlink -> /real");
    assert_eq!(outputs[3], "alias: directory");
}

#[test]
fn mv_renames_file() {
    let outputs = run_script(
        r#"
        write old.txt content
        mv old.txt new.txt
        ls
        cat new.txt
    "#,
    );
    assert_eq!(outputs, vec!["new.txt".to_string(), "content\n".to_string()]);
}

#[test]
fn hard_link_unsupported() {
    let outputs = run_script(
        r#"
        touch a
        ln a b
    "#,
    );
    assert!(outputs_contain(&outputs, &["ERROR: unsupported"]));
}

// ============================================================================
// Meta and persistence
// ============================================================================

#[test]
fn meta_commands() {
    let mut repl = Repl::new().expect("Failed to create REPL");
    let outputs = run_lines(
        &mut repl,
        r#"
        /help
        /status
        frobnicate
        /quit
    "#,
    );
    assert!(outputs_contain(&outputs, &["Commands:", "cached handles: 0", "Unknown command: frobnicate"]));
    assert!(repl.is_done());
}

#[test]
fn sync_reports_background_work() {
    let outputs = run_script(
        r#"
        touch f
        ln -s f l
        sync
        /status
    "#,
    );
    assert!(outputs[0].ends_with("background task(s) flushed"));
    assert!(outputs[1].contains("background pending: 0"));
}

#[test]
fn local_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let open = || Repl::with_vfs(open_local(dir.path()));

    let mut first = open();
    run_lines(
        &mut first,
        r#"
        mkdir docs
        write docs/readme.md kept
    "#,
    );
    drop(first);

    let mut second = open();
    let outputs = run_lines(&mut second, "cat docs/readme.md");
    assert_eq!(outputs, vec!["kept\n".to_string()]);
}

/// A VFS over a host directory, with symlinks kept in memory.
fn open_local(root: &std::path::Path) -> Vfs {
    Vfs::new(
        Arc::new(LocalStore::new(root)),
        Arc::new(MemorySymlinkMap::new()),
        VfsOptions::default(),
    )
    .unwrap()
}
