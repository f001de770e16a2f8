//! syncvfs REPL: an interactive shell over a [`Vfs`].
//!
//! Each line is one command operating on the virtual filesystem:
//!
//! - Files: `cat`, `write`, `append`, `touch`, `truncate`, `rm`
//! - Directories: `ls`, `mkdir`, `rmdir`, `cd`, `pwd`
//! - Namespace: `mv`, `ln -s`, `readlink`, `stat`
//! - Background work: `sync`
//! - Meta-commands: `/help`, `/quit`, `/status`

use anyhow::{Context, Result, bail};
use rustyline::Editor;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;

use syncvfs_kernel::{EntryKind, NamespaceEntry, OpenFlags, Vfs, paths};

/// Bytes requested per read when printing a file.
const CAT_CHUNK: usize = 64 * 1024;

/// REPL state.
pub struct Repl {
    vfs: Vfs,
    done: bool,
}

impl Repl {
    /// A REPL over a fresh in-memory filesystem.
    pub fn new() -> Result<Self> {
        Ok(Self::with_vfs(Vfs::in_memory()?))
    }

    pub fn with_vfs(vfs: Vfs) -> Self {
        Self { vfs, done: false }
    }

    pub fn vfs(&mut self) -> &mut Vfs {
        &mut self.vfs
    }

    /// Whether `/quit` has been entered.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn prompt(&self) -> String {
        format!("syncvfs:{}> ", self.vfs.working_directory())
    }

    /// Process a single line of input.
    pub fn process_line(&mut self, line: &str) -> Result<Option<String>> {
        let trimmed = line.trim();

        if trimmed.starts_with('/') {
            return self.handle_meta_command(trimmed);
        }
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }

        let (command, rest) = split_word(trimmed);
        match command {
            "ls" => self.ls(rest),
            "cat" => self.cat(one_arg("cat", rest)?),
            "write" => {
                let (path, text) = split_word(rest);
                self.write(path, text, false)
            }
            "append" => {
                let (path, text) = split_word(rest);
                self.write(path, text, true)
            }
            "touch" => {
                self.vfs.open(one_arg("touch", rest)?, OpenFlags::create_file())?;
                Ok(None)
            }
            "truncate" => {
                let (path, len) = two_args("truncate", rest)?;
                let len: u64 = len.parse().context("truncate: length must be a number")?;
                let fd = self.vfs.open(path, OpenFlags::read_write())?;
                self.vfs.set_size(&fd, len)?;
                Ok(None)
            }
            "mkdir" => self.mkdir(rest),
            "rmdir" => {
                self.vfs.remove_directory_at(None, one_arg("rmdir", rest)?)?;
                Ok(None)
            }
            "rm" => {
                self.vfs.unlink_file_at(None, one_arg("rm", rest)?)?;
                Ok(None)
            }
            "mv" => {
                let (from, to) = two_args("mv", rest)?;
                self.vfs.rename_at(None, from, None, to)?;
                Ok(None)
            }
            "ln" => {
                let args: Vec<&str> = rest.split_whitespace().collect();
                match args.as_slice() {
                    ["-s", target, link] => {
                        self.vfs.symlink_at(None, target, link)?;
                        Ok(None)
                    }
                    [from, to] => {
                        self.vfs.link_at(None, from, None, to)?;
                        Ok(None)
                    }
                    _ => bail!("usage: ln -s TARGET LINK"),
                }
            }
            "readlink" => Ok(Some(self.vfs.readlink_at(None, one_arg("readlink", rest)?)?)),
            "stat" => self.stat(rest),
            "cd" => {
                let target = if rest.is_empty() { "/" } else { one_arg("cd", rest)? };
                self.vfs.set_working_directory(target)?;
                Ok(None)
            }
            "pwd" => Ok(Some(self.vfs.working_directory().to_string())),
            "sync" => {
                let pending = self.vfs.background_pending();
                self.vfs.wait_for_background();
                Ok(Some(format!("{} background task(s) flushed", pending)))
            }
            _ => Ok(Some(format!(
                "Unknown command: {}\nType /help for available commands.",
                command
            ))),
        }
    }

    fn ls(&mut self, rest: &str) -> Result<Option<String>> {
        let path = if rest.is_empty() { "." } else { one_arg("ls", rest)? };
        let lines: Vec<String> = self
            .vfs
            .read_directory_at(None, path)?
            .map(|entry| match entry.kind {
                EntryKind::Directory => format!("{}/", entry.name),
                EntryKind::SymbolicLink => format!("{}@", entry.name),
                EntryKind::RegularFile => entry.name,
            })
            .collect();
        if lines.is_empty() {
            Ok(None)
        } else {
            Ok(Some(lines.join("\n")))
        }
    }

    fn cat(&mut self, path: &str) -> Result<Option<String>> {
        let mut fd = self.vfs.open(path, OpenFlags::default())?;
        let mut content = Vec::new();
        loop {
            let (chunk, eof) = self.vfs.read_stream(&mut fd, CAT_CHUNK)?;
            content.extend_from_slice(&chunk);
            if eof || chunk.is_empty() {
                break;
            }
        }
        Ok(Some(String::from_utf8_lossy(&content).into_owned()))
    }

    fn write(&mut self, path: &str, text: &str, append: bool) -> Result<Option<String>> {
        if path.is_empty() {
            bail!("usage: write PATH TEXT");
        }
        let flags = if append {
            OpenFlags::create_file().append(true)
        } else {
            OpenFlags::create_file().truncate(true)
        };
        let mut fd = self.vfs.open(path, flags)?;
        let mut data = text.as_bytes().to_vec();
        data.push(b'\n');
        self.vfs.write_stream(&mut fd, &data)?;
        Ok(None)
    }

    fn mkdir(&mut self, rest: &str) -> Result<Option<String>> {
        match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["-p", path] => {
                self.vfs
                    .open(path, OpenFlags::directory_only().create(true))
                    .map(|_| ())
                    .or_else(|e| match self.vfs.stat_at(None, path, true) {
                        Ok(NamespaceEntry::Directory) => Ok(()),
                        _ => Err(e),
                    })?;
            }
            [path] => self.vfs.create_directory_at(None, path)?,
            _ => bail!("usage: mkdir [-p] PATH"),
        }
        Ok(None)
    }

    fn stat(&mut self, rest: &str) -> Result<Option<String>> {
        let (follow, path) = match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["-L", path] => (true, *path),
            [path] => (false, *path),
            _ => bail!("usage: stat [-L] PATH"),
        };
        let line = match self.vfs.stat_at(None, path, follow)? {
            NamespaceEntry::Directory => format!("{}: directory", path),
            NamespaceEntry::File { size, mtime_millis } => {
                format!("{}: file, {} bytes, mtime {}ms", path, size, mtime_millis)
            }
            NamespaceEntry::Symlink { target } => format!("{}: symlink -> {}", path, target),
        };
        Ok(Some(line))
    }

    fn handle_meta_command(&mut self, cmd: &str) -> Result<Option<String>> {
        let command = cmd.split_whitespace().next().unwrap_or("");

        match command {
            "/quit" | "/q" | "/exit" => {
                self.done = true;
                Ok(None)
            }
            "/help" | "/h" | "/?" => Ok(Some(HELP_TEXT.to_string())),
            "/status" => Ok(Some(format!(
                "cwd: {}\ncold path: {:?}\ncached handles: {}\nsymlinks: {}\nbackground pending: {}",
                self.vfs.working_directory(),
                self.vfs.cold_path(),
                self.vfs.cached_handles(),
                self.vfs.symlink_count(),
                self.vfs.background_pending(),
            ))),
            _ => Ok(Some(format!(
                "Unknown command: {}\nType /help for available commands.",
                command
            ))),
        }
    }
}

/// First word and the remainder with leading whitespace removed.
fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim_start()),
        None => (s, ""),
    }
}

fn one_arg<'a>(command: &str, rest: &'a str) -> Result<&'a str> {
    match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
        [arg] => Ok(*arg),
        _ => bail!("usage: {} PATH", command),
    }
}

fn two_args<'a>(command: &str, rest: &'a str) -> Result<(&'a str, &'a str)> {
    match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
        [a, b] => Ok((*a, *b)),
        _ => bail!("usage: {} A B", command),
    }
}

const HELP_TEXT: &str = r#"syncvfs: interactive virtual filesystem

Commands:
  ls [PATH]             List a directory (dir/, link@)
  cat PATH              Print a file
  write PATH TEXT       Replace a file's content with TEXT
  append PATH TEXT      Append TEXT to a file
  touch PATH            Create an empty file (and parents)
  truncate PATH LEN     Resize a file
  mkdir [-p] PATH       Create a directory
  rmdir PATH            Remove an empty directory
  rm PATH               Remove a file or symlink
  mv FROM TO            Rename a file, directory or symlink
  ln -s TARGET LINK     Create a symbolic link
  readlink PATH         Print a symlink's target
  stat [-L] PATH        Describe an entry (-L follows symlinks)
  cd [PATH]             Change the working directory
  pwd                   Print the working directory
  sync                  Wait for background writes to finish

Meta:
  /help                 Show this help
  /status               Show cache and background state
  /quit                 Exit"#;

/// Run the interactive loop until `/quit` or end of input.
pub fn run(vfs: Vfs) -> Result<()> {
    println!("syncvfs v{}", env!("CARGO_PKG_VERSION"));
    println!("Type /help for commands, /quit to exit.\n");

    let mut rl: Editor<(), DefaultHistory> = Editor::new().context("Failed to create editor")?;

    let history_path = paths::data_dir().join("history.txt");
    let _ = rl.load_history(&history_path);

    let mut repl = Repl::with_vfs(vfs);

    while !repl.is_done() {
        match rl.readline(&repl.prompt()) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());

                match repl.process_line(&line) {
                    Ok(Some(output)) => println!("{}", output),
                    Ok(None) => {}
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {}", err);
                break;
            }
        }
    }

    repl.vfs().wait_for_background();

    if let Some(parent) = history_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = rl.save_history(&history_path);

    Ok(())
}
