//! Script providers.
//!
//! Creation, clean-up and migration scripts are looked up by relative path
//! (`create.sql`, `migrations/3.sql`) through a [`ScriptSource`]. The
//! filesystem-backed [`DirSource`] is what the CLI uses; [`MemorySource`]
//! serves scripts compiled into the binary and test fixtures.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

/// Byte-stream provider keyed by path.
pub trait ScriptSource: Send + Sync {
    /// Open the script at `path`.
    fn read_script(&self, path: &str) -> io::Result<Box<dyn Read + Send>>;

    /// List the entry names directly under `prefix`.
    fn list_entries(&self, prefix: &str) -> io::Result<Vec<String>>;
}

/// Join a directory prefix and an entry name with `/`.
pub fn join_path(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Scripts read from a directory on disk.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    /// Create a source rooted at `root`.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// The directory scripts are resolved against.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ScriptSource for DirSource {
    fn read_script(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        let file = File::open(self.root.join(path))?;
        Ok(Box::new(file))
    }

    fn list_entries(&self, prefix: &str) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.root.join(prefix))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }
}

/// Scripts held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    scripts: BTreeMap<String, Vec<u8>>,
}

impl MemorySource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a script at `path`.
    #[must_use]
    pub fn with_script(mut self, path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.insert(path, body);
        self
    }

    /// Add or replace a script at `path`.
    pub fn insert(&mut self, path: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.scripts.insert(path.into(), body.into());
    }
}

impl ScriptSource for MemorySource {
    fn read_script(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        match self.scripts.get(path) {
            Some(body) => Ok(Box::new(Cursor::new(body.clone()))),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no script at {path}"),
            )),
        }
    }

    fn list_entries(&self, prefix: &str) -> io::Result<Vec<String>> {
        let dir = join_path(prefix, "");
        Ok(self
            .scripts
            .keys()
            .filter_map(|path| path.strip_prefix(&dir))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }
}
