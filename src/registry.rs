//! Persisted test registry.
//!
//! The registry is a JSON document with two lists:
//!
//! ```json
//! {
//!   "tests": [{ "file": "tests/hello.c", "expected": "Hello\n", "use_runtime": true, "description": "..." }],
//!   "known_failures": [{ "file": "tests-known-failures/vla.c", "description": "..." }]
//! }
//! ```
//!
//! ## Notes
//!
//! - Runs use [`Registry::load`], which never fails: a missing or malformed file degrades to an empty registry with a
//!   warning.
//! - Mutations go through [`Registry::update`], which refuses to touch a malformed file so unrelated entries are
//!   never clobbered, and saves atomically.
//! - `file` paths are relative to the suite directory.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use miette::Diagnostic;
use rct_core::{TestCase, TestId, bare_name, case::SOURCE_EXTENSION};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SuiteLayout;

/// Errors raised while mutating the registry.
#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("failed to read registry {path}")]
    #[diagnostic(code(rct::registry::read))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry {path} is not valid JSON")]
    #[diagnostic(
        code(rct::registry::malformed),
        help("fix or remove the file before adding tests; it was left untouched")
    )]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write registry {path}")]
    #[diagnostic(code(rct::registry::write))]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode registry")]
    #[diagnostic(code(rct::registry::encode))]
    Encode(#[source] serde_json::Error),

    #[error("test '{0}' is not in the registry")]
    #[diagnostic(code(rct::registry::unknown_test), help("run `rct list --include-failures` to see registered tests"))]
    UnknownTest(String),

    #[error("source file {0} does not exist")]
    #[diagnostic(code(rct::registry::missing_source))]
    MissingSource(PathBuf),

    #[error("target file {0} already exists")]
    #[diagnostic(code(rct::registry::target_exists))]
    TargetExists(PathBuf),

    #[error("failed to rename {from} to {to}")]
    #[diagnostic(code(rct::registry::rename))]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A regular test as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestEntry {
    pub file: PathBuf,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default = "default_true")]
    pub use_runtime: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A known failure as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownFailureEntry {
    pub file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    tests: Vec<TestEntry>,
    #[serde(default)]
    known_failures: Vec<KnownFailureEntry>,
}

/// Whether an upsert created or changed an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Added,
    Updated,
}

/// How a requested test name resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Registered(TestCase),
    /// Found on disk in a search directory but not registered; runs with no expected output.
    Unregistered(TestCase),
    NotFound,
}

/// In-memory registry bound to its backing file.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
    document: RegistryDocument,
}

impl Registry {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: RegistryDocument::default(),
        }
    }

    /// Load for a run. Never fails; problems are logged and yield an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load_strict(&path) {
            Ok(registry) => registry,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "registry unusable, continuing with no tests");
                Self::empty(path)
            }
        }
    }

    /// Load for mutation. A missing file is an empty registry; an unreadable or malformed one is an error.
    pub fn load_strict(path: &Path) -> Result<Self, RegistryError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no registry file yet");
                return Ok(Self::empty(path));
            }
            Err(source) => {
                return Err(RegistryError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let document: RegistryDocument = serde_json::from_str(&text).map_err(|source| RegistryError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            document,
        })
    }

    /// Load strictly, apply `mutate`, and persist atomically.
    pub fn update<T>(
        path: &Path,
        mutate: impl FnOnce(&mut Registry) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let mut registry = Self::load_strict(path)?;
        let value = mutate(&mut registry)?;
        registry.save()?;
        Ok(value)
    }

    /// Write the whole registry to a temp file beside the target, then rename over it.
    pub fn save(&self) -> Result<(), RegistryError> {
        let mut json = serde_json::to_string_pretty(&self.document).map_err(RegistryError::Encode)?;
        json.push('\n');

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let write_err = |source: std::io::Error| RegistryError::Write {
            path: self.path.clone(),
            source,
        };

        fs::create_dir_all(&dir).map_err(write_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|err| write_err(err.error))?;
        tracing::debug!(path = %self.path.display(), "registry saved");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tests(&self) -> &[TestEntry] {
        &self.document.tests
    }

    pub fn known_failures(&self) -> &[KnownFailureEntry] {
        &self.document.known_failures
    }

    pub fn is_empty(&self) -> bool {
        self.document.tests.is_empty() && self.document.known_failures.is_empty()
    }

    /// Regular test cases, in registry order.
    ///
    /// Entries that resolve to an id already seen are dropped from the run with a warning. The persisted document keeps
    /// them.
    pub fn regular_cases(&self) -> Vec<TestCase> {
        let mut seen = HashSet::new();
        self.document
            .tests
            .iter()
            .map(|entry| {
                TestCase::regular(&entry.file, entry.expected.clone(), entry.use_runtime)
                    .with_description(entry.description.clone())
            })
            .filter(|case| self.first_sighting(&mut seen, &case.id, "duplicate test entry ignored"))
            .collect()
    }

    /// Known failures, in registry order. A path also registered as a regular test runs only as the regular test.
    pub fn known_failure_cases(&self) -> Vec<TestCase> {
        let mut seen: HashSet<TestId> = self.document.tests.iter().map(|e| TestId::from_source(&e.file)).collect();
        self.document
            .known_failures
            .iter()
            .map(|entry| TestCase::known_failure(&entry.file).with_description(entry.description.clone()))
            .filter(|case| self.first_sighting(&mut seen, &case.id, "duplicate known-failure entry ignored"))
            .collect()
    }

    fn first_sighting(&self, seen: &mut HashSet<TestId>, id: &TestId, warning: &str) -> bool {
        let fresh = seen.insert(id.clone());
        if !fresh {
            tracing::warn!(registry = %self.path.display(), %id, "{warning}");
        }
        fresh
    }

    /// Resolve a user-supplied name against the registered regular tests, then the suite's search directories.
    ///
    /// Known failures only run with the whole suite. Naming one finds its source in a search directory and runs it as an
    /// ad-hoc test.
    pub fn lookup(&self, name: &str, layout: &SuiteLayout) -> Lookup {
        let name = bare_name(name);

        if let Some(case) = self.regular_cases().into_iter().find(|c| c.name == name) {
            return Lookup::Registered(case);
        }

        let file_name = format!("{name}.{SOURCE_EXTENSION}");
        for dir in crate::config::SEARCH_DIRS {
            let relative = Path::new(dir).join(&file_name);
            if layout.source_path(&relative).is_file() {
                tracing::debug!(test = name, path = %relative.display(), "running unregistered test");
                let case = TestCase::regular(relative, None, true).with_description(Some("Ad-hoc test".to_string()));
                return Lookup::Unregistered(case);
            }
        }
        Lookup::NotFound
    }

    /// Add a regular test, or replace the expected output of the entry with the same path.
    ///
    /// Other entries are left untouched. A path currently listed as a known failure is promoted out of that list.
    pub fn upsert(
        &mut self,
        file: impl Into<PathBuf>,
        expected: Option<String>,
        use_runtime: bool,
        description: Option<String>,
    ) -> Upsert {
        let file = file.into();
        self.document.known_failures.retain(|entry| entry.file != file);

        if let Some(entry) = self.document.tests.iter_mut().find(|entry| entry.file == file) {
            entry.expected = expected;
            entry.use_runtime = use_runtime;
            if description.is_some() {
                entry.description = description;
            }
            return Upsert::Updated;
        }

        self.document.tests.push(TestEntry {
            file,
            expected,
            use_runtime,
            description,
        });
        Upsert::Added
    }

    /// Add a known failure, or refresh the description of an existing one.
    pub fn upsert_known_failure(&mut self, file: impl Into<PathBuf>, description: Option<String>) -> Upsert {
        let file = file.into();
        if let Some(entry) = self.document.known_failures.iter_mut().find(|entry| entry.file == file) {
            if description.is_some() {
                entry.description = description;
            }
            return Upsert::Updated;
        }
        self.document.known_failures.push(KnownFailureEntry { file, description });
        Upsert::Added
    }

    /// Rename a registered test: moves its source file and rewrites its `file` entry.
    ///
    /// Returns the old and new suite-relative paths.
    pub fn rename(
        &mut self,
        old_name: &str,
        new_name: &str,
        layout: &SuiteLayout,
    ) -> Result<(PathBuf, PathBuf), RegistryError> {
        let old_name = bare_name(old_name);
        let new_name = bare_name(new_name);
        let new_file_name = format!("{new_name}.{SOURCE_EXTENSION}");
        let matches = |file: &Path| file_stem(file) == old_name;

        let slot: &mut PathBuf = if let Some(entry) = self.document.tests.iter_mut().find(|e| matches(&e.file)) {
            &mut entry.file
        } else if let Some(entry) = self.document.known_failures.iter_mut().find(|e| matches(&e.file)) {
            &mut entry.file
        } else {
            return Err(RegistryError::UnknownTest(old_name.to_string()));
        };

        let old_relative = slot.clone();
        let new_relative = old_relative.with_file_name(&new_file_name);
        let old_path = layout.source_path(&old_relative);
        let new_path = layout.source_path(&new_relative);

        if !old_path.is_file() {
            return Err(RegistryError::MissingSource(old_path));
        }
        if new_path.exists() {
            return Err(RegistryError::TargetExists(new_path));
        }
        fs::rename(&old_path, &new_path).map_err(|source| RegistryError::Rename {
            from: old_path.clone(),
            to: new_path.clone(),
            source,
        })?;

        *slot = new_relative.clone();
        Ok((old_relative, new_relative))
    }

    /// [`Registry::rename`], then save. If the save fails the source file and the entry are moved back.
    pub fn rename_and_save(
        &mut self,
        old_name: &str,
        new_name: &str,
        layout: &SuiteLayout,
    ) -> Result<(PathBuf, PathBuf), RegistryError> {
        let (from, to) = self.rename(old_name, new_name, layout)?;
        let Err(err) = self.save() else {
            return Ok((from, to));
        };

        if let Err(undo) = fs::rename(layout.source_path(&to), layout.source_path(&from)) {
            tracing::warn!(from = %to.display(), to = %from.display(), error = %undo, "failed to restore renamed source");
        }
        for file in self
            .document
            .tests
            .iter_mut()
            .map(|e| &mut e.file)
            .chain(self.document.known_failures.iter_mut().map(|e| &mut e.file))
        {
            if *file == to {
                *file = from.clone();
            }
        }
        Err(err)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Where an `add` should file a test, given the path the user typed.
///
/// Bare file names land under `tests/`. Paths under a known-failure directory are known failures.
pub fn normalize_add_path(file: &Path) -> (PathBuf, bool) {
    let under_known_failures = file.components().any(|component| match component {
        Component::Normal(part) => {
            let part = part.to_string_lossy();
            part == "tests-known-failures" || part == "known-failures"
        }
        _ => false,
    });

    if file.is_absolute() || under_known_failures || file.starts_with("tests") || file.starts_with("examples") {
        return (file.to_path_buf(), under_known_failures);
    }

    let name = file.file_name().map(PathBuf::from).unwrap_or_else(|| file.to_path_buf());
    (Path::new("tests").join(name), false)
}

/// Turn the escape sequences users type on a shell (`\n`, `\t`, `\r`, `\\`) into the characters they denote.
pub fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
