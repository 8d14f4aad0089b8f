//! Test case identity and categories.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// File extension of toolchain test sources.
pub const SOURCE_EXTENSION: &str = "c";

/// Separator used when flattening a source path into a [`TestId`].
const ID_SEPARATOR: &str = "__";

/// Stable identity of a test, derived from its suite-relative source path.
///
/// The id doubles as the artifact namespace for the test, so two sources that share a file stem in different
/// directories (`tests/ptr.c`, `examples/ptr.c`) still get distinct ids. Distinct paths always map to distinct ids:
/// underscores that could be mistaken for the separator are escaped as `%5F`, and `%` itself as `%25`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestId(String);

impl TestId {
    /// Derive the id for a suite-relative source path.
    ///
    /// ## Examples
    /// ```rust
    /// use rct_core::TestId;
    /// use std::path::Path;
    /// assert_eq!(TestId::from_source(Path::new("tests/memory/ptr.c")).as_str(), "tests__memory__ptr");
    /// assert_eq!(TestId::from_source(Path::new("hello.c")).as_str(), "hello");
    /// assert_eq!(TestId::from_source(Path::new("tests/test_add.c")).as_str(), "tests__test_add");
    /// assert_eq!(TestId::from_source(Path::new("tests/x__y.c")).as_str(), "tests__x%5F%5Fy");
    /// ```
    pub fn from_source(path: &Path) -> Self {
        let components: Vec<Component<'_>> = path.components().collect();
        let last = components.len().saturating_sub(1);
        let mut parts = Vec::with_capacity(components.len());

        for (index, component) in components.iter().enumerate() {
            let part = match component {
                Component::Prefix(prefix) => escape_component(&prefix.as_os_str().to_string_lossy()),
                Component::RootDir => "%2F".to_string(),
                Component::CurDir => continue,
                Component::ParentDir => "..".to_string(),
                Component::Normal(part) => {
                    let part = part.to_string_lossy();
                    if index != last {
                        escape_component(&part)
                    } else {
                        match part.strip_suffix(".c").filter(|stem| !stem.is_empty()) {
                            Some(stem) => escape_component(stem),
                            // Marks a file without the source extension so `a` and `a.c` stay apart.
                            None => format!("{}%", escape_component(&part)),
                        }
                    }
                }
            };
            parts.push(part);
        }

        if parts.is_empty() {
            TestId("unnamed".to_string())
        } else {
            TestId(parts.join(ID_SEPARATOR))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Escape one path component so it never contains the separator and never starts or ends with `_`.
///
/// Lone interior underscores are kept as-is; `test_add` stays readable.
fn escape_component(part: &str) -> String {
    let chars: Vec<char> = part.chars().collect();
    let mut out = String::with_capacity(part.len());
    for (index, &ch) in chars.iter().enumerate() {
        match ch {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '\\' => out.push_str("%5C"),
            '_' => {
                let interior = index > 0 && index + 1 < chars.len();
                let lone = chars.get(index.wrapping_sub(1)) != Some(&'_') && chars.get(index + 1) != Some(&'_');
                if interior && lone {
                    out.push('_');
                } else {
                    out.push_str("%5F");
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip any leading directories and the source extension from a user-supplied test name.
///
/// `tests/test_add.c`, `test_add.c` and `test_add` all resolve to `test_add`.
pub fn bare_name(name: &str) -> &str {
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
    file.strip_suffix(".c").unwrap_or(file)
}

/// Whether a test is expected to pass or is tracked as a known failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Regular,
    /// Expected to fail compilation (or compile only with a provenance warning).
    KnownFailure,
}

/// Report grouping, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Group {
    WithoutRuntime,
    WithRuntime,
    KnownFailures,
}

impl Group {
    pub fn title(&self) -> &'static str {
        match self {
            Group::WithoutRuntime => "Tests without runtime (crt0 only)",
            Group::WithRuntime => "Tests with runtime (crt0 + libruntime)",
            Group::KnownFailures => "Known failure tests",
        }
    }
}

/// A single test definition. Read-only for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub id: TestId,
    /// Bare name (file stem) used for lookup and display.
    pub name: String,
    /// Source path, relative to the suite root.
    pub source: PathBuf,
    /// Golden program output. Never consulted for known failures.
    pub expected: Option<String>,
    /// Link against the full runtime library rather than crt0 alone.
    pub uses_runtime: bool,
    pub category: Category,
    pub description: Option<String>,
}

impl TestCase {
    pub fn regular(source: impl Into<PathBuf>, expected: Option<String>, uses_runtime: bool) -> Self {
        Self::new(source.into(), expected, uses_runtime, Category::Regular)
    }

    /// Known failures always link against the full runtime.
    pub fn known_failure(source: impl Into<PathBuf>) -> Self {
        Self::new(source.into(), None, true, Category::KnownFailure)
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    fn new(source: PathBuf, expected: Option<String>, uses_runtime: bool, category: Category) -> Self {
        let name = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            id: TestId::from_source(&source),
            name,
            source,
            expected,
            uses_runtime,
            category,
            description: None,
        }
    }

    pub fn group(&self) -> Group {
        match (self.category, self.uses_runtime) {
            (Category::KnownFailure, _) => Group::KnownFailures,
            (Category::Regular, false) => Group::WithoutRuntime,
            (Category::Regular, true) => Group::WithRuntime,
        }
    }

    pub fn is_known_failure(&self) -> bool {
        self.category == Category::KnownFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_from_nested_source() {
        let id = TestId::from_source(Path::new("tests/memory/structs/nested.c"));
        assert_eq!(id.as_str(), "tests__memory__structs__nested");
    }

    #[test]
    fn test_id_distinguishes_same_stem_in_different_dirs() {
        let a = TestId::from_source(Path::new("tests/ptr.c"));
        let b = TestId::from_source(Path::new("examples/ptr.c"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_keeps_parent_and_root_components_distinct() {
        let id = TestId::from_source(Path::new("/abs/../tests/x.c"));
        assert_eq!(id.as_str(), "%2F__abs__..__tests__x");
        assert_ne!(id, TestId::from_source(Path::new("abs/tests/x.c")));
        assert_eq!(TestId::from_source(Path::new("./tests/x.c")).as_str(), "tests__x");
    }

    #[test]
    fn test_id_separator_inside_file_name_does_not_collide() {
        let nested = TestId::from_source(Path::new("tests/x/y.c"));
        let flat = TestId::from_source(Path::new("tests/x__y.c"));
        assert_eq!(nested.as_str(), "tests__x__y");
        assert_ne!(nested, flat);
    }

    #[test]
    fn test_id_edge_underscores_do_not_collide() {
        let paths = [
            "a_/b.c", "a/_b.c", "a__b.c", "a/b.c", "a_b.c", "_a.c", "a_.c", "a%5F.c", "a%.c", "a.c", "a", "a.h.c", "a.h",
        ];
        let ids: std::collections::HashSet<TestId> = paths.iter().map(|p| TestId::from_source(Path::new(p))).collect();
        assert_eq!(ids.len(), paths.len());
        assert_eq!(TestId::from_source(Path::new("tests/test_add.c")).as_str(), "tests__test_add");
    }

    #[test]
    fn test_bare_name_strips_path_and_extension() {
        assert_eq!(bare_name("tests/test_add.c"), "test_add");
        assert_eq!(bare_name("test_add.c"), "test_add");
        assert_eq!(bare_name("test_add"), "test_add");
        assert_eq!(bare_name("c-test\\tests\\win.c"), "win");
    }

    #[test]
    fn test_regular_case_fields() {
        let case = TestCase::regular("tests/hello.c", Some("Hello\n".to_string()), true);
        assert_eq!(case.name, "hello");
        assert_eq!(case.id.as_str(), "tests__hello");
        assert_eq!(case.category, Category::Regular);
        assert_eq!(case.group(), Group::WithRuntime);
    }

    #[test]
    fn test_known_failure_links_runtime_and_has_no_expected() {
        let case = TestCase::known_failure("tests-known-failures/vla.c");
        assert!(case.uses_runtime);
        assert!(case.expected.is_none());
        assert_eq!(case.group(), Group::KnownFailures);
    }

    #[test]
    fn test_group_ordering_matches_report_order() {
        assert!(Group::WithoutRuntime < Group::WithRuntime);
        assert!(Group::WithRuntime < Group::KnownFailures);
    }
}
