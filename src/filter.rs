//! Class filtering: which classes get instrumented
//!
//! The filter is a pure predicate over slash-qualified class names. A
//! block-list keeps the platform, build tooling, and test frameworks out of
//! the trace; a short allow-list punches through it for the engine's own
//! self-test namespace. On top of that sits the configured scope: a package
//! prefix, or a source directory the class's source file must live under.

use std::path::{Path, PathBuf};

/// The one extension recognized when none are configured
pub const DEFAULT_SOURCE_EXTENSION: &str = "java";

/// Namespaces that are never instrumented
const BLOCKLIST: &[&str] = &[
    "com/intellij/",
    "com/sun/",
    "java/",
    "javax/",
    "jdk/",
    "junit/",
    "org/apache/maven/",
    "org/graalvm/",
    "org/groovy/",
    "org/hamcrest/",
    "org/intellij/",
    "org/jetbrains/",
    "org/junit/",
    "revivir/",
    "scala/",
    "sun/",
];

/// Namespaces that override the block-list
const ALLOWLIST: &[&str] = &["revivir/selftest/"];

/// Whether a class name falls in a blocked namespace
///
/// The allow-list wins over the block-list so the engine's own self-test
/// classes can be traced.
pub fn is_blocked_namespace(class_name: &str) -> bool {
    for prefix in ALLOWLIST {
        if class_name.starts_with(prefix) {
            return false;
        }
    }
    for prefix in BLOCKLIST {
        if class_name.starts_with(prefix) {
            return true;
        }
    }
    false
}

/// Instrumentation scope
///
/// When both a package and a directory are configured upstream, the package
/// wins; the config layer reports that as a warning and never constructs the
/// directory variant.
#[derive(Debug, Clone, Default)]
pub enum Scope {
    /// No scope: everything not blocked is instrumented
    #[default]
    Unscoped,
    /// Slash-form package prefix
    Package(String),
    /// Classes whose source file exists under `root` with one of the allowed
    /// extensions
    Directory {
        root: PathBuf,
        extensions: Vec<String>,
    },
}

/// Decides which classes the rewriter touches
#[derive(Debug, Clone, Default)]
pub struct ClassFilter {
    scope: Scope,
}

impl ClassFilter {
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }

    /// Filter that instruments everything not blocked
    pub fn unscoped() -> Self {
        Self {
            scope: Scope::Unscoped,
        }
    }

    /// Should this class be rewritten?
    ///
    /// `None` or an empty name (lambda-like constructs surface without a
    /// name) resolves to `false` rather than raising.
    pub fn should_instrument(&self, class_name: Option<&str>) -> bool {
        let name = match class_name {
            Some(n) if !n.is_empty() => n,
            _ => return false,
        };

        if is_blocked_namespace(name) {
            return false;
        }

        match &self.scope {
            Scope::Unscoped => true,
            Scope::Package(pkg) => name.starts_with(pkg.as_str()),
            Scope::Directory { root, extensions } => source_exists(root, name, extensions),
        }
    }

    /// Is a call target in scope for invocation-line tracking?
    ///
    /// With a package scope the owner must match the prefix; otherwise
    /// anything outside the blocked namespaces counts.
    pub fn in_scope_owner(&self, owner: &str) -> bool {
        match &self.scope {
            Scope::Package(pkg) => owner.starts_with(pkg.as_str()),
            _ => !is_blocked_namespace(owner),
        }
    }

    /// The configured package prefix, if the scope is a package
    pub fn package(&self) -> Option<&str> {
        match &self.scope {
            Scope::Package(pkg) => Some(pkg),
            _ => None,
        }
    }
}

/// Check that the class's source file exists under the scope directory
///
/// Nested classes share their outer class's source, so everything after the
/// first `$` is stripped before the lookup. Some compilers emit class names
/// that themselves end in `$`; stripping still yields the outer name.
fn source_exists(root: &Path, class_name: &str, extensions: &[String]) -> bool {
    let outer = match class_name.find('$') {
        Some(idx) => &class_name[..idx],
        None => class_name,
    };

    extensions
        .iter()
        .any(|ext| root.join(format!("{outer}.{ext}")).exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unscoped_filter_instruments_plain_classes() {
        let filter = ClassFilter::unscoped();
        assert!(filter.should_instrument(Some("demo/Fib")));
        assert!(filter.should_instrument(Some("a/b/c/Deep")));
    }

    #[test]
    fn test_missing_or_empty_name_is_skipped() {
        let filter = ClassFilter::unscoped();
        assert!(!filter.should_instrument(None));
        assert!(!filter.should_instrument(Some("")));
    }

    #[test]
    fn test_blocklist_namespaces_are_skipped() {
        let filter = ClassFilter::unscoped();
        assert!(!filter.should_instrument(Some("java/lang/String")));
        assert!(!filter.should_instrument(Some("jdk/internal/misc/Unsafe")));
        assert!(!filter.should_instrument(Some("org/junit/Assert")));
        assert!(!filter.should_instrument(Some("revivir/core/Recorder")));
        assert!(!filter.should_instrument(Some("scala/Predef")));
    }

    #[test]
    fn test_allowlist_overrides_blocklist() {
        let filter = ClassFilter::unscoped();
        assert!(filter.should_instrument(Some("revivir/selftest/Fixture")));
        assert!(!filter.should_instrument(Some("revivir/core/Recorder")));
        assert!(is_blocked_namespace("revivir/core/Recorder"));
        assert!(!is_blocked_namespace("revivir/selftest/Fixture"));
    }

    #[test]
    fn test_package_scope_restricts_to_prefix() {
        let filter = ClassFilter::new(Scope::Package("demo/".to_string()));
        assert!(filter.should_instrument(Some("demo/Fib")));
        assert!(filter.should_instrument(Some("demo/sub/Other")));
        assert!(!filter.should_instrument(Some("elsewhere/Fib")));
    }

    #[test]
    fn test_package_scope_owner_check() {
        let filter = ClassFilter::new(Scope::Package("demo/".to_string()));
        assert!(filter.in_scope_owner("demo/Fib"));
        assert!(!filter.in_scope_owner("other/Thing"));
    }

    #[test]
    fn test_unscoped_owner_check_uses_blocklist() {
        let filter = ClassFilter::unscoped();
        assert!(filter.in_scope_owner("demo/Fib"));
        assert!(!filter.in_scope_owner("java/lang/StringBuilder"));
    }

    #[test]
    fn test_directory_scope_checks_source_existence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("demo")).unwrap();
        std::fs::write(dir.path().join("demo/Fib.java"), "").unwrap();

        let filter = ClassFilter::new(Scope::Directory {
            root: dir.path().to_path_buf(),
            extensions: vec![DEFAULT_SOURCE_EXTENSION.to_string()],
        });
        assert!(filter.should_instrument(Some("demo/Fib")));
        assert!(!filter.should_instrument(Some("demo/Missing")));
    }

    #[test]
    fn test_directory_scope_strips_nested_class_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("demo")).unwrap();
        std::fs::write(dir.path().join("demo/Outer.java"), "").unwrap();

        let filter = ClassFilter::new(Scope::Directory {
            root: dir.path().to_path_buf(),
            extensions: vec![DEFAULT_SOURCE_EXTENSION.to_string()],
        });
        assert!(filter.should_instrument(Some("demo/Outer$Inner")));
        assert!(filter.should_instrument(Some("demo/Outer$")));
    }

    #[test]
    fn test_directory_scope_extra_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Script.kt"), "").unwrap();

        let filter = ClassFilter::new(Scope::Directory {
            root: dir.path().to_path_buf(),
            extensions: vec!["java".to_string(), "kt".to_string()],
        });
        assert!(filter.should_instrument(Some("Script")));
    }

    #[test]
    fn test_filter_clone() {
        let filter = ClassFilter::new(Scope::Package("demo/".to_string()));
        let cloned = filter.clone();
        assert!(cloned.should_instrument(Some("demo/Fib")));
        assert!(!cloned.should_instrument(Some("other/Fib")));
    }
}
