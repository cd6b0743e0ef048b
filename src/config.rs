//! Engine configuration and activation-argument parsing
//!
//! Activation arguments arrive as one free-form `-`-delimited string, e.g.
//! `t-P=demo/-f kt groovy`. Recognized options:
//!
//! - `t` / `-traverse` — toggle object-graph traversal snapshots
//! - `p=DIR` / `-path=DIR` — directory scope (resolved to absolute)
//! - `P=PKG` / `-package=PKG` — package scope, wins over the directory
//! - `f ext1 ext2` — extra source extensions besides the default
//!
//! Malformed values are reported and the default is used; instrumentation
//! always proceeds with the effective configuration printed at startup.

use crate::filter::{ClassFilter, Scope, DEFAULT_SOURCE_EXTENSION};
use regex::Regex;
use std::path::{Path, PathBuf};

/// Default artifact directory, relative to the working directory
pub const DEFAULT_ARTIFACT_DIR: &str = ".revivir";

/// Effective engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Traverse object graphs of captured reference values
    pub traverse: bool,
    /// Package scope, slash form
    pub package: Option<String>,
    /// Directory scope, absolute
    pub source_dir: Option<PathBuf>,
    /// Source extensions recognized under a directory scope
    pub extensions: Vec<String>,
    /// Where trace artifacts are written
    pub artifact_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            traverse: false,
            package: None,
            source_dir: None,
            extensions: vec![DEFAULT_SOURCE_EXTENSION.to_string()],
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
        }
    }
}

impl EngineConfig {
    /// Parse a free-form activation string
    ///
    /// Unrecognized options are ignored; recognized options with malformed
    /// values fall back to the default with a warning. This mirrors the
    /// activation contract: configuration problems never stop the engine.
    pub fn from_activation_str(args: &str) -> Self {
        let mut config = Self::default();
        let ext_pattern = Regex::new(r"^f (\w+ ?)+$").unwrap();

        for arg in args.split('-') {
            let key = arg.split('=').next().unwrap_or("").trim();
            match key {
                "t" | "traverse" => config.traverse = !config.traverse,
                "p" | "path" => match option_value(arg) {
                    Some(value) => {
                        config.source_dir = Some(absolutize(Path::new(value.trim())));
                    }
                    None => report_malformed("p/--path", "expected p=DIR"),
                },
                "P" | "package" => match option_value(arg) {
                    Some(value) => config.package = Some(value.trim().to_string()),
                    None => report_malformed("P/--package", "expected P=PKG"),
                },
                _ if arg.starts_with('f') => {
                    if ext_pattern.is_match(arg.trim_end()) {
                        let extra = arg[1..].split_whitespace().map(str::to_string);
                        config.extensions.extend(extra);
                    } else {
                        report_malformed(
                            "f",
                            "expected a space-separated extension list with no leading periods",
                        );
                    }
                }
                _ => {}
            }
        }

        config
    }

    /// The scope the filter should enforce
    ///
    /// A configured package always wins; setting both is reported as
    /// redundant, not an error.
    pub fn scope(&self) -> Scope {
        match (&self.package, &self.source_dir) {
            (Some(pkg), dir) => {
                if dir.is_some() {
                    tracing::warn!(
                        "both a package and a path are configured; the path is ignored"
                    );
                }
                Scope::Package(pkg.clone())
            }
            (None, Some(dir)) => Scope::Directory {
                root: dir.clone(),
                extensions: self.extensions.clone(),
            },
            (None, None) => Scope::Unscoped,
        }
    }

    /// Build the class filter for this configuration
    pub fn filter(&self) -> ClassFilter {
        ClassFilter::new(self.scope())
    }

    /// Print the effective configuration at startup
    pub fn print_banner(&self) {
        println!("revivir started");
        println!("Object graph traversal: {}", self.traverse);
        println!(
            "Scope: {}",
            match (&self.package, &self.source_dir) {
                (Some(pkg), _) => format!("package {pkg}"),
                (None, Some(dir)) => format!("path {}", dir.display()),
                (None, None) => "default".to_string(),
            }
        );
        println!(
            "Source extensions: {}",
            if self.extensions.len() == 1 {
                "default".to_string()
            } else {
                self.extensions.join(" ")
            }
        );
        println!("Artifacts: {}", self.artifact_dir.display());
        println!("\n---------------------------------------\n");
    }
}

/// Extract the `=`-suffixed value of an option, `None` when missing/empty
fn option_value(arg: &str) -> Option<&str> {
    let idx = arg.find('=')?;
    let value = &arg[idx + 1..];
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Resolve a scope directory to an absolute path
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn report_malformed(option: &str, hint: &str) {
    tracing::warn!("malformed value for {option} ({hint}); using default settings instead");
    eprintln!("Malformed value for {option}: {hint}.\nUsing default settings instead.");
}
