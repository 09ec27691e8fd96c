use std::ffi::OsStr;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use log::{debug, warn};

/// True when a member path cannot escape the extraction directory:
/// relative, no root or prefix component, and no `..` segment at all.
pub fn path_is_safe(path: &Path) -> bool {
    if path.is_absolute() {
        return false;
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// Lazy, single pass filter over tar members that drops entries with
/// unsafe paths. Skips are logged and never fatal, the original
/// member order is preserved.
pub struct SecureEntries<'a, R: 'a + Read> {
    inner: tar::Entries<'a, R>,
}

pub fn secure_entries<'a, R: Read>(entries: tar::Entries<'a, R>) -> SecureEntries<'a, R> {
    SecureEntries { inner: entries }
}

impl<'a, R: Read> Iterator for SecureEntries<'a, R> {
    type Item = std::io::Result<tar::Entry<'a, R>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };

            match entry.path() {
                Ok(path) if path_is_safe(&path) => {}
                Ok(path) => {
                    warn!("found issue with file {:?}", path);
                    continue;
                }
                Err(e) => {
                    warn!("found issue with member path: {}", e);
                    continue;
                }
            }

            return Some(Ok(entry));
        }
    }
}

/// Ordered exclusion patterns, first match wins.
///
/// Matching follows shell glob rules over whole path segments: a
/// relative pattern is compared against the trailing pattern-length
/// segments of the candidate path (so `*.txt` excludes any file with
/// that suffix at any depth, and `data/*` excludes direct children of
/// any `data` directory), while a pattern with a leading `/` must
/// match the whole path. `*` never crosses a separator.
pub struct ExcludeFilter {
    rules: Vec<Rule>,
}

struct Rule {
    pattern: String,
    glob: GlobMatcher,
    segments: usize,
    anchored: bool,
}

impl ExcludeFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, globset::Error> {
        let mut rules = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()?
                .compile_matcher();

            rules.push(Rule {
                pattern: pattern.to_string(),
                glob,
                segments: pattern
                    .trim_start_matches('/')
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .count(),
                anchored: pattern.starts_with('/'),
            });
        }
        Ok(ExcludeFilter { rules })
    }

    /// A filter that excludes nothing.
    pub fn empty() -> Self {
        ExcludeFilter { rules: Vec::new() }
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        for rule in &self.rules {
            if rule.matches(path) {
                debug!("ignoring {:?} because of {}", path, rule.pattern);
                return true;
            }
        }
        false
    }
}

impl Rule {
    fn matches(&self, path: &Path) -> bool {
        if self.anchored {
            return self.glob.is_match(path);
        }
        if self.segments == 0 {
            return false;
        }

        // Right-anchored: compare against the trailing pattern-length
        // segments only
        let segments: Vec<&OsStr> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(x) => Some(x),
                _ => None,
            })
            .collect();
        if segments.len() < self.segments {
            return false;
        }

        let mut tail = PathBuf::new();
        for segment in &segments[segments.len() - self.segments..] {
            tail.push(segment);
        }
        self.glob.is_match(&tail)
    }
}

#[cfg(test)]
mod test_secure_path {
    use super::*;

    #[test]
    fn safe_paths() {
        for name in ["test.txt", "data/xy.blob", "bla/blu/ble", "./test.txt"] {
            assert!(path_is_safe(Path::new(name)), "{name} should be safe");
        }
    }

    #[test]
    fn absolute_paths_rejected() {
        for name in ["/test.txt", "/bla/blu/ble", "/"] {
            assert!(!path_is_safe(Path::new(name)), "{name} should be unsafe");
        }
    }

    #[test]
    fn parent_traversal_rejected() {
        for name in [
            "data/../../xy.blob",
            "../xy.blob",
            "..",
            // Any `..` segment is rejected, even one that would not
            // actually escape
            "data/../xy.blob",
        ] {
            assert!(!path_is_safe(Path::new(name)), "{name} should be unsafe");
        }
    }
}
