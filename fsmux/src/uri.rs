//! Resource identifiers: `scheme://authority/path`.
//!
//! Paths are normalized on construction (duplicate separators, `.` and `..`
//! segments and trailing separators are folded away), so two resources are
//! equal exactly when scheme, authority and normalized path agree.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceParseError {
    #[error("missing scheme in resource `{0}`")]
    MissingScheme(String),
    #[error("invalid scheme `{0}`")]
    InvalidScheme(String),
}

/// An immutable hierarchical address resolved by a provider registered for
/// its scheme.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Resource {
    scheme: String,
    authority: String,
    path: String,
}

impl Resource {
    pub fn new(
        scheme: impl Into<String>,
        authority: impl Into<String>,
        path: impl AsRef<str>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            authority: authority.into(),
            path: norm_path(path.as_ref()),
        }
    }

    /// Resource without authority, e.g. `mem:/a/b`.
    pub fn from_path(scheme: impl Into<String>, path: impl AsRef<str>) -> Self {
        Self::new(scheme, "", path)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_absolute(&self) -> bool {
        self.path.starts_with('/')
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Parent resource. The root is its own parent.
    pub fn dirname(&self) -> Resource {
        let (dir, _) = split_dir_file(&self.path);
        self.with_path(dir)
    }

    /// Last path segment; empty for the root.
    pub fn basename(&self) -> &str {
        split_dir_file(&self.path).1
    }

    pub fn join(&self, fragment: &str) -> Resource {
        let joined = if self.path.is_empty() {
            fragment.to_string()
        } else {
            format!("{}/{}", self.path, fragment)
        };
        self.with_path(joined)
    }

    pub fn with_path(&self, path: impl AsRef<str>) -> Resource {
        Resource {
            scheme: self.scheme.clone(),
            authority: self.authority.clone(),
            path: norm_path(path.as_ref()),
        }
    }

    /// Path of `other` relative to `self`, if `self` is `other` or one of its
    /// ancestors. An empty string means both address the same resource.
    pub fn relative(&self, other: &Resource) -> Option<String> {
        if self.scheme != other.scheme || self.authority != other.authority {
            return None;
        }
        if self.path == other.path {
            return Some(String::new());
        }
        let prefix = if self.path.ends_with('/') {
            self.path.clone()
        } else {
            format!("{}/", self.path)
        };
        other.path.strip_prefix(&prefix).map(str::to_string)
    }

    pub fn is_equal(&self, other: &Resource) -> bool {
        self.relative(other).is_some_and(|rel| rel.is_empty())
    }

    pub fn is_equal_or_parent(&self, other: &Resource) -> bool {
        self.relative(other).is_some()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_absolute() || !self.authority.is_empty() {
            write!(f, "{}://{}{}", self.scheme, self.authority, self.path)
        } else {
            write!(f, "{}:{}", self.scheme, self.path)
        }
    }
}

impl FromStr for Resource {
    type Err = ResourceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| ResourceParseError::MissingScheme(s.to_string()))?;
        if !valid_scheme(scheme) {
            return Err(ResourceParseError::InvalidScheme(scheme.to_string()));
        }
        match rest.strip_prefix("//") {
            Some(rest) => {
                let (authority, path) = match rest.find('/') {
                    Some(n) => (&rest[..n], &rest[n..]),
                    None => (rest, "/"),
                };
                Ok(Resource::new(scheme, authority, path))
            }
            None => Ok(Resource::new(scheme, "", rest)),
        }
    }
}

fn valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn norm_path(p: &str) -> String {
    let absolute = p.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for seg in p.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            _ => parts.push(seg),
        }
    }
    if absolute {
        format!("/{}", parts.join("/"))
    } else {
        parts.join("/")
    }
}

fn split_dir_file(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(n) => (&path[..n], &path[n + 1..]),
        None => ("", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let r: Resource = "mem://host/a//b/./c/".parse().unwrap();
        assert_eq!(r.scheme(), "mem");
        assert_eq!(r.authority(), "host");
        assert_eq!(r.path(), "/a/b/c");
        assert_eq!(r.to_string(), "mem://host/a/b/c");

        let r: Resource = "mem:/x/../y".parse().unwrap();
        assert_eq!(r.path(), "/y");
        assert_eq!(r.to_string(), "mem:///y");

        let rel: Resource = "mem:a/b".parse().unwrap();
        assert!(!rel.is_absolute());
        assert_eq!(rel.to_string(), "mem:a/b");

        assert!("no-scheme".parse::<Resource>().is_err());
        assert!("1x:/a".parse::<Resource>().is_err());
    }

    #[test]
    fn test_dirname_basename_join() {
        let r = Resource::from_path("mem", "/a/b/c.txt");
        assert_eq!(r.basename(), "c.txt");
        assert_eq!(r.dirname().path(), "/a/b");
        assert_eq!(r.dirname().dirname().dirname().path(), "/");

        let root = Resource::from_path("mem", "/");
        assert!(root.is_root());
        assert!(root.dirname().is_equal(&root));
        assert_eq!(root.basename(), "");
        assert_eq!(root.join("a").join("b").path(), "/a/b");
    }

    #[test]
    fn test_relative_and_equality() {
        let a = Resource::from_path("mem", "/a");
        let ab = Resource::from_path("mem", "/a/b");
        let abc = Resource::from_path("mem", "/abc");
        assert_eq!(a.relative(&ab).as_deref(), Some("b"));
        assert!(a.relative(&abc).is_none());
        assert!(a.is_equal_or_parent(&ab));
        assert!(!ab.is_equal_or_parent(&a));
        assert!(a.is_equal(&Resource::from_path("mem", "/a/")));
        assert!(!a.is_equal(&Resource::from_path("other", "/a")));
        assert!(Resource::from_path("mem", "/").is_equal_or_parent(&ab));
    }
}
