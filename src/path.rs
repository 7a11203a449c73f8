//! Hierarchical logical-service identifiers.
//!
//! Generalizes the teacher's single-`String`-newtype `Path` into an actual element
//! sequence: `NameTree` prefix matching and DTab rewrite rules need to compare
//! individual path components, not opaque substrings.

use std::fmt;
use std::rc::Rc;

pub mod parser;

pub use self::parser::{parse, ParseError};

/// An immutable sequence of path components, e.g. `/s/svc/foo` is
/// `["s", "svc", "foo"]`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct Path(Rc<Vec<Rc<str>>>);

impl Path {
    /// The empty path, `/`.
    pub fn empty() -> Path {
        Path(Rc::new(Vec::new()))
    }

    pub fn new(elems: Vec<Rc<str>>) -> Path {
        Path(Rc::new(elems))
    }

    pub fn elems(&self) -> &[Rc<str>] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if `self` is `other` or a strict descendant of it.
    pub fn starts_with(&self, other: &Path) -> bool {
        if other.0.len() > self.0.len() {
            return false;
        }
        self.0[..other.0.len()] == other.0[..]
    }

    /// Appends `suffix`'s elements onto `self`, producing a new path.
    pub fn concat(&self, suffix: &Path) -> Path {
        let mut elems = Vec::with_capacity(self.0.len() + suffix.0.len());
        elems.extend(self.0.iter().cloned());
        elems.extend(suffix.0.iter().cloned());
        Path::new(elems)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for e in self.0.iter() {
            f.write_str("/")?;
            f.write_str(e)?;
        }
        Ok(())
    }
}

impl<'a> From<&'a str> for Path {
    /// Parses a slash-delimited path. Panics on invalid input; use [`parse`] for a
    /// fallible conversion at process boundaries.
    fn from(s: &'a str) -> Path {
        parser::parse(s).unwrap_or_else(|e| panic!("invalid path {:?}: {}", s, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips() {
        let p = Path::from("/s/svc/foo");
        assert_eq!(p.to_string(), "/s/svc/foo");
    }

    #[test]
    fn empty_path_displays_as_slash() {
        assert_eq!(Path::empty().to_string(), "/");
    }

    #[test]
    fn starts_with_is_component_wise() {
        let p = Path::from("/s/svc/foobar");
        let pfx = Path::from("/s/svc/foo");
        // "/s/svc/foobar" does not start with "/s/svc/foo" as a *path*, even though
        // it does as a string.
        assert!(!p.starts_with(&pfx));
        assert!(p.starts_with(&Path::from("/s/svc")));
        assert!(p.starts_with(&p));
    }

    #[test]
    fn concat_appends_elements() {
        let a = Path::from("/s");
        let b = Path::from("/svc/foo");
        assert_eq!(a.concat(&b).to_string(), "/s/svc/foo");
    }
}
