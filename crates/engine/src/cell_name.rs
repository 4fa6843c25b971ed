//! Cell names: one or more uppercase letters followed by one or more digits.
//!
//! Names are case-insensitive on input. Every public entry point normalises
//! to uppercase through [`CellName::parse`] before touching any map, so the
//! cell map, the dependency graph and the selection table only ever see the
//! canonical spelling.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A validated, uppercase cell name such as `A1` or `AB12`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CellName(String);

impl CellName {
    /// Uppercase and validate a raw cell name.
    ///
    /// Returns `None` unless the uppercased input matches `^[A-Z]+[0-9]+$`.
    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_ascii_uppercase();
        if is_valid_name(&upper) {
            Some(Self(upper))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Check an already-uppercased name against `^[A-Z]+[0-9]+$`.
pub fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let letters = bytes.iter().take_while(|b| b.is_ascii_uppercase()).count();
    if letters == 0 || letters == bytes.len() {
        return false;
    }
    bytes[letters..].iter().all(|b| b.is_ascii_digit())
}

impl fmt::Display for CellName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CellName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for CellName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CellName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CellName::parse(&value).ok_or_else(|| format!("invalid cell name: {value}"))
    }
}

impl From<CellName> for String {
    fn from(name: CellName) -> Self {
        name.0
    }
}
