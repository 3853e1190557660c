use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Display;

use serde::Serialize;

/// One element of a [`QueryKey`].
///
/// Integers of every width are widened into a single variant so that `5u64` and `5i32` produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum KeyPart {
    Str(String),
    Int(i128),
    Bool(bool),
    Params(BTreeMap<String, KeyPart>),
}

impl Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Params(params) => {
                f.write_str("{")?;
                for (idx, (name, value)) in params.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name:?}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for KeyPart {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<BTreeMap<String, KeyPart>> for KeyPart {
    fn from(params: BTreeMap<String, KeyPart>) -> Self {
        Self::Params(params)
    }
}

macro_rules! int_key_part {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for KeyPart {
                fn from(i: $ty) -> Self {
                    Self::Int(i as i128)
                }
            }
        )*
    };
}

int_key_part!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

/// Identifies a single cached query result.
///
/// A key is an ordered list of parts, usually a resource name followed by an optional identifier and an optional
/// parameter map: `["posts"]`, `["posts", 7]`, `["posts", {"category_id": 5}]`. Two keys are equal iff their parts
/// are structurally equal, in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<KeyPart>);

impl QueryKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a new key with `part` appended. The receiver is left untouched.
    pub fn with(&self, part: impl Into<KeyPart>) -> Self {
        let mut parts = self.0.clone();
        parts.push(part.into());
        Self(parts)
    }

    /// Appends a parameter map built from `(name, value)` pairs. Pairs with a `None` value are skipped so that an
    /// absent filter and a missing filter produce the same key.
    pub fn with_params<I, K, P>(&self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<P>)>,
        K: Into<String>,
        P: Into<KeyPart>,
    {
        let params = params
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name.into(), v.into())))
            .collect::<BTreeMap<_, _>>();
        self.with(KeyPart::Params(params))
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, part) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{part}")?;
        }
        f.write_str("]")
    }
}

impl From<Vec<KeyPart>> for QueryKey {
    fn from(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }
}

/// Selects cache entries for invalidation or removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFilter {
    /// Only the entry whose key equals this one.
    Exact(QueryKey),
    /// Every entry whose key starts with these parts, regardless of what follows.
    Prefix(QueryKey),
}

impl KeyFilter {
    pub fn exact(key: QueryKey) -> Self {
        Self::Exact(key)
    }

    pub fn prefix(key: QueryKey) -> Self {
        Self::Prefix(key)
    }

    pub fn key(&self) -> &QueryKey {
        match self {
            Self::Exact(key) | Self::Prefix(key) => key,
        }
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            Self::Exact(k) => k == key,
            Self::Prefix(prefix) => key.starts_with(prefix),
        }
    }
}

impl Display for KeyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(key) => write!(f, "exact {key}"),
            Self::Prefix(key) => write!(f, "prefix {key}"),
        }
    }
}
