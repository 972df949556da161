use std::fmt;

/// A single URI or header parameter, preserving insertion order in the
/// containing `Vec<Param>` (spec.md §3 — URI params are a "mapping").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub value: Option<String>,
}

impl Param {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Param {
            name: name.into(),
            value,
        }
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Param {
            name: name.into(),
            value: None,
        }
    }

    pub fn transport(value: impl Into<String>) -> Self {
        Param::new("transport", Some(value.into()))
    }

    /// `lr` marks a loose router per RFC 3261 §19.1.1 (spec.md GLOSSARY).
    pub fn is_lr(&self) -> bool {
        self.name.eq_ignore_ascii_case("lr")
    }

    pub fn name_eq(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Look up a parameter by name (case-insensitive) in an ordered param list.
pub fn find_param<'a>(params: &'a [Param], name: &str) -> Option<&'a Param> {
    params.iter().find(|p| p.name_eq(name))
}
