use derive_more::Deref;
use serde::{Deserialize, Serialize};
use std::fmt;

///
/// Wire descriptors
///
/// Types and members travel as resolvable descriptors, never as live
/// handles. The reverse translator resolves them against the active
/// `TypeResolver`.
///

///
/// InstanceId
///
/// Identity key for parameters and label targets. Two wire nodes with the
/// same id denote the same logical binding; the translators allocate ids
/// sequentially per pass and resolve them through arenas.
///

#[derive(
    Clone, Copy, Debug, Default, Deref, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize,
    Deserialize,
)]
pub struct InstanceId(u32);

impl InstanceId {
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

///
/// TypeName
///
/// Path plus generic arguments, e.g. `people::Person` or
/// `Vec<people::Person>`.
///

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TypeName {
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<TypeName>,
}

impl TypeName {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn generic(path: impl Into<String>, args: Vec<Self>) -> Self {
        Self {
            path: path.into(),
            args,
        }
    }

    /// Last path segment.
    #[must_use]
    pub fn short(&self) -> &str {
        self.path.rsplit("::").next().unwrap_or(&self.path)
    }

    #[must_use]
    pub const fn is_generic(&self) -> bool {
        !self.args.is_empty()
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        if !self.args.is_empty() {
            write!(f, "<")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{arg}")?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}

impl From<&str> for TypeName {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

///
/// MemberRef
///

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MemberRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declaring: Option<TypeName>,
    pub name: String,
}

impl MemberRef {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            declaring: None,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn on(declaring: TypeName, name: impl Into<String>) -> Self {
        Self {
            declaring: Some(declaring),
            name: name.into(),
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.declaring {
            Some(ty) => write!(f, "{ty}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

///
/// MethodDesc
///
/// By-name method descriptor for peers that do not speak the operator
/// catalog natively. Resolution maps it onto a catalog operator or fails.
///

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MethodDesc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declaring: Option<TypeName>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<TypeName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<TypeName>,
}

impl MethodDesc {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            declaring: None,
            name: name.into(),
            params: Vec::new(),
            returns: None,
        }
    }
}

impl fmt::Display for MethodDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ty) = &self.declaring {
            write!(f, "{ty}.")?;
        }
        write!(f, "{}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ")")
    }
}

///
/// CtorDesc
///

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CtorDesc {
    pub declaring: TypeName,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<TypeName>,
}

impl CtorDesc {
    #[must_use]
    pub fn new(declaring: TypeName) -> Self {
        Self {
            declaring,
            params: Vec::new(),
        }
    }
}

impl fmt::Display for CtorDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::new/{}", self.declaring, self.params.len())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_name_short_takes_last_segment() {
        assert_eq!(TypeName::new("crate::people::Person").short(), "Person");
        assert_eq!(TypeName::new("Person").short(), "Person");
    }

    #[test]
    fn type_name_displays_generics() {
        let ty = TypeName::generic("Vec", vec![TypeName::new("people::Person")]);
        assert_eq!(ty.to_string(), "Vec<people::Person>");
        assert!(ty.is_generic());
    }

    #[test]
    fn descriptors_display_for_error_text() {
        let m = MethodDesc {
            declaring: Some(TypeName::new("str")),
            name: "starts_with".into(),
            params: vec![TypeName::new("str")],
            returns: None,
        };
        assert_eq!(m.to_string(), "str.starts_with(str)");
    }
}
