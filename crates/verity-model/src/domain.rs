use std::fmt;

use serde::{Deserialize, Serialize};

/// Runtime type category a dynamically-typed value may belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    Integer,
    Real,
    Complex,
    Bytes,
    Text,
    Container,
    Absent,
}

impl TypeTag {
    pub const ALL: [TypeTag; 7] = [
        TypeTag::Integer,
        TypeTag::Real,
        TypeTag::Complex,
        TypeTag::Bytes,
        TypeTag::Text,
        TypeTag::Container,
        TypeTag::Absent,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TypeTag::Integer => "integer",
            TypeTag::Real => "real",
            TypeTag::Complex => "complex",
            TypeTag::Bytes => "bytes",
            TypeTag::Text => "text",
            TypeTag::Container => "container",
            TypeTag::Absent => "absent",
        }
    }

    fn bit(&self) -> u8 {
        1 << (*self as u8)
    }

    /// Tags matched by a type name used in `isinstance` checks.
    pub fn for_type_name(name: &str) -> Option<TypeTag> {
        match name {
            "int" | "bool" => Some(TypeTag::Integer),
            "float" => Some(TypeTag::Real),
            "complex" => Some(TypeTag::Complex),
            "bytes" => Some(TypeTag::Bytes),
            "str" => Some(TypeTag::Text),
            "list" | "tuple" | "dict" => Some(TypeTag::Container),
            _ => None,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A union of type tags, kept as a bit set in `TypeTag::ALL` order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeDomain(u8);

impl TypeDomain {
    pub fn empty() -> Self {
        TypeDomain(0)
    }

    pub fn all() -> Self {
        TypeTag::ALL.iter().copied().collect()
    }

    pub fn only(tag: TypeTag) -> Self {
        TypeDomain(tag.bit())
    }

    pub fn contains(&self, tag: TypeTag) -> bool {
        self.0 & tag.bit() != 0
    }

    pub fn insert(&mut self, tag: TypeTag) {
        self.0 |= tag.bit();
    }

    pub fn intersect(&self, other: &TypeDomain) -> TypeDomain {
        TypeDomain(self.0 & other.0)
    }

    pub fn union(&self, other: &TypeDomain) -> TypeDomain {
        TypeDomain(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = TypeTag> + '_ {
        TypeTag::ALL.iter().copied().filter(move |t| self.contains(*t))
    }
}

impl FromIterator<TypeTag> for TypeDomain {
    fn from_iter<I: IntoIterator<Item = TypeTag>>(iter: I) -> Self {
        let mut domain = TypeDomain::empty();
        for tag in iter {
            domain.insert(tag);
        }
        domain
    }
}

impl fmt::Debug for TypeDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for TypeDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|t| t.name()).collect();
        write!(f, "{}", names.join("|"))
    }
}

impl Serialize for TypeDomain {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let tags: Vec<TypeTag> = self.iter().collect();
        tags.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TypeDomain {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tags = Vec::<TypeTag>::deserialize(deserializer)?;
        Ok(tags.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_domain_holds_every_tag() {
        let d = TypeDomain::all();
        assert_eq!(d.len(), 7);
        for tag in TypeTag::ALL {
            assert!(d.contains(tag));
        }
    }

    #[test]
    fn intersection_narrows() {
        let a: TypeDomain = [TypeTag::Integer, TypeTag::Text].into_iter().collect();
        let b: TypeDomain = [TypeTag::Text, TypeTag::Bytes].into_iter().collect();
        let both = a.intersect(&b);
        assert_eq!(both, TypeDomain::only(TypeTag::Text));
        assert!(a.intersect(&TypeDomain::only(TypeTag::Absent)).is_empty());
    }

    #[test]
    fn iteration_follows_declaration_order() {
        let d: TypeDomain = [TypeTag::Absent, TypeTag::Integer].into_iter().collect();
        let tags: Vec<TypeTag> = d.iter().collect();
        assert_eq!(tags, vec![TypeTag::Integer, TypeTag::Absent]);
        assert_eq!(d.to_string(), "integer|absent");
    }
}
