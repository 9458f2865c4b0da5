use std::collections::HashMap;
use std::convert::TryFrom;
use std::str::FromStr;

use getset::{CopyGetters, Getters};
use indexmap::IndexMap;

use crate::error::{BcfError, Result};
use crate::types::{FieldType, Number};

/// Position of a declaration within its registry.
///
/// Assigned once on declaration and stable for the registry's lifetime, so records
/// can keep their decoded values in a dense table instead of a map keyed by id.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct FieldIndex(pub(crate) usize);

impl FieldIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

/// An `##INFO` or `##FORMAT` declaration.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct TypeDeclaration {
    #[getset(get = "pub")]
    id: String,
    #[getset(get_copy = "pub")]
    number: Number,
    #[getset(get_copy = "pub")]
    kind: FieldType,
    #[getset(get = "pub")]
    description: String,
    // Source, Version and anything else besides IDX, in order of appearance
    #[getset(get = "pub")]
    additional: Vec<(String, String)>,
}

impl TypeDeclaration {
    pub fn new(id: &str, number: Number, kind: FieldType, description: &str) -> Result<Self> {
        let declaration = TypeDeclaration {
            id: id.to_owned(),
            number,
            kind,
            description: description.to_owned(),
            additional: Vec::new(),
        };
        declaration.validate()?;
        Ok(declaration)
    }

    /// Build a declaration from `ID`, `Number`, `Type` and `Description` keys.
    ///
    /// Other keys are kept and rendered back; `IDX` is dropped since dictionary
    /// keys belong to the header.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut id = None;
        let mut number = None;
        let mut kind = None;
        let mut description = None;
        let mut additional = Vec::new();
        for (key, value) in pairs {
            let value = value.as_ref();
            match key.as_ref() {
                "ID" => id = Some(value.to_owned()),
                "Number" => number = Some(Number::from_str(value)?),
                "Type" => {
                    kind = Some(FieldType::from_str(value).map_err(|_| {
                        BcfError::InvalidDeclaration(format!("unknown Type `{}`", value))
                    })?)
                }
                "Description" => description = Some(value.to_owned()),
                "IDX" => {}
                other => additional.push((other.to_owned(), value.to_owned())),
            }
        }
        let missing = |key: &str| BcfError::InvalidDeclaration(format!("{} is mandatory", key));
        let declaration = TypeDeclaration {
            id: id.ok_or_else(|| missing("ID"))?,
            number: number.ok_or_else(|| missing("Number"))?,
            kind: kind.ok_or_else(|| missing("Type"))?,
            description: description.ok_or_else(|| missing("Description"))?,
            additional,
        };
        declaration.validate()?;
        Ok(declaration)
    }

    fn validate(&self) -> Result<()> {
        let forbidden = |c: char| c == ',' || c == '>' || c.is_whitespace();
        if self.id.is_empty() || self.id.contains(forbidden) {
            return Err(BcfError::InvalidDeclaration(format!(
                "invalid ID `{}`",
                self.id
            )));
        }
        match (self.kind, self.number) {
            (FieldType::Flag, Number::Count(0)) => Ok(()),
            (FieldType::Flag, number) => Err(BcfError::InvalidDeclaration(format!(
                "Flag `{}` must have Number=0, not {}",
                self.id, number
            ))),
            (_, Number::Count(0)) => Err(BcfError::InvalidDeclaration(format!(
                "Number=0 is reserved for flags (`{}`)",
                self.id
            ))),
            _ => Ok(()),
        }
    }

    /// Equality on `ID`, `Number`, `Type` and `Description`.
    pub fn same_definition(&self, other: &TypeDeclaration) -> bool {
        self.id == other.id
            && self.number == other.number
            && self.kind == other.kind
            && self.description == other.description
    }
}

impl<'a> TryFrom<Vec<(&'a str, &'a str)>> for TypeDeclaration {
    type Error = BcfError;

    fn try_from(data: Vec<(&'a str, &'a str)>) -> Result<Self> {
        Self::from_pairs(data)
    }
}

impl TryFrom<&HashMap<String, String>> for TypeDeclaration {
    type Error = BcfError;

    fn try_from(data: &HashMap<String, String>) -> Result<Self> {
        Self::from_pairs(data)
    }
}

/// Append-only table of declarations for one namespace (INFO or FORMAT).
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    declarations: IndexMap<String, TypeDeclaration>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `declaration`, returning its new index.
    ///
    /// Fails with `DuplicateId` whenever the id exists; callers decide whether an
    /// identical re-declaration is a no-op.
    pub fn declare(&mut self, declaration: TypeDeclaration) -> Result<FieldIndex> {
        if self.declarations.contains_key(declaration.id()) {
            return Err(BcfError::DuplicateId(declaration.id));
        }
        let (idx, _) = self
            .declarations
            .insert_full(declaration.id.clone(), declaration);
        Ok(FieldIndex(idx))
    }

    pub fn lookup(&self, id: &str) -> Option<(FieldIndex, &TypeDeclaration)> {
        self.declarations
            .get_full(id)
            .map(|(idx, _, declaration)| (FieldIndex(idx), declaration))
    }

    pub fn get(&self, idx: FieldIndex) -> Option<&TypeDeclaration> {
        self.declarations.get_index(idx.0).map(|(_, d)| d)
    }

    /// All declarations in declaration order.
    pub fn all(&self) -> impl Iterator<Item = (&str, &TypeDeclaration)> {
        self.declarations.iter().map(|(id, d)| (id.as_str(), d))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.declarations.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn decl(id: &str, number: &str, kind: &str) -> TypeDeclaration {
        TypeDeclaration::try_from(vec![
            ("ID", id),
            ("Number", number),
            ("Type", kind),
            ("Description", "test"),
        ])
        .unwrap()
    }

    #[test]
    fn test_declare_assigns_indices_in_order() {
        let mut registry = TypeRegistry::new();
        assert_eq!(registry.declare(decl("DP", "1", "Integer")).unwrap().get(), 0);
        assert_eq!(registry.declare(decl("AF", "A", "Float")).unwrap().get(), 1);
        assert_eq!(registry.declare(decl("DB", "0", "Flag")).unwrap().get(), 2);

        let ids: Vec<_> = registry.all().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["DP", "AF", "DB"]);

        let (idx, d) = registry.lookup("AF").unwrap();
        assert_eq!(idx, FieldIndex(1));
        assert_eq!(d.number(), Number::AlternateAlleles);
        assert!(registry.lookup("NOPE").is_none());
    }

    #[test]
    fn test_duplicate_id() {
        let mut registry = TypeRegistry::new();
        registry.declare(decl("DP", "1", "Integer")).unwrap();
        assert!(matches!(
            registry.declare(decl("DP", "1", "Integer")),
            Err(BcfError::DuplicateId(id)) if id == "DP"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_declaration_validation() {
        let flag_with_count = TypeDeclaration::try_from(vec![
            ("ID", "X"),
            ("Number", "1"),
            ("Type", "Flag"),
            ("Description", ""),
        ]);
        assert!(matches!(flag_with_count, Err(BcfError::InvalidDeclaration(_))));

        let zero_count_integer =
            TypeDeclaration::new("X", Number::Count(0), FieldType::Integer, "");
        assert!(zero_count_integer.is_err());

        let missing_type =
            TypeDeclaration::try_from(vec![("ID", "X"), ("Number", "1"), ("Description", "")]);
        assert!(matches!(missing_type, Err(BcfError::InvalidDeclaration(_))));

        let unknown_type = TypeDeclaration::try_from(vec![
            ("ID", "X"),
            ("Number", "1"),
            ("Type", "Double"),
            ("Description", ""),
        ]);
        assert!(unknown_type.is_err());
    }

    #[test]
    fn test_additional_keys_kept_idx_dropped() {
        let d = TypeDeclaration::try_from(vec![
            ("ID", "AC"),
            ("Number", "A"),
            ("Type", "Integer"),
            ("Description", "count"),
            ("Source", "tool"),
            ("IDX", "4"),
        ])
        .unwrap();
        assert_eq!(d.additional(), &vec![("Source".to_owned(), "tool".to_owned())]);
        assert!(d.same_definition(&decl("AC", "A", "Integer").clone_with("count")));
    }

    impl TypeDeclaration {
        fn clone_with(mut self, description: &str) -> Self {
            self.description = description.to_owned();
            self
        }
    }
}
