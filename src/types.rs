use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use num_enum::TryFromPrimitive;
use strum::{Display, EnumString};

use crate::error::BcfError;
use crate::parser;

pub(crate) const BCF_MAGIC: &[u8; 3] = b"BCF";
pub(crate) const BCF_MAJOR_VERSION: u8 = 2;
pub(crate) const BCF_MINOR_VERSIONS: [u8; 2] = [1, 2];

pub(crate) const NAN_FLOAT: u32 = 0x7FC00000;
pub(crate) const MISSING_FLOAT: u32 = 0x7F800001;
pub(crate) const END_OF_VECTOR_FLOAT: u32 = 0x7F800002;

pub(crate) const MISSING_INT_8: i8 = i8::MIN;
pub(crate) const END_OF_VECTOR_INT_8: i8 = i8::MIN + 1;
pub(crate) const MISSING_INT_16: i16 = i16::MIN;
pub(crate) const END_OF_VECTOR_INT_16: i16 = i16::MIN + 1;
pub(crate) const END_OF_VECTOR_INT_32: i32 = i32::MIN + 1;

// the eight lowest values of each integer width are reserved
pub(crate) const MIN_INT_8: i32 = i8::MIN as i32 + 8;
pub(crate) const MIN_INT_16: i32 = i16::MIN as i32 + 8;
pub(crate) const MIN_INT_32: i32 = i32::MIN + 8;

/// In-memory marker for a missing integer element (`.` in VCF).
pub const MISSING_INTEGER: i32 = i32::MIN;

/// In-memory marker for a missing float element (`.` in VCF).
pub fn missing_float() -> f32 {
    f32::from_bits(MISSING_FLOAT)
}

pub(crate) fn is_missing_float(value: f32) -> bool {
    value.to_bits() == MISSING_FLOAT
}

#[derive(Debug, Eq, PartialEq)]
#[repr(C)]
pub struct Version {
    pub(crate) major: u8,
    pub(crate) minor: u8,
}

#[derive(Debug, Eq, PartialEq)]
pub struct TypeDescriptor {
    pub(crate) kind: TypeKind,
    pub(crate) num_elements: usize,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive)]
#[repr(u8)]
pub enum TypeKind {
    Missing = 0,
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Float32 = 5,
    String = 7,
}

impl TypeKind {
    pub(crate) fn width(self) -> usize {
        match self {
            TypeKind::Missing => 0,
            TypeKind::Int8 | TypeKind::String => 1,
            TypeKind::Int16 => 2,
            TypeKind::Int32 | TypeKind::Float32 => 4,
        }
    }

    pub(crate) fn is_integer(self) -> bool {
        matches!(self, TypeKind::Int8 | TypeKind::Int16 | TypeKind::Int32)
    }
}

/// Declared value type of an INFO or FORMAT field (`Type=` in the header).
#[derive(Debug, Clone, Copy, Eq, PartialEq, EnumString, Display)]
pub enum FieldType {
    Integer,
    Float,
    Flag,
    Character,
    String,
}

/// Declared cardinality of an INFO or FORMAT field (`Number=` in the header).
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Number {
    /// A fixed count; `Count(0)` is reserved for flags.
    Count(usize),
    /// `R`: one value per allele, reference included.
    Alleles,
    /// `A`: one value per alternate allele.
    AlternateAlleles,
    /// `G`: one value per possible genotype.
    Genotypes,
    /// `.`: any number of values.
    Unknown,
}

impl Number {
    pub fn fixed(self) -> Option<usize> {
        match self {
            Number::Count(n) => Some(n),
            _ => None,
        }
    }
}

impl FromStr for Number {
    type Err = BcfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parser::number(s) {
            Ok(("", number)) => Ok(number),
            _ => Err(BcfError::InvalidDeclaration(format!(
                "unknown Number `{}`",
                s
            ))),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Count(n) => write!(f, "{}", n),
            Number::Alleles => f.write_str("R"),
            Number::AlternateAlleles => f.write_str("A"),
            Number::Genotypes => f.write_str("G"),
            Number::Unknown => f.write_str("."),
        }
    }
}

/// A decoded INFO or FORMAT value, discriminated by the declared [`FieldType`].
///
/// Scalars are always held as one-element vectors; flags carry only presence.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(Vec<i32>),
    Float(Vec<f32>),
    String(Vec<String>),
    Flag(bool),
}

impl FieldValue {
    pub fn integer(&self) -> Option<&[i32]> {
        match self {
            FieldValue::Integer(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn float(&self) -> Option<&[f32]> {
        match self {
            FieldValue::Float(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn string(&self) -> Option<&[String]> {
        match self {
            FieldValue::String(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Presence of a flag. Non-flag values are never "set flags".
    pub fn flag(&self) -> bool {
        matches!(self, FieldValue::Flag(true))
    }

    /// Number of elements; a flag counts as zero.
    pub fn len(&self) -> usize {
        match self {
            FieldValue::Integer(v) => v.len(),
            FieldValue::Float(v) => v.len(),
            FieldValue::String(v) => v.len(),
            FieldValue::Flag(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn shape(&self) -> &'static str {
        match self {
            FieldValue::Integer(_) => "Integer",
            FieldValue::Float(_) => "Float",
            FieldValue::String(_) => "String",
            FieldValue::Flag(_) => "Flag",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn or_dot<T: fmt::Display>(value: T, missing: bool) -> String {
            if missing {
                ".".into()
            } else {
                value.to_string()
            }
        }
        match self {
            FieldValue::Integer(v) => write!(
                f,
                "{}",
                v.iter().map(|&i| or_dot(i, i == MISSING_INTEGER)).join(",")
            ),
            FieldValue::Float(v) => write!(
                f,
                "{}",
                v.iter().map(|&x| or_dot(x, is_missing_float(x))).join(",")
            ),
            FieldValue::String(v) => write!(f, "{}", v.iter().join(",")),
            FieldValue::Flag(_) => Ok(()),
        }
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(vec![value])
    }
}

impl From<Vec<i32>> for FieldValue {
    fn from(values: Vec<i32>) -> Self {
        FieldValue::Integer(values)
    }
}

impl From<&[i32]> for FieldValue {
    fn from(values: &[i32]) -> Self {
        FieldValue::Integer(values.to_vec())
    }
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        FieldValue::Float(vec![value])
    }
}

impl From<Vec<f32>> for FieldValue {
    fn from(values: Vec<f32>) -> Self {
        FieldValue::Float(values)
    }
}

impl From<&[f32]> for FieldValue {
    fn from(values: &[f32]) -> Self {
        FieldValue::Float(values.to_vec())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(vec![value.to_owned()])
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(vec![value])
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(values: Vec<String>) -> Self {
        FieldValue::String(values)
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(values: Vec<&str>) -> Self {
        FieldValue::String(values.into_iter().map(str::to_owned).collect())
    }
}

impl From<bool> for FieldValue {
    fn from(present: bool) -> Self {
        FieldValue::Flag(present)
    }
}

/// `[true]` and `true` both mean "present"; any truthy element sets the flag.
impl From<Vec<bool>> for FieldValue {
    fn from(values: Vec<bool>) -> Self {
        FieldValue::Flag(values.into_iter().any(|b| b))
    }
}

impl From<&[bool]> for FieldValue {
    fn from(values: &[bool]) -> Self {
        FieldValue::Flag(values.iter().any(|&b| b))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_number_parse_and_display() {
        for s in ["0", "1", "12", "A", "R", "G", "."] {
            let number: Number = s.parse().unwrap();
            assert_eq!(number.to_string(), s);
        }
        assert_eq!("A".parse::<Number>().unwrap(), Number::AlternateAlleles);
        assert!("X".parse::<Number>().is_err());
        assert!("1x".parse::<Number>().is_err());
    }

    #[test]
    fn test_field_type_from_str() {
        assert_eq!(FieldType::from_str("Float").unwrap(), FieldType::Float);
        assert_eq!(FieldType::Flag.to_string(), "Flag");
        assert!(FieldType::from_str("Double").is_err());
    }

    #[test]
    fn test_flag_normalization() {
        assert_eq!(FieldValue::from(vec![true]), FieldValue::Flag(true));
        assert_eq!(FieldValue::from(true), FieldValue::Flag(true));
        assert_eq!(FieldValue::from(Vec::<bool>::new()), FieldValue::Flag(false));
        assert!(!FieldValue::Integer(vec![1]).flag());
    }

    #[test]
    fn test_display_missing() {
        let v = FieldValue::Integer(vec![1, MISSING_INTEGER, 3]);
        assert_eq!(v.to_string(), "1,.,3");
        let v = FieldValue::Float(vec![0.5, missing_float()]);
        assert_eq!(v.to_string(), "0.5,.");
    }
}
