//! Conversion between [`FieldValue`]s and BCF2 typed values.
//!
//! A typed value is a type descriptor byte (`count << 4 | kind`, with count 15
//! meaning "the real count follows as a typed integer") and `count` little-endian
//! elements. Integers use the narrowest width that holds every element.

use std::convert::TryFrom;

use nom::multi::many_m_n;
use nom::number::complete::{le_f32, le_i16, le_i32, le_i8};
use nom::IResult;

use crate::error::{BcfError, Result};
use crate::parser::typed_payload;
use crate::registry::TypeDeclaration;
use crate::types::{
    FieldType, FieldValue, Number, TypeDescriptor, TypeKind, END_OF_VECTOR_FLOAT,
    END_OF_VECTOR_INT_16, END_OF_VECTOR_INT_32, END_OF_VECTOR_INT_8, MIN_INT_16, MIN_INT_32,
    MIN_INT_8, MISSING_INTEGER, MISSING_INT_16, MISSING_INT_8,
};

/// Check that `value` fits the declared kind and cardinality.
pub fn validate(value: &FieldValue, declaration: &TypeDeclaration) -> Result<()> {
    let id = declaration.id();
    let kind_matches = matches!(
        (declaration.kind(), value),
        (FieldType::Integer, FieldValue::Integer(_))
            | (FieldType::Float, FieldValue::Float(_))
            | (FieldType::String, FieldValue::String(_))
            | (FieldType::Character, FieldValue::String(_))
            | (FieldType::Flag, FieldValue::Flag(_))
    );
    if !kind_matches {
        return Err(BcfError::mismatch(
            id,
            format!("expected {}, got {}", declaration.kind(), value.shape()),
        ));
    }
    let is_flag = declaration.kind() == FieldType::Flag;
    if let (Some(n), false) = (declaration.number().fixed(), is_flag) {
        if value.len() != n {
            return Err(BcfError::mismatch(
                id,
                format!("Number={} but {} values given", n, value.len()),
            ));
        }
    }
    match value {
        FieldValue::Integer(values) => {
            if let Some(v) = values.iter().find(|&&v| v != MISSING_INTEGER && v < MIN_INT_32) {
                return Err(BcfError::mismatch(id, format!("{} is a reserved value", v)));
            }
        }
        FieldValue::String(values) => {
            let splits = declaration.number() != Number::Count(1);
            if values
                .iter()
                .any(|s| s.contains('\0') || (splits && s.contains(',')))
            {
                return Err(BcfError::mismatch(
                    id,
                    "strings may not contain NUL, or commas unless Number=1",
                ));
            }
        }
        FieldValue::Float(_) | FieldValue::Flag(_) => {}
    }
    Ok(())
}

/// Encode `value` as a typed value, after validating it against `declaration`.
pub fn encode(value: &FieldValue, declaration: &TypeDeclaration) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_into(value, declaration, &mut out)?;
    Ok(out)
}

pub fn encode_into(
    value: &FieldValue,
    declaration: &TypeDeclaration,
    out: &mut Vec<u8>,
) -> Result<()> {
    validate(value, declaration)?;
    match value {
        // presence alone is the value
        FieldValue::Flag(_) => write_ints(&[1], out),
        FieldValue::Integer(values) => write_ints(values, out),
        FieldValue::Float(values) => {
            write_descriptor(TypeKind::Float32, values.len(), out);
            for v in values {
                out.extend_from_slice(&v.to_bits().to_le_bytes());
            }
        }
        // no values at all, as opposed to a single empty string
        FieldValue::String(values) if values.is_empty() => {
            write_descriptor(TypeKind::Missing, 0, out)
        }
        FieldValue::String(values) => write_string(&values.join(","), out),
    }
    Ok(())
}

/// Decode one typed value, requiring exactly the declared count for fixed-count fields.
pub fn decode(bytes: &[u8], declaration: &TypeDeclaration) -> Result<FieldValue> {
    let (rest, (descriptor, payload)) = typed_payload(bytes)
        .map_err(|_| BcfError::malformed(declaration.id(), "truncated typed value"))?;
    if !rest.is_empty() {
        return Err(BcfError::malformed(
            declaration.id(),
            format!("{} trailing bytes", rest.len()),
        ));
    }
    let value = decode_payload(&descriptor, payload, declaration)?;
    if let (Some(n), false) = (declaration.number().fixed(), value == FieldValue::Flag(true)) {
        if value.len() != n {
            return Err(BcfError::malformed(
                declaration.id(),
                format!("Number={} but {} values stored", n, value.len()),
            ));
        }
    }
    Ok(value)
}

/// Decode a payload according to the declared kind, without cardinality checks.
///
/// End-of-vector padding is trimmed; missing elements are kept as sentinels.
pub(crate) fn decode_payload(
    descriptor: &TypeDescriptor,
    payload: &[u8],
    declaration: &TypeDeclaration,
) -> Result<FieldValue> {
    let id = declaration.id();
    let n = descriptor.num_elements;
    let unexpected = || {
        BcfError::malformed(
            id,
            format!("{} declared, but {:?} stored", declaration.kind(), descriptor.kind),
        )
    };
    // GT is declared as a String but stored as integers
    let kind = match declaration.kind() {
        FieldType::String if id == "GT" && descriptor.kind.is_integer() => FieldType::Integer,
        kind => kind,
    };
    let value = match kind {
        FieldType::Flag => FieldValue::Flag(true),
        FieldType::Integer => match descriptor.kind {
            TypeKind::Missing => FieldValue::Integer(vec![]),
            TypeKind::Int8 | TypeKind::Int16 | TypeKind::Int32 => {
                let (_, values) = ints(descriptor.kind, n, payload).map_err(|_| unexpected())?;
                FieldValue::Integer(values)
            }
            _ => return Err(unexpected()),
        },
        FieldType::Float => match descriptor.kind {
            TypeKind::Missing => FieldValue::Float(vec![]),
            TypeKind::Float32 => {
                let (_, values) = many_m_n(n, n, le_f32)(payload)
                    .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| unexpected())?;
                FieldValue::Float(
                    values
                        .into_iter()
                        .take_while(|v| v.to_bits() != END_OF_VECTOR_FLOAT)
                        .collect(),
                )
            }
            _ => return Err(unexpected()),
        },
        FieldType::String | FieldType::Character => match descriptor.kind {
            TypeKind::Missing => FieldValue::String(vec![]),
            TypeKind::String => {
                let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
                let text = std::str::from_utf8(&payload[..end])
                    .map_err(|e| BcfError::malformed(id, e.to_string()))?;
                FieldValue::String(if declaration.number() == Number::Count(1) {
                    vec![text.to_owned()]
                } else {
                    text.split(',').map(str::to_owned).collect()
                })
            }
            _ => return Err(unexpected()),
        },
    };
    Ok(value)
}

fn ints(kind: TypeKind, n: usize, payload: &[u8]) -> IResult<&[u8], Vec<i32>, ()> {
    fn widen<T: Copy + Into<i32> + PartialEq>(
        values: Vec<T>,
        missing: T,
        end_of_vector: T,
    ) -> Vec<i32> {
        values
            .into_iter()
            .take_while(|&v| v != end_of_vector)
            .map(|v| if v == missing { MISSING_INTEGER } else { v.into() })
            .collect()
    }
    let values = match kind {
        TypeKind::Int8 => {
            let (_, v) = many_m_n(n, n, le_i8)(payload)?;
            widen(v, MISSING_INT_8, END_OF_VECTOR_INT_8)
        }
        TypeKind::Int16 => {
            let (_, v) = many_m_n(n, n, le_i16)(payload)?;
            widen(v, MISSING_INT_16, END_OF_VECTOR_INT_16)
        }
        _ => {
            let (_, v) = many_m_n(n, n, le_i32)(payload)?;
            widen(v, MISSING_INTEGER, END_OF_VECTOR_INT_32)
        }
    };
    Ok((&payload[payload.len()..], values))
}

fn int_kind(values: &[i32]) -> TypeKind {
    let (min, max) = values
        .iter()
        .filter(|&&v| v != MISSING_INTEGER)
        .fold((0, 0), |(min, max), &v| (min.min(v), max.max(v)));
    if min >= MIN_INT_8 && max <= i8::MAX as i32 {
        TypeKind::Int8
    } else if min >= MIN_INT_16 && max <= i16::MAX as i32 {
        TypeKind::Int16
    } else {
        TypeKind::Int32
    }
}

pub(crate) fn write_descriptor(kind: TypeKind, n: usize, out: &mut Vec<u8>) {
    if n < 15 {
        out.push((n as u8) << 4 | kind as u8);
    } else {
        out.push(0xF0 | kind as u8);
        // counts beyond i32::MAX cannot be expressed in BCF; clamp rather than wrap
        write_ints(&[i32::try_from(n).unwrap_or(i32::MAX)], out);
    }
}

pub(crate) fn write_ints(values: &[i32], out: &mut Vec<u8>) {
    let kind = int_kind(values);
    write_descriptor(kind, values.len(), out);
    for &v in values {
        match kind {
            TypeKind::Int8 => {
                let v = if v == MISSING_INTEGER { MISSING_INT_8 } else { v as i8 };
                out.extend_from_slice(&v.to_le_bytes());
            }
            TypeKind::Int16 => {
                let v = if v == MISSING_INTEGER { MISSING_INT_16 } else { v as i16 };
                out.extend_from_slice(&v.to_le_bytes());
            }
            _ => out.extend_from_slice(&v.to_le_bytes()),
        }
    }
}

pub(crate) fn write_string(s: &str, out: &mut Vec<u8>) {
    write_descriptor(TypeKind::String, s.len(), out);
    out.extend_from_slice(s.as_bytes());
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::missing_float;

    fn decl(number: &str, kind: &str) -> TypeDeclaration {
        TypeDeclaration::try_from(vec![
            ("ID", "X"),
            ("Number", number),
            ("Type", kind),
            ("Description", ""),
        ])
        .unwrap()
    }

    #[test]
    fn test_integer_width_selection() {
        let d = decl(".", "Integer");
        assert_eq!(encode(&FieldValue::Integer(vec![1, -120]), &d).unwrap(), vec![0x21, 1, 0x88]);
        assert_eq!(encode(&FieldValue::Integer(vec![-121]), &d).unwrap()[0], 0x12);
        assert_eq!(encode(&FieldValue::Integer(vec![40000]), &d).unwrap()[0], 0x13);
        assert_eq!(encode(&FieldValue::Integer(vec![]), &d).unwrap(), vec![0x01]);
    }

    #[test]
    fn test_round_trip_by_kind() {
        let cases = vec![
            (decl("1", "Integer"), FieldValue::Integer(vec![1301])),
            (decl("3", "Integer"), FieldValue::Integer(vec![-5, MISSING_INTEGER, 70000])),
            (decl("A", "Float"), FieldValue::Float(vec![0.25, 0.5])),
            (decl("1", "Float"), FieldValue::Float(vec![1.0])),
            (decl(".", "String"), FieldValue::String(vec!["a".into(), "bc".into()])),
            (decl("1", "String"), FieldValue::String(vec!["x,y|z".into()])),
            (decl("0", "Flag"), FieldValue::Flag(true)),
        ];
        for (d, value) in cases {
            let bytes = encode(&value, &d).unwrap();
            assert_eq!(decode(&bytes, &d).unwrap(), value, "{:?}", d);
        }
    }

    #[test]
    fn test_empty_strings_are_not_empty_vectors() {
        let d = decl(".", "String");
        let cases = vec![
            (FieldValue::String(vec![]), vec![0x00]),
            (FieldValue::String(vec!["".into()]), vec![0x07]),
            (FieldValue::String(vec!["".into(), "".into()]), vec![0x17, b',']),
        ];
        for (value, bytes) in cases {
            assert_eq!(encode(&value, &d).unwrap(), bytes);
            assert_eq!(decode(&bytes, &d).unwrap(), value);
        }
    }

    #[test]
    fn test_missing_float_survives() {
        let d = decl("2", "Float");
        let bytes = encode(&FieldValue::Float(vec![missing_float(), 2.0]), &d).unwrap();
        match decode(&bytes, &d).unwrap() {
            FieldValue::Float(v) => {
                assert_eq!(v[0].to_bits(), missing_float().to_bits());
                assert_eq!(v[1], 2.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_long_vectors_use_overflow_count() {
        let d = decl(".", "Integer");
        let values: Vec<i32> = (0..300).collect();
        let bytes = encode(&FieldValue::Integer(values.clone()), &d).unwrap();
        assert_eq!(bytes[0], 0xF2);
        assert_eq!(decode(&bytes, &d).unwrap(), FieldValue::Integer(values));
    }

    #[test]
    fn test_fixed_count_enforced() {
        let d = decl("2", "Integer");
        assert!(matches!(
            encode(&FieldValue::Integer(vec![1]), &d),
            Err(BcfError::TypeMismatch { .. })
        ));
        let three = encode(&FieldValue::Integer(vec![1, 2, 3]), &decl(".", "Integer")).unwrap();
        assert!(matches!(decode(&three, &d), Err(BcfError::MalformedField { .. })));
    }

    #[test]
    fn test_declared_kind_is_authoritative() {
        let ints = encode(&FieldValue::Integer(vec![1]), &decl("1", "Integer")).unwrap();
        assert!(matches!(
            decode(&ints, &decl("1", "Float")),
            Err(BcfError::MalformedField { .. })
        ));
        let floats = encode(&FieldValue::Float(vec![1.0]), &decl("1", "Float")).unwrap();
        assert!(matches!(
            decode(&floats, &decl("1", "Integer")),
            Err(BcfError::MalformedField { .. })
        ));
        assert!(matches!(
            encode(&FieldValue::Integer(vec![1]), &decl("1", "Float")),
            Err(BcfError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_flag_any_value_is_present() {
        let d = decl("0", "Flag");
        assert_eq!(decode(&[0x00], &d).unwrap(), FieldValue::Flag(true));
        assert_eq!(decode(&[0x11, 0x05], &d).unwrap(), FieldValue::Flag(true));
        assert_eq!(encode(&FieldValue::Flag(true), &d).unwrap(), vec![0x11, 0x01]);
        assert!(encode(&FieldValue::Integer(vec![1]), &d).is_err());
    }

    #[test]
    fn test_end_of_vector_trimmed() {
        let d = decl(".", "Integer");
        assert_eq!(
            decode(&[0x31, 0x04, 0x81, 0x81], &d).unwrap(),
            FieldValue::Integer(vec![4])
        );
        assert_eq!(
            decode(&[0x21, 0x80, 0x02], &d).unwrap(),
            FieldValue::Integer(vec![MISSING_INTEGER, 2])
        );
    }

    #[test]
    fn test_invalid_inputs() {
        let d = decl(".", "String");
        assert!(encode(&FieldValue::String(vec!["a,b".into()]), &d).is_err());
        assert!(encode(&FieldValue::Integer(vec![i32::MIN + 3]), &decl(".", "Integer")).is_err());
        assert!(decode(&[0x37, b'a'], &d).is_err());
        assert!(decode(&[0x17, 0xff], &d).is_err());
        assert!(decode(&[0x11, 0x01, 0x00], &decl("1", "Integer")).is_err());
    }
}
