use std::convert::TryFrom;

use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag, take};
use nom::character::complete::{char, digit1};
use nom::combinator::{eof, map, map_res, opt, rest, value};
use nom::error::{Error, ErrorKind};
use nom::multi::{many_m_n, separated_list0};
use nom::number::complete::{le_i16, le_i32, le_i8, le_u32, le_u8};
use nom::sequence::{delimited, preceded, separated_pair, terminated, tuple};
use nom::IResult;

use crate::types::{Number, TypeDescriptor, TypeKind, Version, BCF_MAGIC};

// ---- binary ----

pub(crate) fn bcf_version(input: &[u8]) -> IResult<&[u8], Version> {
    let (input, _) = tag(&BCF_MAGIC[..])(input)?;
    let (input, (major, minor)) = tuple((le_u8, le_u8))(input)?;
    Ok((input, Version { major, minor }))
}

pub(crate) fn header_length(input: &[u8]) -> IResult<&[u8], u32> {
    le_u32(input)
}

/// `(l_shared, l_indiv)` prefix of every record block.
pub(crate) fn record_length(input: &[u8]) -> IResult<&[u8], (u32, u32)> {
    tuple((le_u32, le_u32))(input)
}

pub(crate) fn type_descriptor(input: &[u8]) -> IResult<&[u8], TypeDescriptor> {
    let (rest, type_descriptor_byte) = le_u8(input)?;
    let kind = TypeKind::try_from(type_descriptor_byte & 0b1111)
        .map_err(|_| nom::Err::Failure(Error::new(input, ErrorKind::Verify)))?;
    let num_elements = (type_descriptor_byte >> 4) & 0b1111;
    // a count of 15 means the real count follows as a typed integer
    let (rest, num_elements) = if num_elements == 15 {
        let (rest, n) = overflow_count(rest)?;
        let n = usize::try_from(n)
            .map_err(|_| nom::Err::Failure(Error::new(input, ErrorKind::Verify)))?;
        (rest, n)
    } else {
        (rest, num_elements as usize)
    };
    Ok((rest, TypeDescriptor { kind, num_elements }))
}

/// The count following an overflowing descriptor: one integer with a plain descriptor.
fn overflow_count(input: &[u8]) -> IResult<&[u8], i32> {
    let (rest, descriptor_byte) = le_u8(input)?;
    let kind = TypeKind::try_from(descriptor_byte & 0b1111)
        .map_err(|_| nom::Err::Failure(Error::new(input, ErrorKind::Verify)))?;
    if descriptor_byte >> 4 != 1 || !kind.is_integer() {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::Verify)));
    }
    int_element(kind, input)(rest)
}

/// A single integer of any width, e.g. a dictionary key.
pub(crate) fn typed_int(input: &[u8]) -> IResult<&[u8], i32> {
    let (rest, TypeDescriptor { kind, num_elements }) = type_descriptor(input)?;
    if num_elements != 1 {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::Verify)));
    }
    int_element(kind, input)(rest)
}

fn int_element<'a>(
    kind: TypeKind,
    origin: &'a [u8],
) -> impl Fn(&'a [u8]) -> IResult<&'a [u8], i32> {
    move |input| match kind {
        TypeKind::Int8 => map(le_i8, i32::from)(input),
        TypeKind::Int16 => map(le_i16, i32::from)(input),
        TypeKind::Int32 => le_i32(input),
        _ => Err(nom::Err::Failure(Error::new(origin, ErrorKind::Verify))),
    }
}

/// An integer vector without sentinel handling, e.g. the FILTER list.
pub(crate) fn typed_ints(input: &[u8]) -> IResult<&[u8], Vec<i32>> {
    let (rest, TypeDescriptor { kind, num_elements }) = type_descriptor(input)?;
    if kind == TypeKind::Missing {
        return Ok((rest, vec![]));
    }
    many_m_n(num_elements, num_elements, int_element(kind, input))(rest)
}

pub(crate) fn typed_string(input: &[u8]) -> IResult<&[u8], String> {
    let (rest, TypeDescriptor { kind, num_elements }) = type_descriptor(input)?;
    match kind {
        TypeKind::String => {}
        TypeKind::Missing if num_elements == 0 => return Ok((rest, String::new())),
        _ => return Err(nom::Err::Failure(Error::new(input, ErrorKind::Verify))),
    }
    map_res(take(num_elements), |bytes: &[u8]| {
        std::str::from_utf8(bytes).map(str::to_owned)
    })(rest)
}

/// A type descriptor and its (still encoded) payload.
pub(crate) fn typed_payload(input: &[u8]) -> IResult<&[u8], (TypeDescriptor, &[u8])> {
    let (rest, descriptor) = type_descriptor(input)?;
    let (rest, payload) = take(descriptor.num_elements * descriptor.kind.width())(rest)?;
    Ok((rest, (descriptor, payload)))
}

/// One FORMAT field: dictionary key, per-sample descriptor, and the payload of all samples.
pub(crate) fn format_field(
    n_sample: usize,
    input: &[u8],
) -> IResult<&[u8], (i32, TypeDescriptor, &[u8])> {
    let (rest, key) = typed_int(input)?;
    let (rest, descriptor) = type_descriptor(rest)?;
    let (rest, payload) = take(n_sample * descriptor.num_elements * descriptor.kind.width())(rest)?;
    Ok((rest, (key, descriptor, payload)))
}

// ---- header text ----

pub(crate) fn number(input: &str) -> IResult<&str, Number> {
    alt((
        map_res(digit1, |s: &str| s.parse().map(Number::Count)),
        value(Number::AlternateAlleles, tag("A")),
        value(Number::Alleles, tag("R")),
        value(Number::Genotypes, tag("G")),
        value(Number::Unknown, tag(".")),
    ))(input)
}

#[derive(Debug, PartialEq)]
pub(crate) enum HeaderLine<'a> {
    /// `##KEY=<k=v,...>`
    Structured {
        key: &'a str,
        fields: Vec<(&'a str, String)>,
    },
    /// `##key=value`
    Meta { key: &'a str, value: &'a str },
    /// `#CHROM\tPOS...`
    Columns(Vec<&'a str>),
}

fn quoted(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                is_not("\\\""),
                '\\',
                alt((value("\\", tag("\\")), value("\"", tag("\"")))),
            )),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}

fn key_value(input: &str) -> IResult<&str, (&str, String)> {
    separated_pair(
        is_not("=,<>"),
        char('='),
        alt((
            quoted,
            map(opt(is_not(",>")), |v: Option<&str>| {
                v.unwrap_or_default().to_owned()
            }),
        )),
    )(input)
}

fn structured_line(input: &str) -> IResult<&str, HeaderLine> {
    map(
        terminated(
            preceded(
                tag("##"),
                separated_pair(
                    is_not("="),
                    char('='),
                    delimited(char('<'), separated_list0(char(','), key_value), char('>')),
                ),
            ),
            eof,
        ),
        |(key, fields)| HeaderLine::Structured { key, fields },
    )(input)
}

fn meta_line(input: &str) -> IResult<&str, HeaderLine> {
    map(
        preceded(tag("##"), separated_pair(is_not("="), char('='), rest)),
        |(key, value)| HeaderLine::Meta { key, value },
    )(input)
}

fn columns_line(input: &str) -> IResult<&str, HeaderLine> {
    map(preceded(char('#'), rest), |columns: &str| {
        HeaderLine::Columns(columns.split('\t').collect())
    })(input)
}

pub(crate) fn header_line(line: &str) -> IResult<&str, HeaderLine> {
    alt((structured_line, meta_line, columns_line))(line)
}
