use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use getset::{CopyGetters, Getters};
use indexmap::IndexMap;
use itertools::Itertools;
use log::debug;

use crate::error::{BcfError, Result};
use crate::parser::{self, HeaderLine};
use crate::registry::{FieldIndex, TypeDeclaration, TypeRegistry};

/// Shared handle through which records see their header.
#[cfg(not(feature = "sync"))]
pub type HeaderRef = std::rc::Rc<Header>;
#[cfg(feature = "sync")]
pub type HeaderRef = std::sync::Arc<Header>;

const PASS: &str = "PASS";
const FIXED_COLUMNS: [&str; 8] = ["CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO"];

#[derive(Debug, Clone, Eq, PartialEq, Getters, CopyGetters)]
pub struct HeaderContig {
    #[getset(get = "pub")]
    id: String,
    #[getset(get_copy = "pub")]
    length: Option<usize>,
    #[getset(get = "pub")]
    additional: Vec<(String, String)>,
}

#[derive(Debug, Clone, Eq, PartialEq, Getters)]
#[getset(get = "pub")]
pub struct HeaderFilter {
    id: String,
    description: String,
}

/// The schema shared by a stream of records: contigs, samples, FILTER ids and
/// the INFO and FORMAT registries.
///
/// Declarations are append-only. FILTER, INFO and FORMAT ids share one string
/// dictionary whose positions are the keys written into record blocks.
#[derive(Debug, Clone)]
pub struct Header {
    meta: Vec<(String, String)>,
    filters: IndexMap<String, HeaderFilter>,
    info: TypeRegistry,
    format: TypeRegistry,
    contigs: IndexMap<String, HeaderContig>,
    samples: Vec<String>,
    dictionary: Vec<Option<String>>,
    dictionary_keys: HashMap<String, usize>,
    info_keys: Vec<usize>,
    format_keys: Vec<usize>,
    info_by_key: Vec<Option<FieldIndex>>,
    format_by_key: Vec<Option<FieldIndex>>,
    rendered: OnceLock<String>,
}

impl Default for Header {
    fn default() -> Self {
        Self::empty()
    }
}

impl Header {
    /// A header declaring only `fileformat` and the implicit `PASS` filter.
    pub fn empty() -> Self {
        let mut header = Header {
            meta: vec![("fileformat".into(), "VCFv4.2".into())],
            filters: IndexMap::new(),
            info: TypeRegistry::new(),
            format: TypeRegistry::new(),
            contigs: IndexMap::new(),
            samples: Vec::new(),
            dictionary: Vec::new(),
            dictionary_keys: HashMap::new(),
            info_keys: Vec::new(),
            format_keys: Vec::new(),
            info_by_key: Vec::new(),
            format_by_key: Vec::new(),
            rendered: OnceLock::new(),
        };
        header.insert_filter(PASS, "All filters passed", Some(0)).ok();
        header
    }

    /// Parse the schema text embedded in a BCF file (trailing NULs are ignored).
    pub fn from_text(text: &str) -> Result<Self> {
        let mut header = Header::empty();
        // `PASS` is pre-declared, so a file's own PASS line only replaces its description
        let mut saw_pass = false;
        let mut saw_columns = false;
        for line in text.trim_end_matches('\0').lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            if saw_columns {
                return Err(BcfError::MalformedHeader(format!(
                    "unexpected line after #CHROM: {}",
                    line
                )));
            }
            let (_, entry) = parser::header_line(line)
                .map_err(|_| BcfError::MalformedHeader(format!("cannot parse: {}", line)))?;
            match entry {
                HeaderLine::Structured { key, fields } => match key {
                    "INFO" => {
                        let idx = idx_of(&fields)?;
                        header.insert_info(TypeDeclaration::from_pairs(fields)?, idx)?;
                    }
                    "FORMAT" => {
                        let idx = idx_of(&fields)?;
                        header.insert_format(TypeDeclaration::from_pairs(fields)?, idx)?;
                    }
                    "FILTER" => {
                        let idx = idx_of(&fields)?;
                        let (id, description) = filter_fields(&fields)?;
                        if id == PASS && !saw_pass {
                            saw_pass = true;
                            header.filters[PASS].description = description.to_owned();
                        } else {
                            header.insert_filter(id, description, idx)?;
                        }
                    }
                    "contig" => {
                        let idx = idx_of(&fields)?;
                        header.insert_contig(contig_from_fields(fields)?, idx)?;
                    }
                    _ => header
                        .meta
                        .push((key.to_owned(), line[key.len() + 3..].to_owned())),
                },
                HeaderLine::Meta { key, value } => match key {
                    "INFO" | "FORMAT" | "FILTER" | "contig" => {
                        return Err(BcfError::MalformedHeader(format!(
                            "malformed {} line: {}",
                            key, line
                        )))
                    }
                    "fileformat" => header.meta[0].1 = value.to_owned(),
                    _ => header.meta.push((key.to_owned(), value.to_owned())),
                },
                HeaderLine::Columns(columns) => {
                    header.samples = sample_columns(&columns)?;
                    saw_columns = true;
                }
            }
        }
        Ok(header)
    }

    /// Declare an INFO field.
    ///
    /// Re-declaring an identical field is a no-op returning the existing index;
    /// a conflicting re-declaration fails with `DuplicateId`.
    pub fn add_info(&mut self, declaration: TypeDeclaration) -> Result<FieldIndex> {
        if let Some((idx, existing)) = self.info.lookup(declaration.id()) {
            return if existing.same_definition(&declaration) {
                Ok(idx)
            } else {
                Err(BcfError::DuplicateId(declaration.id().clone()))
            };
        }
        debug!("declaring INFO/{}", declaration.id());
        self.insert_info(declaration, None)
    }

    /// Declare a FORMAT field, with the same idempotency rule as [`Header::add_info`].
    pub fn add_format(&mut self, declaration: TypeDeclaration) -> Result<FieldIndex> {
        if let Some((idx, existing)) = self.format.lookup(declaration.id()) {
            return if existing.same_definition(&declaration) {
                Ok(idx)
            } else {
                Err(BcfError::DuplicateId(declaration.id().clone()))
            };
        }
        debug!("declaring FORMAT/{}", declaration.id());
        self.insert_format(declaration, None)
    }

    pub fn add_filter(&mut self, id: &str, description: &str) -> Result<()> {
        if let Some(existing) = self.filters.get(id) {
            return if existing.description == description {
                Ok(())
            } else {
                Err(BcfError::DuplicateId(id.to_owned()))
            };
        }
        debug!("declaring FILTER/{}", id);
        self.insert_filter(id, description, None)
    }

    /// Declare a contig, returning its index as stored in records.
    pub fn add_contig(&mut self, id: &str, length: Option<usize>) -> Result<usize> {
        if let Some((rid, _, existing)) = self.contigs.get_full(id) {
            return if existing.length == length {
                Ok(rid)
            } else {
                Err(BcfError::DuplicateId(id.to_owned()))
            };
        }
        let contig = HeaderContig {
            id: id.to_owned(),
            length,
            additional: Vec::new(),
        };
        self.insert_contig(contig, None)
    }

    pub fn add_sample(&mut self, name: &str) -> Result<()> {
        if self.samples.iter().any(|s| s == name) {
            return Err(BcfError::DuplicateId(name.to_owned()));
        }
        self.samples.push(name.to_owned());
        self.invalidate();
        Ok(())
    }

    fn insert_info(
        &mut self,
        declaration: TypeDeclaration,
        idx: Option<usize>,
    ) -> Result<FieldIndex> {
        if self.info.contains(declaration.id()) {
            return Err(BcfError::DuplicateId(declaration.id().clone()));
        }
        let key = self.assign_key(declaration.id(), idx)?;
        let field = self.info.declare(declaration)?;
        self.info_keys.push(key);
        set_slot(&mut self.info_by_key, key, field);
        self.invalidate();
        Ok(field)
    }

    fn insert_format(
        &mut self,
        declaration: TypeDeclaration,
        idx: Option<usize>,
    ) -> Result<FieldIndex> {
        if self.format.contains(declaration.id()) {
            return Err(BcfError::DuplicateId(declaration.id().clone()));
        }
        let key = self.assign_key(declaration.id(), idx)?;
        let field = self.format.declare(declaration)?;
        self.format_keys.push(key);
        set_slot(&mut self.format_by_key, key, field);
        self.invalidate();
        Ok(field)
    }

    fn insert_filter(&mut self, id: &str, description: &str, idx: Option<usize>) -> Result<()> {
        if self.filters.contains_key(id) {
            return Err(BcfError::DuplicateId(id.to_owned()));
        }
        self.assign_key(id, idx)?;
        self.filters.insert(
            id.to_owned(),
            HeaderFilter {
                id: id.to_owned(),
                description: description.to_owned(),
            },
        );
        self.invalidate();
        Ok(())
    }

    fn insert_contig(&mut self, contig: HeaderContig, idx: Option<usize>) -> Result<usize> {
        if self.contigs.contains_key(&contig.id) {
            return Err(BcfError::DuplicateId(contig.id));
        }
        let rid = self.contigs.len();
        if let Some(idx) = idx {
            if idx != rid {
                return Err(BcfError::MalformedHeader(format!(
                    "contig {} has IDX={} but is declared at position {}",
                    contig.id, idx, rid
                )));
            }
        }
        self.contigs.insert(contig.id.clone(), contig);
        self.invalidate();
        Ok(rid)
    }

    fn assign_key(&mut self, id: &str, idx: Option<usize>) -> Result<usize> {
        if let Some(&key) = self.dictionary_keys.get(id) {
            return match idx {
                Some(idx) if idx != key => Err(BcfError::MalformedHeader(format!(
                    "{} is declared with IDX={} and IDX={}",
                    id, key, idx
                ))),
                _ => Ok(key),
            };
        }
        let key = idx.unwrap_or(self.dictionary.len());
        if key >= self.dictionary.len() {
            self.dictionary.resize(key + 1, None);
        }
        if let Some(other) = &self.dictionary[key] {
            return Err(BcfError::MalformedHeader(format!(
                "IDX={} is claimed by both {} and {}",
                key, other, id
            )));
        }
        self.dictionary[key] = Some(id.to_owned());
        self.dictionary_keys.insert(id.to_owned(), key);
        Ok(key)
    }

    fn invalidate(&mut self) {
        self.rendered.take();
    }

    /// A copy of the sample names, in column order.
    pub fn samples(&self) -> Vec<String> {
        self.samples.clone()
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn info(&self) -> &TypeRegistry {
        &self.info
    }

    pub fn format(&self) -> &TypeRegistry {
        &self.format
    }

    pub fn has_info(&self, id: &str) -> bool {
        self.info.contains(id)
    }

    pub fn has_format(&self, id: &str) -> bool {
        self.format.contains(id)
    }

    pub fn contigs(&self) -> impl Iterator<Item = &HeaderContig> {
        self.contigs.values()
    }

    pub fn filters(&self) -> impl Iterator<Item = &HeaderFilter> {
        self.filters.values()
    }

    pub fn meta(&self) -> &[(String, String)] {
        &self.meta
    }

    pub fn contig_name(&self, rid: usize) -> Option<&str> {
        self.contigs.get_index(rid).map(|(id, _)| id.as_str())
    }

    pub fn contig_rid(&self, id: &str) -> Option<usize> {
        self.contigs.get_index_of(id)
    }

    pub(crate) fn filter_key(&self, id: &str) -> Option<usize> {
        self.filters
            .get(id)
            .and_then(|_| self.dictionary_keys.get(id).copied())
    }

    pub(crate) fn filter_name(&self, key: usize) -> Option<&str> {
        self.dictionary
            .get(key)
            .and_then(Option::as_deref)
            .filter(|id| self.filters.contains_key(*id))
    }

    pub(crate) fn info_key(&self, field: FieldIndex) -> usize {
        self.info_keys[field.get()]
    }

    pub(crate) fn format_key(&self, field: FieldIndex) -> usize {
        self.format_keys[field.get()]
    }

    pub(crate) fn info_for_key(&self, key: usize) -> Option<FieldIndex> {
        self.info_by_key.get(key).copied().flatten()
    }

    pub(crate) fn format_for_key(&self, key: usize) -> Option<FieldIndex> {
        self.format_by_key.get(key).copied().flatten()
    }

    /// Check that `self` only extends `base`: every contig, sample, filter and
    /// field of `base` is present here, unchanged and under the same key.
    pub fn check_extends(&self, base: &Header) -> Result<()> {
        let incompatible = |what: String| Err(BcfError::IncompatibleHeader(what));
        for (rid, contig) in base.contigs.values().enumerate() {
            if self.contig_name(rid) != Some(contig.id.as_str()) {
                return incompatible(format!("contig {} moved or missing", contig.id));
            }
        }
        if self.samples != base.samples {
            return incompatible("sample lists differ".into());
        }
        for id in base.filters.keys() {
            if self.filter_key(id) != base.filter_key(id) {
                return incompatible(format!("FILTER/{} moved or missing", id));
            }
        }
        for (namespace, ours, theirs) in [
            ("INFO", &self.info, &base.info),
            ("FORMAT", &self.format, &base.format),
        ] {
            for (id, declaration) in theirs.all() {
                match ours.lookup(id) {
                    Some((_, d))
                        if d.same_definition(declaration)
                            && self.dictionary_keys.get(id) == base.dictionary_keys.get(id) => {}
                    _ => return incompatible(format!("{}/{} missing or redeclared", namespace, id)),
                }
            }
        }
        Ok(())
    }

    /// Header text as embedded in a BCF file, NUL-terminated.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.to_string().into_bytes();
        bytes.push(0);
        bytes
    }

    fn render(&self) -> String {
        let mut lines = Vec::new();
        for (key, value) in &self.meta {
            lines.push(format!("##{}={}", key, value));
        }
        for filter in self.filters.values() {
            lines.push(format!(
                "##FILTER=<ID={},Description={},IDX={}>",
                filter.id,
                quote(&filter.description),
                self.dictionary_keys[&filter.id]
            ));
        }
        for (namespace, registry) in [("INFO", &self.info), ("FORMAT", &self.format)] {
            for (id, declaration) in registry.all() {
                let additional = declaration
                    .additional()
                    .iter()
                    .map(|(k, v)| format!(",{}={}", k, quote_if_needed(v)))
                    .join("");
                lines.push(format!(
                    "##{}=<ID={},Number={},Type={},Description={}{},IDX={}>",
                    namespace,
                    id,
                    declaration.number(),
                    declaration.kind(),
                    quote(declaration.description()),
                    additional,
                    self.dictionary_keys[id]
                ));
            }
        }
        for (rid, contig) in self.contigs.values().enumerate() {
            let length = contig
                .length
                .map(|l| format!(",length={}", l))
                .unwrap_or_default();
            let additional = contig
                .additional
                .iter()
                .map(|(k, v)| format!(",{}={}", k, quote_if_needed(v)))
                .join("");
            lines.push(format!(
                "##contig=<ID={}{}{},IDX={}>",
                contig.id, length, additional, rid
            ));
        }
        let mut columns = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect_vec();
        if !self.samples.is_empty() {
            columns.push("FORMAT".into());
            columns.extend(self.samples.iter().cloned());
        }
        lines.push(format!("#{}", columns.join("\t")));
        let mut text = lines.join("\n");
        text.push('\n');
        text
    }
}

/// Renders the full schema text; the result is cached until the next declaration.
impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rendered.get_or_init(|| self.render()))
    }
}

fn set_slot(slots: &mut Vec<Option<FieldIndex>>, key: usize, field: FieldIndex) {
    if key >= slots.len() {
        slots.resize(key + 1, None);
    }
    slots[key] = Some(field);
}

fn idx_of(fields: &[(&str, String)]) -> Result<Option<usize>> {
    fields
        .iter()
        .find(|(k, _)| *k == "IDX")
        .map(|(_, v)| {
            v.parse()
                .map_err(|_| BcfError::MalformedHeader(format!("invalid IDX={}", v)))
        })
        .transpose()
}

fn filter_fields<'a>(fields: &'a [(&str, String)]) -> Result<(&'a str, &'a str)> {
    let get = |key: &str| fields.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str());
    let id = get("ID").ok_or_else(|| BcfError::MalformedHeader("FILTER without ID".into()))?;
    Ok((id, get("Description").unwrap_or_default()))
}

fn contig_from_fields(fields: Vec<(&str, String)>) -> Result<HeaderContig> {
    let mut id = None;
    let mut length = None;
    let mut additional = Vec::new();
    for (key, value) in fields {
        match key {
            "ID" => id = Some(value),
            "length" => {
                length = Some(value.parse().map_err(|_| {
                    BcfError::MalformedHeader(format!("invalid contig length {}", value))
                })?)
            }
            "IDX" => {}
            _ => additional.push((key.to_owned(), value)),
        }
    }
    Ok(HeaderContig {
        id: id.ok_or_else(|| BcfError::MalformedHeader("contig without ID".into()))?,
        length,
        additional,
    })
}

fn sample_columns(columns: &[&str]) -> Result<Vec<String>> {
    if columns.len() < FIXED_COLUMNS.len() || columns[..FIXED_COLUMNS.len()] != FIXED_COLUMNS {
        return Err(BcfError::MalformedHeader(format!(
            "unexpected column line #{}",
            columns.join("\t")
        )));
    }
    match columns.get(FIXED_COLUMNS.len()) {
        None => Ok(vec![]),
        Some(&"FORMAT") => Ok(columns[FIXED_COLUMNS.len() + 1..]
            .iter()
            .map(|s| s.to_string())
            .collect()),
        Some(other) => Err(BcfError::MalformedHeader(format!(
            "expected FORMAT column, found {}",
            other
        ))),
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn quote_if_needed(value: &str) -> String {
    if value.is_empty() || value.contains(|c: char| ",<>=\"\\".contains(c) || c.is_whitespace()) {
        quote(value)
    } else {
        value.to_owned()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{FieldType, Number};

    const TEXT: &str = "##fileformat=VCFv4.3\n\
##FILTER=<ID=PASS,Description=\"All filters passed\",IDX=0>\n\
##source=unit-test\n\
##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total depth\",IDX=1>\n\
##INFO=<ID=AF,Number=A,Type=Float,Description=\"Allele frequency\",IDX=2>\n\
##FILTER=<ID=q10,Description=\"Quality below 10\",IDX=3>\n\
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\",IDX=4>\n\
##contig=<ID=chr1,length=248956422,IDX=0>\n\
##contig=<ID=chr2,IDX=1>\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tHG001\tHG002\n\0";

    fn info(id: &str, number: &str, kind: &str) -> TypeDeclaration {
        TypeDeclaration::try_from(vec![
            ("ID", id),
            ("Number", number),
            ("Type", kind),
            ("Description", "Test info field"),
        ])
        .unwrap()
    }

    #[test]
    fn test_parse() {
        let header = Header::from_text(TEXT).unwrap();
        assert_eq!(header.samples(), vec!["HG001", "HG002"]);
        assert_eq!(header.contig_name(1), Some("chr2"));
        assert_eq!(header.contigs().next().unwrap().length(), Some(248956422));
        assert_eq!(header.meta()[0], ("fileformat".into(), "VCFv4.3".into()));
        let (_, af) = header.info().lookup("AF").unwrap();
        assert_eq!(af.number(), Number::AlternateAlleles);
        assert_eq!(af.kind(), FieldType::Float);
        assert_eq!(header.filter_key("q10"), Some(3));
        assert_eq!(header.filter_name(0), Some("PASS"));
        assert_eq!(header.filter_name(1), None);
        assert_eq!(header.info_for_key(2), header.info().lookup("AF").map(|(i, _)| i));
        assert!(header.format_for_key(4).is_some());
        assert!(header.has_format("GT"));
        assert!(!header.has_info("GT"));
    }

    #[test]
    fn test_render_round_trip() {
        let header = Header::from_text(TEXT).unwrap();
        let text = header.to_string();
        let reparsed = Header::from_text(&text).unwrap();
        assert_eq!(reparsed.to_string(), text);
        assert!(reparsed.check_extends(&header).is_ok());
        assert!(text.contains("##source=unit-test"));
        assert!(text.ends_with("FORMAT\tHG001\tHG002\n"));
    }

    #[test]
    fn test_add_info_invalidates_rendering() {
        let mut header = Header::from_text(TEXT).unwrap();
        let before = header.to_string();
        assert!(!before.contains("ID=TEST_INFO"));
        let idx = header.add_info(info("TEST_INFO", "1", "Float")).unwrap();
        assert_eq!(idx.get(), 2);
        header.add_info(info("TEST_FLAG", "0", "Flag")).unwrap();
        let after = header.to_string();
        assert!(after.contains("ID=TEST_INFO"));
        assert!(after.contains("ID=TEST_FLAG"));
        // new keys are allocated after the highest key in use
        let line = "ID=TEST_INFO,Number=1,Type=Float,Description=\"Test info field\",IDX=5";
        assert!(after.contains(line));
    }

    #[test]
    fn test_add_info_idempotent() {
        let mut header = Header::empty();
        let first = header.add_info(info("TEST_INFO", "1", "Float")).unwrap();
        let second = header.add_info(info("TEST_INFO", "1", "Float")).unwrap();
        assert_eq!(first, second);
        assert_eq!(header.to_string().matches("ID=TEST_INFO").count(), 1);

        let conflicting = header.add_info(info("TEST_INFO", "2", "Float"));
        assert!(matches!(conflicting, Err(BcfError::DuplicateId(_))));
        assert_eq!(header.info().len(), 1);
    }

    #[test]
    fn test_info_and_format_are_separate_namespaces() {
        let mut header = Header::empty();
        header.add_info(info("DP", "1", "Integer")).unwrap();
        header.add_format(info("DP", "1", "Integer")).unwrap();
        // one dictionary entry serves both
        assert_eq!(header.dictionary.iter().flatten().filter(|id| *id == "DP").count(), 1);
        assert_eq!(header.info().len(), 1);
        assert_eq!(header.format().len(), 1);
    }

    #[test]
    fn test_samples_is_a_copy() {
        let mut header = Header::empty();
        header.add_sample("S1").unwrap();
        let mut samples = header.samples();
        samples.push("S2".into());
        assert_eq!(header.samples(), vec!["S1"]);
        assert!(header.add_sample("S1").is_err());
    }

    #[test]
    fn test_check_extends() {
        let base = Header::from_text(TEXT).unwrap();
        let mut extended = base.clone();
        extended.add_info(info("NEW", ".", "String")).unwrap();
        extended.add_contig("chr3", None).unwrap();
        assert!(extended.check_extends(&base).is_ok());
        assert!(matches!(
            base.check_extends(&extended),
            Err(BcfError::IncompatibleHeader(_))
        ));
    }

    #[test]
    fn test_malformed() {
        assert!(Header::from_text("##INFO=<ID=X,Number=1>\n").is_err());
        assert!(Header::from_text("##INFO=<ID=X\n").is_err());
        assert!(Header::from_text("#CHROM\tPOS\n").is_err());
        assert!(Header::from_text(
            "##INFO=<ID=A,Number=1,Type=Integer,Description=\"\",IDX=1>\n\
             ##INFO=<ID=B,Number=1,Type=Integer,Description=\"\",IDX=1>\n"
        )
        .is_err());
    }
}
