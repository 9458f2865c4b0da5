mod info;
mod translate;

use std::convert::TryFrom;
use std::fmt;
use std::mem::size_of;
use std::ops::Range;

use itertools::Itertools;
use nom::multi::many_m_n;
use nom::number::complete::{le_f32, le_i32, le_u16, le_u24, le_u8};
use nom::sequence::tuple;

use crate::codec::{self, write_ints, write_string};
use crate::error::{BcfError, Result};
use crate::header::{Header, HeaderRef};
use crate::parser::{self, typed_ints, typed_string};
use crate::types::{FieldValue, MISSING_FLOAT, MISSING_INTEGER, NAN_FLOAT};

use info::InfoTable;

const S_I16: usize = size_of::<i16>();
const S_I32: usize = size_of::<i32>();
const S_U32: usize = size_of::<u32>();
const S_F32: usize = size_of::<f32>();

const CHROM_BYTE_RANGE: Range<usize> = 0..S_I32;
const POS_BYTE_RANGE: Range<usize> = S_I32..S_I32 * 2;
const RLEN_BYTE_RANGE: Range<usize> = S_I32 * 2..S_I32 * 3;
const QUAL_BYTE_RANGE: Range<usize> = S_I32 * 3..S_I32 * 3 + S_F32;
const N_INFO_BYTE_RANGE: Range<usize> = QUAL_BYTE_RANGE.end..QUAL_BYTE_RANGE.end + S_I16;
// the ID is the first variable-length item and always starts right after the fixed part
const ID_START_BYTEPOS: usize = S_I32 * 3 + S_F32 + S_I16 * 2 + S_U32;

/// One variant record, backed by its encoded `shared` and `indiv` blocks.
///
/// Site columns are read straight from the bytes. INFO values are decoded on
/// first access and cached; mutations are kept aside until [`BcfRecord::serialize`]
/// writes them back into a fresh block.
///
/// A record is not meant to be shared between threads while it is read or
/// mutated; distinct records can be processed in parallel (with the `sync`
/// feature enabled).
#[derive(Debug)]
pub struct BcfRecord {
    shared: Vec<u8>,
    indiv: Vec<u8>,
    header: HeaderRef,
    allele_start_bytepos: usize,
    filter_start_bytepos: usize,
    info_start_bytepos: usize,
    info: InfoTable,
}

#[derive(Debug)]
struct Site {
    chrom: i32,
    pos: i32,
    rlen: i32,
    n_info: u16,
    n_allele: u16,
    n_sample: u32,
    n_fmt: u8,
}

fn site(shared: &[u8]) -> nom::IResult<&[u8], Site> {
    let (rest, (chrom, pos, rlen, _qual, n_info, n_allele, n_sample, n_fmt)) =
        tuple((le_i32, le_i32, le_i32, le_f32, le_u16, le_u16, le_u24, le_u8))(shared)?;
    Ok((
        rest,
        Site {
            chrom,
            pos,
            rlen,
            n_info,
            n_allele,
            n_sample,
            n_fmt,
        },
    ))
}

fn malformed<E>(what: &'static str) -> impl FnOnce(E) -> BcfError {
    move |_| BcfError::MalformedRecord(format!("cannot read {}", what))
}

impl BcfRecord {
    /// Wrap the `shared` and `indiv` blocks of one record, interpreted against `header`.
    ///
    /// Only the layout is checked here: the site part is walked to find where
    /// INFO starts, and INFO pairs are indexed but left encoded.
    pub fn new(shared: Vec<u8>, indiv: Vec<u8>, header: HeaderRef) -> Result<Self> {
        let (_, site) = site(&shared).map_err(malformed("site"))?;
        if site.chrom < 0 || header.contig_name(site.chrom as usize).is_none() {
            return Err(BcfError::MalformedRecord(format!(
                "contig #{} is not declared",
                site.chrom
            )));
        }
        if site.pos < 0 || site.rlen < 0 {
            return Err(BcfError::MalformedRecord(format!(
                "negative position {} or length {}",
                site.pos, site.rlen
            )));
        }
        if site.n_allele == 0 {
            return Err(BcfError::MalformedRecord("record without alleles".into()));
        }
        if site.n_fmt > 0 && site.n_sample as usize != header.n_samples() {
            return Err(BcfError::MalformedRecord(format!(
                "{} samples in record, {} in header",
                site.n_sample,
                header.n_samples()
            )));
        }

        let input = &shared[ID_START_BYTEPOS..];
        let (rest, _id) = typed_string(input).map_err(malformed("ID"))?;
        let allele_start_bytepos = shared.len() - rest.len();
        let n_allele = site.n_allele as usize;
        let (rest, _alleles) =
            many_m_n(n_allele, n_allele, typed_string)(rest).map_err(malformed("alleles"))?;
        let filter_start_bytepos = shared.len() - rest.len();
        let (rest, _filters) = typed_ints(rest).map_err(malformed("FILTER"))?;
        let info_start_bytepos = shared.len() - rest.len();

        let info = InfoTable::scan(rest, site.n_info as usize, &header)?;
        Ok(Self {
            shared,
            indiv,
            header,
            allele_start_bytepos,
            filter_start_bytepos,
            info_start_bytepos,
            info,
        })
    }

    /// Parse a complete record block: `l_shared`, `l_indiv`, then both blocks.
    pub fn from_block(block: &[u8], header: HeaderRef) -> Result<Self> {
        let (rest, (l_shared, l_indiv)) =
            parser::record_length(block).map_err(malformed("block lengths"))?;
        let (l_shared, l_indiv) = (l_shared as usize, l_indiv as usize);
        if rest.len() != l_shared + l_indiv {
            return Err(BcfError::MalformedRecord(format!(
                "block holds {} bytes, lengths announce {}",
                rest.len(),
                l_shared + l_indiv
            )));
        }
        let (shared, indiv) = rest.split_at(l_shared);
        Self::new(shared.to_vec(), indiv.to_vec(), header)
    }

    /// An empty record at `chrom:pos` (0-based) with the given alleles, reference first.
    pub fn from_site(header: HeaderRef, chrom: &str, pos: u32, alleles: &[&str]) -> Result<Self> {
        let rid = header
            .contig_rid(chrom)
            .ok_or_else(|| BcfError::UnknownContig(chrom.to_owned()))?;
        let reference = alleles
            .first()
            .ok_or_else(|| BcfError::MalformedRecord("record without alleles".into()))?;
        let n_allele = u16::try_from(alleles.len())
            .map_err(|_| BcfError::MalformedRecord("too many alleles".into()))?;
        let mut shared = Vec::new();
        shared.extend_from_slice(&(rid as i32).to_le_bytes());
        shared.extend_from_slice(&(pos as i32).to_le_bytes());
        shared.extend_from_slice(&(reference.len() as i32).to_le_bytes());
        shared.extend_from_slice(&MISSING_FLOAT.to_le_bytes());
        shared.extend_from_slice(&0u16.to_le_bytes());
        shared.extend_from_slice(&n_allele.to_le_bytes());
        // n_sample (24 bits) and n_fmt (8 bits); no FORMAT data
        shared.extend_from_slice(&(header.n_samples() as u32 & 0x00FF_FFFF).to_le_bytes());
        write_string("", &mut shared);
        for allele in alleles {
            write_string(allele, &mut shared);
        }
        write_ints(&[], &mut shared);
        Self::new(shared, Vec::new(), header)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_ref(&self) -> &HeaderRef {
        &self.header
    }

    fn i32_at(&self, range: Range<usize>) -> i32 {
        let mut bytes = [0u8; S_I32];
        bytes.copy_from_slice(&self.shared[range]);
        i32::from_le_bytes(bytes)
    }

    fn n_alleles(&self) -> usize {
        u16::from_le_bytes([self.shared[18], self.shared[19]]) as usize
    }

    fn n_sample(&self) -> usize {
        (u32::from_le_bytes([self.shared[20], self.shared[21], self.shared[22], 0])) as usize
    }

    fn n_fmt(&self) -> usize {
        self.shared[23] as usize
    }

    fn rid(&self) -> usize {
        self.i32_at(CHROM_BYTE_RANGE) as usize
    }

    /// Returns the ID of this record. If not set (`.` in VCF), returns `""`.
    pub fn id(&self) -> String {
        typed_string(&self.shared[ID_START_BYTEPOS..])
            .map(|(_, id)| id)
            .unwrap_or_default()
    }

    /// Returns the target sequence name of this record, i.e. CHROM.
    pub fn chrom(&self) -> &str {
        self.header.contig_name(self.rid()).unwrap_or(".")
    }

    /// Returns the position of this record, i.e. POS, 0-based.
    ///
    /// Note that BCF is 0-based, while VCF is 1-based.
    pub fn pos(&self) -> u32 {
        self.i32_at(POS_BYTE_RANGE) as u32
    }

    pub fn start(&self) -> u32 {
        self.pos()
    }

    /// End of the half-open interval covered by the reference allele.
    pub fn end(&self) -> u32 {
        self.pos() + self.i32_at(RLEN_BYTE_RANGE) as u32
    }

    fn alleles(&self) -> Vec<String> {
        let n_allele = self.n_alleles();
        many_m_n(n_allele, n_allele, typed_string)(&self.shared[self.allele_start_bytepos..])
            .map(|(_, alleles)| alleles)
            .unwrap_or_default()
    }

    pub fn ref_allele(&self) -> String {
        typed_string(&self.shared[self.allele_start_bytepos..])
            .map(|(_, allele)| allele)
            .unwrap_or_default()
    }

    pub fn alt_alleles(&self) -> Vec<String> {
        self.alleles().into_iter().skip(1).collect()
    }

    /// Returns QUAL, or `None` if it is missing.
    pub fn qual(&self) -> Option<f32> {
        let qual = f32::from_bits(self.i32_at(QUAL_BYTE_RANGE) as u32);
        if qual.to_bits() == NAN_FLOAT {
            Some(f32::NAN)
        } else if qual.is_nan() {
            // MISSING_FLOAT, or any other signalling NaN
            None
        } else {
            Some(qual)
        }
    }

    pub fn set_qual(&mut self, qual: Option<f32>) {
        let bits = qual.map(f32::to_bits).unwrap_or(MISSING_FLOAT);
        self.shared[QUAL_BYTE_RANGE].copy_from_slice(&bits.to_le_bytes());
    }

    fn filter_keys(&self) -> Vec<i32> {
        typed_ints(&self.shared[self.filter_start_bytepos..self.info_start_bytepos])
            .map(|(_, keys)| keys)
            .unwrap_or_default()
    }

    /// Returns the names of the filters applied to this record.
    pub fn filters(&self) -> Vec<&str> {
        self.filter_keys()
            .into_iter()
            .filter_map(|key| usize::try_from(key).ok())
            .filter_map(|key| self.header.filter_name(key))
            .collect()
    }

    /// Set the ID column; several identifiers are separated by `;`.
    pub fn set_id(&mut self, id: &str) -> Result<()> {
        let id = if id == "." { "" } else { id };
        if !id.is_empty() {
            let entries = id.split(';').collect::<Vec<_>>();
            let invalid = entries
                .iter()
                .any(|entry| entry.is_empty() || entry.contains(char::is_whitespace));
            if invalid || entries.iter().unique().count() != entries.len() {
                return Err(BcfError::MalformedRecord(format!("invalid ID `{}`", id)));
            }
        }
        let mut bytes = Vec::with_capacity(id.len() + 1);
        write_string(id, &mut bytes);
        self.splice_site(ID_START_BYTEPOS..self.allele_start_bytepos, bytes);
        Ok(())
    }

    /// Replace the FILTER column; each filter must be declared in the header.
    pub fn set_filters(&mut self, filters: &[&str]) -> Result<()> {
        let keys = filters
            .iter()
            .map(|id| {
                self.header
                    .filter_key(id)
                    .map(|key| key as i32)
                    .ok_or_else(|| BcfError::UnknownFilter((*id).to_owned()))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut bytes = Vec::new();
        write_ints(&keys, &mut bytes);
        self.splice_site(self.filter_start_bytepos..self.info_start_bytepos, bytes);
        Ok(())
    }

    /// Rewrite a variable-length part of the site in place.
    ///
    /// INFO spans are relative to the start of the INFO section and stay valid.
    fn splice_site(&mut self, range: Range<usize>, bytes: Vec<u8>) {
        let delta = bytes.len() as isize - range.len() as isize;
        let shift = |pos: usize| (pos as isize + delta) as usize;
        let start = range.start;
        self.shared.splice(range, bytes);
        if self.allele_start_bytepos > start {
            self.allele_start_bytepos = shift(self.allele_start_bytepos);
        }
        if self.filter_start_bytepos > start {
            self.filter_start_bytepos = shift(self.filter_start_bytepos);
        }
        self.info_start_bytepos = shift(self.info_start_bytepos);
    }

    /// For a given FORMAT tag, return one value per sample, or `None` if the
    /// record does not carry it.
    pub fn format(&self, tag: &str) -> Result<Option<Vec<FieldValue>>> {
        let (field, declaration) = self
            .header
            .format()
            .lookup(tag)
            .ok_or_else(|| BcfError::UnknownField(tag.to_owned()))?;
        let n_sample = self.n_sample();
        let mut input = &self.indiv[..];
        for _ in 0..self.n_fmt() {
            let (rest, (key, descriptor, payload)) =
                parser::format_field(n_sample, input).map_err(malformed("FORMAT"))?;
            input = rest;
            let matches = usize::try_from(key)
                .ok()
                .and_then(|key| self.header.format_for_key(key))
                == Some(field);
            if !matches {
                continue;
            }
            let width = descriptor.num_elements * descriptor.kind.width();
            return (0..n_sample)
                .map(|sample| {
                    let bytes = &payload[sample * width..(sample + 1) * width];
                    codec::decode_payload(&descriptor, bytes, declaration)
                })
                .collect::<Result<Vec<_>>>()
                .map(Some);
        }
        Ok(None)
    }

    /// Decoded `GT` of every sample; empty if the record carries no genotypes.
    pub fn genotypes(&self) -> Result<Vec<Vec<GenotypeAllele>>> {
        if !self.header.has_format("GT") {
            return Ok(vec![]);
        }
        let gts = self.format("GT")?.unwrap_or_default();
        Ok(gts
            .iter()
            .map(|gt| {
                gt.integer()
                    .unwrap_or_default()
                    .iter()
                    .cloned()
                    .map(GenotypeAllele::from)
                    .collect()
            })
            .collect())
    }
}

/// Renders the record as a VCF line without sample columns (POS is 1-based).
impl fmt::Display for BcfRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let or_dot = |s: String| if s.is_empty() { ".".to_owned() } else { s };
        let info = self
            .info_entries()
            .map(|(id, value)| match value.as_ref() {
                FieldValue::Flag(_) => id.to_owned(),
                value => format!("{}={}", id, value),
            })
            .join(";");
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.chrom(),
            self.pos() + 1,
            or_dot(self.id()),
            self.ref_allele(),
            or_dot(self.alt_alleles().join(",")),
            self.qual().map(|q| q.to_string()).unwrap_or_else(|| ".".into()),
            or_dot(self.filters().join(";")),
            or_dot(info),
        )
    }
}

/// Phased or unphased alleles, represented as indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenotypeAllele {
    Unphased(i32),
    Phased(i32),
    UnphasedMissing,
    PhasedMissing,
}

impl From<i32> for GenotypeAllele {
    /// Decode given integer according to BCF standard.
    fn from(encoded: i32) -> Self {
        match (encoded, encoded & 1) {
            (MISSING_INTEGER, _) | (0, 0) => GenotypeAllele::UnphasedMissing,
            (1, 1) => GenotypeAllele::PhasedMissing,
            (e, 1) => GenotypeAllele::Phased((e >> 1) - 1),
            (e, _) => GenotypeAllele::Unphased((e >> 1) - 1),
        }
    }
}

impl GenotypeAllele {
    /// Get the index into the list of alleles.
    pub fn index(self) -> Option<u32> {
        match self {
            GenotypeAllele::Unphased(i) | GenotypeAllele::Phased(i) => Some(i as u32),
            GenotypeAllele::UnphasedMissing | GenotypeAllele::PhasedMissing => None,
        }
    }
}
