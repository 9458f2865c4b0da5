use std::borrow::Cow;
use std::cell::OnceCell;
use std::convert::TryFrom;
use std::ops::Range;

use log::{trace, warn};

use super::{BcfRecord, N_INFO_BYTE_RANGE};
use crate::codec::{self, write_ints};
use crate::error::{BcfError, Result};
use crate::header::Header;
use crate::parser::{typed_int, typed_payload};
use crate::registry::{FieldIndex, TypeDeclaration};
use crate::types::FieldValue;

/// State of one declared INFO field within a record.
#[derive(Debug)]
pub(super) enum InfoSlot {
    Absent,
    /// Still encoded; `span` covers the typed value relative to the INFO section.
    Encoded {
        span: Range<usize>,
        cache: OnceCell<FieldValue>,
    },
    /// Set since the last serialization.
    Modified(FieldValue),
}

/// INFO values of a record, indexed densely by [`FieldIndex`].
#[derive(Debug)]
pub(super) struct InfoTable {
    pub(super) slots: Vec<InfoSlot>,
    /// Keys present in the block but not declared as INFO fields.
    pub(super) stray: Vec<i32>,
    pub(super) dirty: bool,
}

impl InfoTable {
    /// Index the `n_info` key/value pairs of an INFO section without decoding values.
    pub(super) fn scan(section: &[u8], n_info: usize, header: &Header) -> Result<Self> {
        let mut slots: Vec<InfoSlot> = (0..header.info().len()).map(|_| InfoSlot::Absent).collect();
        let mut stray = Vec::new();
        let mut input = section;
        for _ in 0..n_info {
            let (rest, key) = typed_int(input)
                .map_err(|_| BcfError::MalformedRecord("cannot read INFO key".into()))?;
            let start = section.len() - rest.len();
            let (rest, _) = typed_payload(rest)
                .map_err(|_| BcfError::MalformedRecord("truncated INFO value".into()))?;
            let span = start..section.len() - rest.len();
            input = rest;

            match usize::try_from(key).ok().and_then(|k| header.info_for_key(k)) {
                Some(field) => {
                    let slot = &mut slots[field.get()];
                    if !matches!(slot, InfoSlot::Absent) {
                        return Err(BcfError::MalformedRecord(format!(
                            "INFO key {} appears twice",
                            key
                        )));
                    }
                    *slot = InfoSlot::Encoded {
                        span,
                        cache: OnceCell::new(),
                    };
                }
                None => {
                    warn!("INFO key {} is not declared in the header, ignoring it", key);
                    stray.push(key);
                }
            }
        }
        if !input.is_empty() {
            return Err(BcfError::MalformedRecord(format!(
                "{} bytes after the last INFO field",
                input.len()
            )));
        }
        // stray pairs are dropped by the next serialization
        let dirty = !stray.is_empty();
        Ok(InfoTable {
            slots,
            stray,
            dirty,
        })
    }
}

impl BcfRecord {
    fn info_section(&self) -> &[u8] {
        &self.shared[self.info_start_bytepos..]
    }

    fn resolve_info(&self, id: &str) -> Result<(FieldIndex, &TypeDeclaration)> {
        self.header
            .info()
            .lookup(id)
            .ok_or_else(|| BcfError::UnknownField(id.to_owned()))
    }

    /// Whether the record carries INFO field `id`.
    ///
    /// Fails with `UnknownField` if the header does not declare `id`, so that a
    /// misspelt id is not mistaken for an absent field.
    pub fn has_info(&self, id: &str) -> Result<bool> {
        let (field, _) = self.resolve_info(id)?;
        Ok(!matches!(self.info.slots[field.get()], InfoSlot::Absent))
    }

    /// The value of INFO field `id`, decoded on first access, or `None` if the
    /// record does not carry it.
    ///
    /// # Examples
    ///
    /// ```
    /// use bcf_record::{BcfRecord, FieldValue, Header, HeaderRef, TypeDeclaration};
    ///
    /// let mut header = Header::empty();
    /// header.add_contig("chr1", None).unwrap();
    /// header
    ///     .add_info(TypeDeclaration::try_from(vec![
    ///         ("ID", "DP"),
    ///         ("Number", "1"),
    ///         ("Type", "Integer"),
    ///         ("Description", "Total depth"),
    ///     ]).unwrap())
    ///     .unwrap();
    /// let header = HeaderRef::new(header);
    /// let mut record = BcfRecord::from_site(header, "chr1", 0, &["A", "C"]).unwrap();
    /// assert_eq!(record.info("DP").unwrap(), None);
    /// record.set_info("DP", 14).unwrap();
    /// assert_eq!(record.info("DP").unwrap(), Some(&FieldValue::Integer(vec![14])));
    /// assert!(record.info("NOPE").is_err());
    /// ```
    pub fn info(&self, id: &str) -> Result<Option<&FieldValue>> {
        let (field, declaration) = self.resolve_info(id)?;
        match &self.info.slots[field.get()] {
            InfoSlot::Absent => Ok(None),
            InfoSlot::Modified(value) => Ok(Some(value)),
            InfoSlot::Encoded { span, cache } => {
                if let Some(value) = cache.get() {
                    return Ok(Some(value));
                }
                trace!("decoding INFO/{}", id);
                let value = codec::decode(&self.info_section()[span.clone()], declaration)?;
                Ok(Some(cache.get_or_init(|| value)))
            }
        }
    }

    /// Set INFO field `id`.
    ///
    /// Scalars are accepted for single-valued fields and stored as one-element
    /// vectors. Setting a flag to `false` removes it. Nothing changes if the
    /// value does not fit the declaration. The encoded block is only rewritten
    /// by [`BcfRecord::serialize`].
    pub fn set_info<V: Into<FieldValue>>(&mut self, id: &str, value: V) -> Result<()> {
        let value = value.into();
        let field = {
            let (field, declaration) = self.resolve_info(id)?;
            codec::validate(&value, declaration)?;
            field
        };
        self.info.slots[field.get()] = match value {
            FieldValue::Flag(false) => InfoSlot::Absent,
            value => InfoSlot::Modified(value),
        };
        self.info.dirty = true;
        Ok(())
    }

    /// Remove INFO field `id` from the record.
    pub fn clear_info(&mut self, id: &str) -> Result<()> {
        let (field, _) = self.resolve_info(id)?;
        if !matches!(self.info.slots[field.get()], InfoSlot::Absent) {
            self.info.slots[field.get()] = InfoSlot::Absent;
            self.info.dirty = true;
        }
        Ok(())
    }

    /// Whether INFO changes are pending that [`BcfRecord::raw_info_block`] does not reflect yet.
    pub fn is_dirty(&self) -> bool {
        self.info.dirty
    }

    /// The encoded INFO section as of the last serialization (or construction).
    pub fn raw_info_block(&self) -> &[u8] {
        self.info_section()
    }

    /// Present INFO fields in declaration order, decoding (without caching) the
    /// ones that were never accessed.
    pub(super) fn info_entries(&self) -> impl Iterator<Item = (&str, Cow<'_, FieldValue>)> {
        let registry = self.header.info();
        self.info
            .slots
            .iter()
            .enumerate()
            .filter_map(move |(i, slot)| {
                let declaration = registry.get(FieldIndex(i))?;
                let value = match slot {
                    InfoSlot::Absent => return None,
                    InfoSlot::Modified(value) => Cow::Borrowed(value),
                    InfoSlot::Encoded { span, cache } => match cache.get() {
                        Some(value) => Cow::Borrowed(value),
                        None => {
                            let bytes = &self.info_section()[span.clone()];
                            match codec::decode(bytes, declaration) {
                                Ok(value) => Cow::Owned(value),
                                Err(e) => {
                                    warn!("{}", e);
                                    return None;
                                }
                            }
                        }
                    },
                };
                Some((declaration.id().as_str(), value))
            })
    }

    /// Write every present INFO field back into a fresh block and return the
    /// complete record block (`l_shared`, `l_indiv`, `shared`, `indiv`).
    ///
    /// Fields are emitted in declaration order. Untouched fields are copied
    /// byte for byte; modified fields are encoded. Undeclared pairs found at
    /// construction are dropped. On error the record is left unchanged.
    pub fn serialize(&mut self) -> Result<Vec<u8>> {
        let mut section = Vec::with_capacity(self.info_section().len());
        let mut spans = Vec::with_capacity(self.info.slots.len());
        let mut n_info = 0usize;
        for (i, slot) in self.info.slots.iter().enumerate() {
            let field = FieldIndex(i);
            if let InfoSlot::Absent = slot {
                spans.push(None);
                continue;
            }
            let key = self.header.info_key(field);
            write_ints(&[key as i32], &mut section);
            let start = section.len();
            match slot {
                InfoSlot::Encoded { span, .. } => {
                    section.extend_from_slice(&self.info_section()[span.clone()])
                }
                InfoSlot::Modified(value) => {
                    let declaration = self
                        .header
                        .info()
                        .get(field)
                        .ok_or_else(|| BcfError::UnknownField(format!("#{}", i)))?;
                    codec::encode_into(value, declaration, &mut section)?;
                }
                InfoSlot::Absent => unreachable!(),
            }
            spans.push(Some(start..section.len()));
            n_info += 1;
        }
        let n_info = u16::try_from(n_info)
            .map_err(|_| BcfError::MalformedRecord(format!("{} INFO fields", n_info)))?;
        let l_shared = u32::try_from(self.info_start_bytepos + section.len())
            .map_err(|_| BcfError::MalformedRecord("shared block exceeds 4GiB".into()))?;
        let l_indiv = u32::try_from(self.indiv.len())
            .map_err(|_| BcfError::MalformedRecord("indiv block exceeds 4GiB".into()))?;

        if !self.info.stray.is_empty() {
            warn!(
                "dropping {} undeclared INFO fields at {}:{}",
                self.info.stray.len(),
                self.chrom(),
                self.pos() + 1
            );
        }
        trace!("serializing {} INFO fields", n_info);

        self.shared.truncate(self.info_start_bytepos);
        self.shared.extend_from_slice(&section);
        self.shared[N_INFO_BYTE_RANGE].copy_from_slice(&n_info.to_le_bytes());
        let slots = std::mem::take(&mut self.info.slots);
        self.info.slots = slots
            .into_iter()
            .zip(spans)
            .map(|(slot, span)| match (slot, span) {
                (InfoSlot::Encoded { cache, .. }, Some(span)) => InfoSlot::Encoded { span, cache },
                (InfoSlot::Modified(value), Some(span)) => InfoSlot::Encoded {
                    span,
                    cache: OnceCell::from(value),
                },
                _ => InfoSlot::Absent,
            })
            .collect();
        self.info.stray.clear();
        self.info.dirty = false;

        let mut block = Vec::with_capacity(8 + self.shared.len() + self.indiv.len());
        block.extend_from_slice(&l_shared.to_le_bytes());
        block.extend_from_slice(&l_indiv.to_le_bytes());
        block.extend_from_slice(&self.shared);
        block.extend_from_slice(&self.indiv);
        Ok(block)
    }
}
