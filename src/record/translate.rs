use std::convert::TryFrom;

use log::debug;

use super::info::InfoSlot;
use super::{malformed, BcfRecord, CHROM_BYTE_RANGE};
use crate::codec::write_ints;
use crate::error::{BcfError, Result};
use crate::header::{Header, HeaderRef};
use crate::parser::{self, typed_int};
use crate::registry::{FieldIndex, TypeDeclaration};

fn incompatible(what: String) -> BcfError {
    BcfError::IncompatibleHeader(what)
}

fn same_shape(a: &TypeDeclaration, b: &TypeDeclaration) -> bool {
    a.kind() == b.kind() && a.number() == b.number()
}

impl BcfRecord {
    /// Re-express this record against `header`, typically an extension of the
    /// header it was read with.
    ///
    /// Contig, FILTER, INFO and FORMAT references are resolved by name. Every
    /// name the record uses must exist in `header` with the same type and
    /// number, otherwise `IncompatibleHeader` is returned and the record is
    /// left untouched. Fields only `header` declares become settable.
    pub fn translate(&mut self, header: HeaderRef) -> Result<()> {
        if HeaderRef::ptr_eq(&self.header, &header) {
            return Ok(());
        }

        let chrom = self.chrom().to_owned();
        let rid = header
            .contig_rid(&chrom)
            .ok_or_else(|| incompatible(format!("contig {} missing", chrom)))?;

        let filter_keys = self
            .filters()
            .into_iter()
            .map(|id| {
                header
                    .filter_key(id)
                    .map(|key| key as i32)
                    .ok_or_else(|| incompatible(format!("FILTER/{} missing", id)))
            })
            .collect::<Result<Vec<_>>>()?;
        let filter_bytes = if filter_keys == self.filter_keys() {
            None
        } else {
            let mut bytes = Vec::new();
            write_ints(&filter_keys, &mut bytes);
            Some(bytes)
        };

        let (moves, keys_changed) = self.info_moves(&header)?;
        let indiv = self.translate_indiv(&header)?;

        // nothing below can fail
        self.shared[CHROM_BYTE_RANGE].copy_from_slice(&(rid as i32).to_le_bytes());
        if let Some(bytes) = filter_bytes {
            self.splice_site(self.filter_start_bytepos..self.info_start_bytepos, bytes);
        }
        if let Some(indiv) = indiv {
            self.indiv = indiv;
        }
        let mut old_slots = std::mem::take(&mut self.info.slots);
        let mut slots: Vec<InfoSlot> =
            (0..header.info().len()).map(|_| InfoSlot::Absent).collect();
        for (old, new) in moves {
            slots[new.get()] = std::mem::replace(&mut old_slots[old.get()], InfoSlot::Absent);
        }
        self.info.slots = slots;
        if keys_changed {
            self.info.dirty = true;
        }
        debug!(
            "translated record at {}:{} to a header with {} INFO fields",
            chrom,
            self.pos(),
            header.info().len()
        );
        self.header = header;
        Ok(())
    }

    /// Where each present INFO field lives in `header`, and whether any
    /// dictionary key changes on the way.
    fn info_moves(&self, header: &Header) -> Result<(Vec<(FieldIndex, FieldIndex)>, bool)> {
        let old_registry = self.header.info();
        let mut moves = Vec::new();
        let mut keys_changed = false;
        for (i, slot) in self.info.slots.iter().enumerate() {
            if matches!(slot, InfoSlot::Absent) {
                continue;
            }
            let old = FieldIndex(i);
            let declaration = old_registry
                .get(old)
                .ok_or_else(|| incompatible(format!("INFO slot {} has no declaration", i)))?;
            let new = match header.info().lookup(declaration.id()) {
                Some((new, d)) if same_shape(d, declaration) => new,
                _ => {
                    return Err(incompatible(format!(
                        "INFO/{} missing or redeclared",
                        declaration.id()
                    )))
                }
            };
            keys_changed |= self.header.info_key(old) != header.info_key(new);
            moves.push((old, new));
        }
        Ok((moves, keys_changed))
    }

    /// The `indiv` block with its FORMAT keys rewritten for `header`, or `None`
    /// if every key stays the same.
    fn translate_indiv(&self, header: &Header) -> Result<Option<Vec<u8>>> {
        let n_fmt = self.n_fmt();
        if n_fmt == 0 {
            return Ok(None);
        }
        let n_sample = self.n_sample();
        if header.n_samples() != n_sample {
            return Err(incompatible(format!(
                "{} samples in record, {} in header",
                n_sample,
                header.n_samples()
            )));
        }

        let mut indiv = Vec::with_capacity(self.indiv.len());
        let mut changed = false;
        let mut input = &self.indiv[..];
        for _ in 0..n_fmt {
            let (after_key, key) = typed_int(input).map_err(malformed("FORMAT key"))?;
            let (rest, _) = parser::format_field(n_sample, input).map_err(malformed("FORMAT"))?;
            let value = &after_key[..after_key.len() - rest.len()];
            input = rest;

            let undeclared =
                || BcfError::MalformedRecord(format!("FORMAT key {} is not declared", key));
            let declaration = usize::try_from(key)
                .ok()
                .and_then(|key| self.header.format_for_key(key))
                .and_then(|old| self.header.format().get(old))
                .ok_or_else(undeclared)?;
            let new = match header.format().lookup(declaration.id()) {
                Some((new, d)) if same_shape(d, declaration) => new,
                _ => {
                    return Err(incompatible(format!(
                        "FORMAT/{} missing or redeclared",
                        declaration.id()
                    )))
                }
            };
            let new_key = header.format_key(new) as i32;
            changed |= new_key != key;
            write_ints(&[new_key], &mut indiv);
            indiv.extend_from_slice(value);
        }
        Ok(if changed { Some(indiv) } else { None })
    }
}
