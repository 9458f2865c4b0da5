use std::io::{self, Read};
use std::mem::size_of;
use std::path::Path;

use anyhow::{bail, Context};
use log::{debug, info};

use crate::error::{BcfError, Result};
use crate::header::{Header, HeaderRef};
use crate::parser;
use crate::record::BcfRecord;
use crate::types::{BCF_MAJOR_VERSION, BCF_MINOR_VERSIONS};

/// Iterator over the records of a BCF stream.
///
/// The header is read eagerly by [`BcfRecords::new`]; every record handed out
/// shares it.
pub struct BcfRecords<R: Read> {
    header: HeaderRef,
    length_buf: [u8; size_of::<u32>() * 2],
    record_buf: Vec<u8>,
    inner: Box<R>,
    done: bool,
}

impl BcfRecords<Box<dyn Read>> {
    /// Open a plain or gzip/BGZF-compressed BCF file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let (reader, format) = niffler::from_path(path)
            .with_context(|| format!("cannot open {}", path.display()))?;
        debug!("reading {} ({:?})", path.display(), format);
        Self::new(reader)
    }
}

impl<R: Read> BcfRecords<R> {
    pub fn new(mut reader: R) -> anyhow::Result<Self> {
        let mut input = [0u8; 5];
        reader
            .read_exact(&mut input)
            .context("cannot read BCF magic")?;
        let (_, version) = parser::bcf_version(&input)
            .map_err(|_| BcfError::MalformedHeader("not a BCF stream".into()))?;
        if version.major != BCF_MAJOR_VERSION || !BCF_MINOR_VERSIONS.contains(&version.minor) {
            bail!(
                "unsupported BCF version {}.{}",
                version.major,
                version.minor
            );
        }

        let mut input = [0u8; size_of::<u32>()];
        reader.read_exact(&mut input)?;
        let (_, header_length) = parser::header_length(&input)
            .map_err(|_| BcfError::MalformedHeader("cannot read header length".into()))?;

        let mut input = vec![0u8; header_length as usize];
        reader
            .read_exact(&mut input)
            .context("truncated header")?;
        let end = input.iter().position(|&b| b == 0).unwrap_or(input.len());
        let text = std::str::from_utf8(&input[..end])
            .map_err(|e| BcfError::MalformedHeader(e.to_string()))?;
        let header = Header::from_text(text)?;
        info!(
            "BCF {}.{} with {} samples, {} INFO and {} FORMAT fields",
            version.major,
            version.minor,
            header.n_samples(),
            header.info().len(),
            header.format().len()
        );

        Ok(Self {
            header: HeaderRef::new(header),
            length_buf: [0u8; size_of::<u32>() * 2],
            record_buf: Vec::new(),
            inner: Box::new(reader),
            done: false,
        })
    }

    pub fn header(&self) -> &Header {
        self.header.as_ref()
    }

    pub fn header_ref(&self) -> &HeaderRef {
        &self.header
    }

    /// Interpret the remaining records against `header`, an extension of the
    /// current one (new fields may be declared, existing ones must keep their keys).
    pub fn set_header(&mut self, header: Header) -> Result<()> {
        header.check_extends(&self.header)?;
        self.header = HeaderRef::new(header);
        Ok(())
    }

    fn read_record(&mut self) -> Result<Option<BcfRecord>> {
        // only a stream ending exactly between two blocks is a clean end
        loop {
            match self.inner.read(&mut self.length_buf[..1]) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.inner
            .read_exact(&mut self.length_buf[1..])
            .map_err(|e| truncated(e, "truncated record length"))?;
        let (_, (l_shared, l_indiv)) = parser::record_length(&self.length_buf)
            .map_err(|_| BcfError::MalformedRecord("cannot read block lengths".into()))?;
        let (l_shared, l_indiv) = (l_shared as usize, l_indiv as usize);
        self.record_buf.resize(l_shared + l_indiv, 0);
        self.inner
            .read_exact(&mut self.record_buf)
            .map_err(|e| truncated(e, "truncated record"))?;
        let (shared, indiv) = self.record_buf.split_at(l_shared);
        BcfRecord::new(shared.to_vec(), indiv.to_vec(), self.header.clone()).map(Some)
    }
}

fn truncated(e: io::Error, what: &str) -> BcfError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        BcfError::MalformedRecord(what.to_owned())
    } else {
        e.into()
    }
}

impl<R: Read> Iterator for BcfRecords<R> {
    type Item = Result<BcfRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let record = self.read_record().transpose();
        if !matches!(record, Some(Ok(_))) {
            self.done = true;
        }
        record
    }
}
