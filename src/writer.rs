use std::io::Write;

use log::debug;

use crate::error::{BcfError, Result};
use crate::header::{Header, HeaderRef};
use crate::record::BcfRecord;
use crate::types::{BCF_MAGIC, BCF_MAJOR_VERSION, BCF_MINOR_VERSIONS};

/// Writes a BCF stream: the header once, then one block per record.
///
/// Records created against another header are translated to the writer's
/// header before they are serialized.
pub struct BcfWriter<W: Write> {
    header: HeaderRef,
    inner: W,
    written: usize,
}

impl<W: Write> BcfWriter<W> {
    pub fn new(mut inner: W, header: HeaderRef) -> Result<Self> {
        let text = header.to_bytes();
        let l_text = u32::try_from(text.len())
            .map_err(|_| BcfError::MalformedHeader("header text exceeds 4GiB".into()))?;
        inner.write_all(BCF_MAGIC)?;
        inner.write_all(&[BCF_MAJOR_VERSION, BCF_MINOR_VERSIONS[1]])?;
        inner.write_all(&l_text.to_le_bytes())?;
        inner.write_all(&text)?;
        debug!("wrote {} bytes of header text", text.len());
        Ok(Self {
            header,
            inner,
            written: 0,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Serialize `record` (applying pending INFO changes) and append it.
    pub fn write(&mut self, record: &mut BcfRecord) -> Result<()> {
        if !HeaderRef::ptr_eq(record.header_ref(), &self.header) {
            record.translate(self.header.clone())?;
        }
        let block = record.serialize()?;
        self.inner.write_all(&block)?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        debug!("wrote {} records", self.written);
        Ok(self.inner)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::reader::BcfRecords;
    use crate::registry::TypeDeclaration;
    use crate::types::FieldValue;
    use std::io::Cursor;

    #[test]
    fn test_writes_header_and_translates_records() {
        let mut base = Header::empty();
        base.add_contig("chr1", None).unwrap();
        base.add_info(
            TypeDeclaration::try_from(vec![
                ("ID", "DP"),
                ("Number", "1"),
                ("Type", "Integer"),
                ("Description", "Depth"),
            ])
            .unwrap(),
        )
        .unwrap();
        let mut extended = base.clone();
        extended
            .add_info(
                TypeDeclaration::try_from(vec![
                    ("ID", "TAG"),
                    ("Number", "1"),
                    ("Type", "String"),
                    ("Description", "Tag"),
                ])
                .unwrap(),
            )
            .unwrap();
        let base = HeaderRef::new(base);
        let extended = HeaderRef::new(extended);

        let mut record = BcfRecord::from_site(base, "chr1", 1, &["C", "T"]).unwrap();
        record.set_info("DP", 9).unwrap();

        let mut writer = BcfWriter::new(Vec::new(), extended.clone()).unwrap();
        writer.write(&mut record).unwrap();
        let data = writer.into_inner().unwrap();
        assert_eq!(&data[..5], b"BCF\x02\x02");

        assert!(HeaderRef::ptr_eq(record.header_ref(), &extended));
        record.set_info("TAG", "x").unwrap();

        let mut records = BcfRecords::new(Cursor::new(data)).unwrap();
        assert!(records.header().has_info("TAG"));
        let reread = records.next().unwrap().unwrap();
        assert_eq!(reread.info("DP").unwrap(), Some(&FieldValue::Integer(vec![9])));
        assert_eq!(reread.info("TAG").unwrap(), None);
        assert!(records.next().is_none());
    }
}
