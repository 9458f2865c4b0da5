pub mod codec;
pub mod error;
pub mod header;
pub(crate) mod parser;
pub mod reader;
pub mod record;
pub mod registry;
pub mod types;
pub mod writer;

pub use error::{BcfError, Result};
pub use header::{Header, HeaderRef};
pub use reader::BcfRecords;
pub use record::{BcfRecord, GenotypeAllele};
pub use registry::{FieldIndex, TypeDeclaration, TypeRegistry};
pub use types::{missing_float, FieldType, FieldValue, Number, MISSING_INTEGER};
pub use writer::BcfWriter;

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::io::Cursor;

    use super::*;

    const HEADER: &str = "##fileformat=VCFv4.2
##FILTER=<ID=PASS,Description=\"All filters passed\",IDX=0>
##FILTER=<ID=LowQual,Description=\"Low quality\",IDX=1>
##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total depth\",IDX=2>
##INFO=<ID=AF,Number=A,Type=Float,Description=\"Allele frequency\",IDX=3>
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\",IDX=4>
##contig=<ID=chr1,length=248956422,IDX=0>
##contig=<ID=chr2,length=242193529,IDX=1>
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tHG001\tHG002\tHG003
";

    /// A small BCF stream with three records on chr1 and one on chr2.
    fn example() -> Vec<u8> {
        let header = HeaderRef::new(Header::from_text(HEADER).unwrap());
        let mut writer = BcfWriter::new(Vec::new(), header.clone()).unwrap();
        for (chrom, pos, alleles, af) in [
            ("chr1", 100, vec!["A", "G"], Some(vec![0.5f32])),
            ("chr1", 250, vec!["C", "T", "CT"], Some(vec![0.1f32, 0.2])),
            ("chr1", 250, vec!["C", "G"], None),
            ("chr2", 7, vec!["T", "A"], Some(vec![1.0f32])),
        ] {
            let mut record = BcfRecord::from_site(header.clone(), chrom, pos, &alleles).unwrap();
            record.set_info("DP", pos as i32 / 10).unwrap();
            if let Some(af) = af {
                record.set_info("AF", af).unwrap();
            }
            record.set_qual(Some(30.0));
            writer.write(&mut record).unwrap();
        }
        writer.into_inner().unwrap()
    }

    #[test]
    fn test_samples() {
        let records = BcfRecords::new(Cursor::new(example())).unwrap();
        assert_eq!(records.header().samples(), vec!["HG001", "HG002", "HG003"]);
    }

    #[test]
    fn test_basics() {
        for record in BcfRecords::new(Cursor::new(example())).unwrap() {
            let record = record.unwrap();
            assert!(!record.chrom().is_empty());
            assert!(record.end() >= record.start());
            assert_eq!(record.qual(), Some(30.0));
        }
    }

    #[test]
    fn test_info_fields() {
        let records = BcfRecords::new(Cursor::new(example())).unwrap();
        let mut seen = 0;
        for record in records {
            let record = record.unwrap();
            if record.has_info("AF").unwrap() {
                let af = record.info("AF").unwrap().unwrap();
                assert_eq!(af.len(), record.alt_alleles().len());
                assert!(af.float().is_some());
                seen += 1;
            }
            assert!(matches!(
                record.has_info("NONEXISTENT_FIELD"),
                Err(BcfError::UnknownField(_))
            ));
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_positions_are_ordered() {
        let sites: Vec<(String, u32)> = BcfRecords::new(Cursor::new(example()))
            .unwrap()
            .map(|r| r.map(|r| (r.chrom().to_owned(), r.pos())))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(sites.len(), 4);
        for pair in sites.windows(2) {
            if pair[0].0 == pair[1].0 {
                assert!(pair[1].1 >= pair[0].1);
            }
        }
    }

    #[test]
    fn test_extend_header_and_set_info() {
        let mut records = BcfRecords::new(Cursor::new(example())).unwrap();
        let mut header = records.header().clone();
        let declaration = |pairs: &[(&str, &str)]| {
            let map: HashMap<String, String> = pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            TypeDeclaration::try_from(&map).unwrap()
        };
        header
            .add_info(declaration(&[
                ("ID", "TEST_INFO"),
                ("Number", "1"),
                ("Type", "Float"),
                ("Description", "Test info field"),
            ]))
            .unwrap();
        header
            .add_info(declaration(&[
                ("ID", "TEST_FLAG"),
                ("Number", "0"),
                ("Type", "Flag"),
                ("Description", "Test flag field"),
            ]))
            .unwrap();
        let text = header.to_string();
        assert!(text.contains("ID=TEST_INFO"));
        assert!(text.contains("ID=TEST_FLAG"));
        assert!(header.samples().iter().all(|s| s.starts_with("HG")));
        records.set_header(header).unwrap();

        let mut record = records.next().unwrap().unwrap();
        record.set_info("TEST_INFO", vec![1.0f32]).unwrap();
        record.set_info("TEST_FLAG", vec![true]).unwrap();
        assert!(record.to_string().ends_with("DP=10;AF=0.5;TEST_INFO=1;TEST_FLAG"));

        let block = record.serialize().unwrap();
        let reread = BcfRecord::from_block(&block, records.header_ref().clone()).unwrap();
        assert_eq!(
            reread.info("TEST_INFO").unwrap(),
            Some(&FieldValue::Float(vec![1.0]))
        );
        assert!(reread.has_info("TEST_FLAG").unwrap());
        assert_eq!(reread.info("AF").unwrap(), Some(&FieldValue::Float(vec![0.5])));
    }

    #[test]
    fn test_rewrite_stream_with_extended_header() {
        let input = BcfRecords::new(Cursor::new(example())).unwrap();
        let mut extended = input.header().clone();
        let nalt = TypeDeclaration::new("NALT", Number::Count(1), FieldType::Integer, "").unwrap();
        extended.add_info(nalt).unwrap();
        let extended = HeaderRef::new(extended);

        let mut writer = BcfWriter::new(Vec::new(), extended.clone()).unwrap();
        for record in input {
            let mut record = record.unwrap();
            record.translate(extended.clone()).unwrap();
            let n_alt = record.alt_alleles().len() as i32;
            record.set_info("NALT", n_alt).unwrap();
            writer.write(&mut record).unwrap();
        }
        let output = writer.into_inner().unwrap();

        let records = BcfRecords::new(Cursor::new(output))
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[1].info("NALT").unwrap(), Some(&FieldValue::Integer(vec![2])));
        assert_eq!(records[1].info("DP").unwrap(), Some(&FieldValue::Integer(vec![25])));
        assert_eq!(records[2].info("AF").unwrap(), None);
        assert_eq!(records[3].chrom(), "chr2");
    }
}
