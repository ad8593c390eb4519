//! Illumina sample sheets in the bcl2fastq v2 (IEM v4) layout.

use anyhow::Result;
use bio::alphabets::dna::revcomp;
use chrono::NaiveDate;
use itertools::Itertools;
use lims_types::InstrumentModel;
use serde::Serialize;
use std::io::Write;

/// Replace every character bcl2fastq does not accept in a sample name.
pub fn scrub_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSheetRow {
    #[serde(rename = "Lane")]
    pub lane: u8,
    #[serde(rename = "Sample_ID")]
    pub sample_id: String,
    #[serde(rename = "Sample_Name")]
    pub sample_name: String,
    #[serde(rename = "Sample_Plate")]
    pub sample_plate: String,
    #[serde(rename = "Sample_Well")]
    pub sample_well: String,
    #[serde(rename = "I7_Index_ID")]
    pub i7_index_id: String,
    #[serde(rename = "index")]
    pub index: String,
    #[serde(rename = "I5_Index_ID")]
    pub i5_index_id: String,
    #[serde(rename = "index2")]
    pub index2: String,
    #[serde(rename = "Sample_Project")]
    pub sample_project: String,
    #[serde(rename = "Description")]
    pub description: String,
}

/// A shotgun library and the index pair it was prepared with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedLibrary {
    pub sample_name: String,
    pub plate: String,
    pub well: String,
    pub i7_name: String,
    pub i7_sequence: String,
    pub i5_name: String,
    pub i5_sequence: String,
    pub project: String,
}

/// One row per library, with the i5 sequence as the instrument reads it.
/// A sample with more than one library in the lane gets its ids qualified
/// by plate and well.
pub fn shotgun_rows(
    lane: u8,
    libraries: &[IndexedLibrary],
    instrument: InstrumentModel,
) -> Vec<SampleSheetRow> {
    let counts = libraries
        .iter()
        .map(|lib| scrub_name(&lib.sample_name))
        .counts();
    libraries
        .iter()
        .map(|lib| {
            let index2 = if instrument.reverse_complements_i5() {
                String::from_utf8_lossy(&revcomp(lib.i5_sequence.as_bytes())).into_owned()
            } else {
                lib.i5_sequence.clone()
            };
            let name = scrub_name(&lib.sample_name);
            let sample_id = if counts[&name] > 1 {
                scrub_name(&format!("{}.{}.{}", lib.sample_name, lib.plate, lib.well))
            } else {
                name.clone()
            };
            SampleSheetRow {
                lane,
                sample_id,
                sample_name: name,
                sample_plate: scrub_name(&lib.plate),
                sample_well: lib.well.clone(),
                i7_index_id: lib.i7_name.clone(),
                index: lib.i7_sequence.clone(),
                i5_index_id: lib.i5_name.clone(),
                index2,
                sample_project: scrub_name(&lib.project),
                description: String::new(),
            }
        })
        .collect()
}

/// Amplicon pools are demultiplexed downstream, so the pool is one
/// unindexed sample.
pub fn amplicon_row(lane: u8, pool_name: &str, project: &str) -> SampleSheetRow {
    let name = scrub_name(pool_name);
    SampleSheetRow {
        lane,
        sample_id: name.clone(),
        sample_name: name,
        sample_plate: String::new(),
        sample_well: String::new(),
        i7_index_id: String::new(),
        index: String::new(),
        i5_index_id: String::new(),
        index2: String::new(),
        sample_project: scrub_name(project),
        description: pool_name.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleSheet {
    pub investigator: String,
    pub experiment: String,
    pub run_name: String,
    pub date: NaiveDate,
    pub assay: String,
    pub chemistry: String,
    pub fwd_cycles: u32,
    pub rev_cycles: u32,
    pub contacts: Vec<String>,
    pub rows: Vec<SampleSheetRow>,
}

impl SampleSheet {
    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, "[Header]")?;
        writeln!(writer, "IEMFileVersion,4")?;
        writeln!(writer, "Investigator Name,{}", self.investigator)?;
        writeln!(writer, "Experiment Name,{}", self.experiment)?;
        writeln!(writer, "Date,{}", self.date.format("%m/%d/%Y"))?;
        writeln!(writer, "Workflow,GenerateFASTQ")?;
        writeln!(writer, "Application,FASTQ Only")?;
        writeln!(writer, "Assay,{}", self.assay)?;
        writeln!(writer, "Description,{}", self.run_name)?;
        writeln!(writer, "Chemistry,{}", self.chemistry)?;
        writeln!(writer)?;
        writeln!(writer, "[Reads]")?;
        writeln!(writer, "{}", self.fwd_cycles)?;
        if self.rev_cycles > 0 {
            writeln!(writer, "{}", self.rev_cycles)?;
        }
        writeln!(writer)?;
        writeln!(writer, "[Settings]")?;
        writeln!(writer, "ReverseComplement,0")?;
        for contact in &self.contacts {
            writeln!(writer, "Contact,{contact}")?;
        }
        writeln!(writer)?;
        writeln!(writer, "[Data]")?;

        let mut wtr = csv::Writer::from_writer(writer);
        if self.rows.is_empty() {
            wtr.write_record([
                "Lane",
                "Sample_ID",
                "Sample_Name",
                "Sample_Plate",
                "Sample_Well",
                "I7_Index_ID",
                "index",
                "I5_Index_ID",
                "index2",
                "Sample_Project",
                "Description",
            ])?;
        }
        for row in &self.rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn to_text(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn library() -> IndexedLibrary {
        IndexedLibrary {
            sample_name: "1.SKB1.640202".to_string(),
            plate: "Shotgun plate 1".to_string(),
            well: "A1".to_string(),
            i7_name: "iTru7_101_01".to_string(),
            i7_sequence: "ACGTTACC".to_string(),
            i5_name: "iTru5_01_A".to_string(),
            i5_sequence: "ACCGACAA".to_string(),
            project: "LabControl test".to_string(),
        }
    }

    #[test]
    fn test_scrub_name() {
        assert_eq!(scrub_name("1.SKB1.640202"), "1_SKB1_640202");
        assert_eq!(scrub_name("pool-1 (a)"), "pool-1__a_");
    }

    #[test]
    fn test_i5_orientation() {
        let miseq = shotgun_rows(1, &[library()], InstrumentModel::MiSeq);
        assert_eq!(miseq[0].index2, "ACCGACAA");
        let nextseq = shotgun_rows(1, &[library()], InstrumentModel::NextSeq);
        assert_eq!(nextseq[0].index2, "TTGTCGGT");
        assert_eq!(nextseq[0].index, "ACGTTACC");
        assert_eq!(nextseq[0].sample_id, "1_SKB1_640202");
        assert_eq!(nextseq[0].sample_plate, "Shotgun_plate_1");
    }

    #[test]
    fn test_repeated_sample_ids_qualified() {
        let mut replated = library();
        replated.plate = "Shotgun plate 2".to_string();
        replated.well = "B3".to_string();
        let mut other = library();
        other.sample_name = "1.SKB2.640194".to_string();
        let rows = shotgun_rows(1, &[library(), replated, other], InstrumentModel::NextSeq);
        let ids: Vec<_> = rows.iter().map(|r| r.sample_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "1_SKB1_640202_Shotgun_plate_1_A1",
                "1_SKB1_640202_Shotgun_plate_2_B3",
                "1_SKB2_640194"
            ]
        );
        assert_eq!(rows[1].sample_name, "1_SKB1_640202");
    }

    #[test]
    fn test_write_sheet() {
        let sheet = SampleSheet {
            investigator: "knightlab".to_string(),
            experiment: "exp 1".to_string(),
            run_name: "run1".to_string(),
            date: NaiveDate::from_ymd_opt(2017, 10, 25).unwrap(),
            assay: "TruSeq HT".to_string(),
            chemistry: "Amplicon".to_string(),
            fwd_cycles: 151,
            rev_cycles: 151,
            contacts: vec!["a@example.com".to_string()],
            rows: vec![amplicon_row(1, "Test pool 1", "proj")],
        };
        let text = sheet.to_text().unwrap();
        assert!(text.starts_with("[Header]\nIEMFileVersion,4\n"));
        assert!(text.contains("Date,10/25/2017\n"));
        assert!(text.contains("[Reads]\n151\n151\n\n[Settings]\n"));
        let data = text.split("[Data]\n").nth(1).unwrap();
        let lines: Vec<_> = data.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Lane,Sample_ID,Sample_Name,Sample_Plate,Sample_Well,I7_Index_ID,index,\
                 I5_Index_ID,index2,Sample_Project,Description",
                "1,Test_pool_1,Test_pool_1,,,,,,,proj,Test pool 1",
            ]
        );
    }
}
