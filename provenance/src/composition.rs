//! Compositions: the typed content of a container at one point in time.
//!
//! A composition is a core record plus exactly one detail variant selected by
//! its kind tag. Compositions are never mutated; every lab step produces new
//! ones in new containers.

use lims_types::{CompositionId, ContainerId, PrimerSetId, ProcessId, ReagentId, ReagentKind};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// Plating content of an empty well.
pub const BLANK: &str = "blank";

/// Contents that are controls rather than samples. Controls may appear any
/// number of times and are never reported as duplicate platings.
pub const CONTROLS: &[&str] = &[BLANK, "empty", "vibrio.positive.control", "zymo.mock"];

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CompositionKind {
    Sample,
    Reagent,
    Primer,
    Pool,
    Gdna,
    CompressedGdna,
    NormalizedGdna,
    #[serde(rename = "library_16s")]
    #[strum(to_string = "library_16s")]
    Library16S,
    LibraryShotgun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SampleKind {
    Sample,
    Blank,
    Control,
}

/// What was plated into a well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleDetail {
    pub content: String,
    /// Registry identifier; only real samples carry one.
    pub sample_id: Option<String>,
    pub kind: SampleKind,
}

impl SampleDetail {
    /// Interpret the content typed into a plating layout. An empty value is
    /// a blank.
    pub fn from_plating_content(content: &str) -> Self {
        let content = content.trim();
        if content.is_empty() {
            return SampleDetail {
                content: BLANK.to_string(),
                sample_id: None,
                kind: SampleKind::Blank,
            };
        }
        let lower = content.to_ascii_lowercase();
        let kind = if lower == BLANK || lower.starts_with("blank.") {
            SampleKind::Blank
        } else if CONTROLS.contains(&lower.as_str()) {
            SampleKind::Control
        } else {
            SampleKind::Sample
        };
        SampleDetail {
            content: content.to_string(),
            sample_id: (kind == SampleKind::Sample).then(|| content.to_string()),
            kind,
        }
    }

    pub fn is_control(&self) -> bool {
        self.kind != SampleKind::Sample
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PrimerRead {
    I5,
    I7,
    /// Barcoded amplicon primer, read as part of the insert.
    Amplicon,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimerDetail {
    pub primer_set: PrimerSetId,
    pub index_name: String,
    pub sequence: String,
    pub read: PrimerRead,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "composition_type", rename_all = "snake_case")]
pub enum CompositionDetail {
    Sample(SampleDetail),
    Reagent {
        reagent: ReagentId,
        lot: String,
        reagent_type: ReagentKind,
    },
    Primer(PrimerDetail),
    Pool {
        name: String,
        is_pool_of_pools: bool,
        /// Volume weighted mean concentration of the inputs at pooling time.
        estimated_concentration: f64,
    },
    Gdna,
    CompressedGdna,
    /// Sample and water dispensed into the normalized well.
    NormalizedGdna {
        dna_volume_nl: f64,
        water_volume_nl: f64,
    },
    #[serde(rename = "library_16s")]
    Library16S {
        /// Amplicon primer composition used for this library.
        primer: CompositionId,
        barcode: String,
    },
    LibraryShotgun {
        i5: CompositionId,
        i7: CompositionId,
    },
}

impl CompositionDetail {
    pub fn kind(&self) -> CompositionKind {
        match self {
            CompositionDetail::Sample(_) => CompositionKind::Sample,
            CompositionDetail::Reagent { .. } => CompositionKind::Reagent,
            CompositionDetail::Primer(_) => CompositionKind::Primer,
            CompositionDetail::Pool { .. } => CompositionKind::Pool,
            CompositionDetail::Gdna => CompositionKind::Gdna,
            CompositionDetail::CompressedGdna => CompositionKind::CompressedGdna,
            CompositionDetail::NormalizedGdna { .. } => CompositionKind::NormalizedGdna,
            CompositionDetail::Library16S { .. } => CompositionKind::Library16S,
            CompositionDetail::LibraryShotgun { .. } => CompositionKind::LibraryShotgun,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    pub id: CompositionId,
    pub container: ContainerId,
    pub upstream_process: ProcessId,
    pub total_volume_nl: f64,
    pub detail: CompositionDetail,
}

impl Composition {
    pub fn kind(&self) -> CompositionKind {
        self.detail.kind()
    }

    pub fn as_sample(&self) -> Option<&SampleDetail> {
        match &self.detail {
            CompositionDetail::Sample(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_primer(&self) -> Option<&PrimerDetail> {
        match &self.detail {
            CompositionDetail::Primer(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    #[test]
    fn test_plating_content() {
        let blank = SampleDetail::from_plating_content("  ");
        assert_eq!(blank.content, "blank");
        assert_eq!(blank.kind, SampleKind::Blank);
        assert_eq!(blank.sample_id, None);

        let named_blank = SampleDetail::from_plating_content("BLANK.plate1.A3");
        assert_eq!(named_blank.kind, SampleKind::Blank);
        assert_eq!(named_blank.content, "BLANK.plate1.A3");

        let control = SampleDetail::from_plating_content("zymo.mock");
        assert_eq!(control.kind, SampleKind::Control);
        assert!(control.is_control());

        let sample = SampleDetail::from_plating_content("1.SKB1.640202");
        assert_eq!(sample.kind, SampleKind::Sample);
        assert_eq!(sample.sample_id.as_deref(), Some("1.SKB1.640202"));
        assert!(!sample.is_control());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(CompositionKind::Library16S.to_string(), "library_16s");
        assert_eq!(
            CompositionKind::from_str("compressed_gdna").unwrap(),
            CompositionKind::CompressedGdna
        );
        assert_eq!(
            serde_json::to_string(&CompositionKind::Library16S).unwrap(),
            "\"library_16s\""
        );
    }

    #[test]
    fn test_detail_tag() {
        let detail = CompositionDetail::Library16S {
            primer: CompositionId(4),
            barcode: "AGCCTTCGTCGC".to_string(),
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["composition_type"], "library_16s");
        assert_eq!(
            serde_json::from_value::<CompositionDetail>(json).unwrap().kind(),
            CompositionKind::Library16S
        );

        let json = serde_json::to_value(CompositionDetail::Gdna).unwrap();
        assert_eq!(json, serde_json::json!({"composition_type": "gdna"}));

        let sample = CompositionDetail::Sample(SampleDetail::from_plating_content("s1"));
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["composition_type"], "sample");
        assert_eq!(json["kind"], "sample");
    }

    #[test]
    fn test_pool_detail_keeps_estimate() {
        let pool = CompositionDetail::Pool {
            name: "pool1".to_string(),
            is_pool_of_pools: false,
            estimated_concentration: 6.25,
        };
        let json = serde_json::to_string(&pool).unwrap();
        assert_eq!(serde_json::from_str::<CompositionDetail>(&json).unwrap(), pool);
    }
}
