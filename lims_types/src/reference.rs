//! Read-only reference entities consumed by processes: robots and
//! instruments, reagent lots.

use crate::ids::{EquipmentId, ReagentId};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
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
pub enum EquipmentKind {
    /// Liquid handler used for extraction setup and 16S library prep.
    EpMotion,
    /// Magnetic bead extraction robot.
    KingFisher,
    /// Liquid handler used for plate compression and shotgun library prep.
    Mosquito,
    /// Acoustic liquid handler driven by pick lists.
    Echo,
    /// Sequencing instrument.
    Sequencer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: EquipmentId,
    pub external_id: String,
    pub kind: EquipmentKind,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
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
pub enum ReagentKind {
    ExtractionKit,
    MasterMix,
    Water,
    KapaHyperPlus,
    Stubs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reagent {
    pub id: ReagentId,
    pub external_lot_id: String,
    pub kind: ReagentKind,
}

/// Sequencer model; decides how index reads are written to sample sheets.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
pub enum InstrumentModel {
    MiSeq,
    HiSeq2500,
    HiSeq4000,
    NextSeq,
    MiniSeq,
    NovaSeq,
}

impl InstrumentModel {
    /// Instruments that read the i5 index on the reverse strand need the
    /// reverse complement of the i5 sequence in the sample sheet.
    pub fn reverse_complements_i5(&self) -> bool {
        matches!(
            self,
            InstrumentModel::HiSeq4000
                | InstrumentModel::NextSeq
                | InstrumentModel::MiniSeq
                | InstrumentModel::NovaSeq
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_kind_names() {
        assert_eq!(EquipmentKind::KingFisher.to_string(), "king_fisher");
        assert_eq!(
            EquipmentKind::from_str("ep_motion").unwrap(),
            EquipmentKind::EpMotion
        );
        assert_eq!(ReagentKind::KapaHyperPlus.to_string(), "kapa_hyper_plus");
        assert_eq!(
            InstrumentModel::from_str("NextSeq").unwrap(),
            InstrumentModel::NextSeq
        );
        assert!(!InstrumentModel::MiSeq.reverse_complements_i5());
        assert_eq!(
            serde_json::to_string(&ReagentKind::MasterMix).unwrap(),
            "\"master_mix\""
        );
    }
}
