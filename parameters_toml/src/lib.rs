// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms,
    unused
)]
// Other warnings (as of rust 1.55)
#![deny(
    asm_sub_register,
    bad_asm_style,
    bindings_with_variant_name,
    clashing_extern_declarations,
    confusable_idents,
    const_item_mutation,
    deprecated,
    deref_nullptr,
    drop_bounds,
    dyn_drop,
    elided_lifetimes_in_paths,
    exported_private_dependencies,
    function_item_references,
    improper_ctypes,
    improper_ctypes_definitions,
    incomplete_features,
    inline_no_sanitize,
    invalid_value,
    irrefutable_let_patterns,
    large_assignments,
    mixed_script_confusables,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overlapping_range_endpoints,
    renamed_and_removed_lints,
    stable_features,
    dangling_pointers_from_temporaries,
    trivial_bounds,
    type_alias_bounds,
    uncommon_codepoints,
    unconditional_recursion,
    unknown_lints,
    unnameable_test_items,
    unused_comparisons,
    while_true
)]

use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Environment variable naming a parameters file to use instead of the one
/// beside the executable.
pub const PARAMETERS_ENV: &str = "LABTRACK_PARAMETERS";

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
struct Parameters {
    /// Labware type of Echo source plates, as written into pick lists.
    echo_source_plate_type: Cow<'static, str>,
    /// Maximum volume the Echo may dispense into one destination well (nL).
    echo_max_volume_per_well_nl: f64,
    /// Plate and well water is drawn from for normalization.
    water_source_plate: Cow<'static, str>,
    water_source_well: Cow<'static, str>,
    /// Normalization defaults.
    normalization_target_mass_ng: f64,
    normalization_total_volume_nl: f64,
    normalization_min_volume_nl: f64,
    normalization_max_volume_nl: f64,
    normalization_resolution_nl: f64,
    /// Amplicon (minimum volume) pooling defaults.
    amplicon_floor_volume_nl: f64,
    amplicon_floor_concentration: f64,
    /// Concentrations at or below this count as zero (ng/uL).
    zero_concentration_threshold: f64,
    /// Shape of the plate pools are dispensed into.
    pool_destination_rows: u16,
    pool_destination_columns: u16,
}

const DEFAULT_PARAMETERS: Parameters = Parameters {
    echo_source_plate_type: Cow::Borrowed("384PP_AQ_BP2"),
    echo_max_volume_per_well_nl: 60_000.0,
    water_source_plate: Cow::Borrowed("water"),
    water_source_well: Cow::Borrowed("A1"),
    normalization_target_mass_ng: 5.0,
    normalization_total_volume_nl: 3500.0,
    normalization_min_volume_nl: 2.5,
    normalization_max_volume_nl: 3500.0,
    normalization_resolution_nl: 2.5,
    amplicon_floor_volume_nl: 2.0,
    amplicon_floor_concentration: 16.0,
    zero_concentration_threshold: 1e-6,
    pool_destination_rows: 16,
    pool_destination_columns: 24,
};
static PARAMETERS: OnceLock<Result<Parameters>> = OnceLock::new();

fn parameters_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(PARAMETERS_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(std::env::current_exe()
        .context("Unable to locate the running executable")?
        .with_file_name("parameters.toml"))
}

/// Return a reference to the global parameters.
/// The parameters may need to be loaded; if loading fails, return Err.
fn parameters() -> &'static Result<Parameters> {
    PARAMETERS.get_or_init(|| {
        let path = parameters_path()?;
        if !path.exists() {
            warn!(
                "could not find parameters.toml at {}, falling back to defaults",
                path.display()
            );
            Ok(DEFAULT_PARAMETERS)
        } else {
            let s = std::fs::read_to_string(&path).with_context(|| path.display().to_string())?;
            Ok(toml::from_str(&s).with_context(|| path.display().to_string())?)
        }
    })
}

macro_rules! parameter_getter {
    ($a:ident, $t:ty) => {
        pub fn $a() -> Result<&'static $t> {
            let val = match parameters() {
                Err(e) => return Err(anyhow::anyhow!("{e:#}")),
                Ok(p) => &p.$a,
            };
            if DEFAULT_PARAMETERS.$a != *val {
                warn!("using non-default {} = {:?}", stringify!($a), val);
            }
            Ok(val)
        }
    };
}

parameter_getter!(echo_source_plate_type, str);
parameter_getter!(echo_max_volume_per_well_nl, f64);
parameter_getter!(water_source_plate, str);
parameter_getter!(water_source_well, str);
parameter_getter!(normalization_target_mass_ng, f64);
parameter_getter!(normalization_total_volume_nl, f64);
parameter_getter!(normalization_min_volume_nl, f64);
parameter_getter!(normalization_max_volume_nl, f64);
parameter_getter!(normalization_resolution_nl, f64);
parameter_getter!(amplicon_floor_volume_nl, f64);
parameter_getter!(amplicon_floor_concentration, f64);
parameter_getter!(zero_concentration_threshold, f64);
parameter_getter!(pool_destination_rows, u16);
parameter_getter!(pool_destination_columns, u16);
