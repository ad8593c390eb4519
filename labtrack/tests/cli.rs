use clap::Parser;
use labtrack::Cli;
use lims_store::LimsStore;
use lims_types::CompositionId;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;

fn labtrack(db: &Path, args: &[&str]) -> anyhow::Result<()> {
    let db = db.to_string_lossy().to_string();
    let argv = ["labtrack", "--db", db.as_str(), "--operator", "tester"]
        .into_iter()
        .chain(args.iter().copied());
    Cli::try_parse_from(argv)?.run()
}

#[test]
fn test_plate_to_pick_list() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("lab.sqlite");
    let path = |name: &str| dir.path().join(name).to_string_lossy().to_string();

    labtrack(&db, &["init"]).unwrap();
    for (id, kind) in [("ep1", "ep_motion"), ("kf1", "king_fisher")] {
        labtrack(&db, &["register", "equipment", id, "--kind", kind]).unwrap();
    }
    for (lot, kind) in [("kit1", "extraction_kit"), ("water1", "water")] {
        labtrack(&db, &["register", "reagent", lot, "--kind", kind]).unwrap();
    }
    assert!(labtrack(&db, &["register", "equipment", "x", "--kind", "toaster"]).is_err());

    fs::write(path("layout.csv"), "well,content\nA1,s1\nA2,s2\nH12,\n").unwrap();
    labtrack(&db, &["plate", "samples", "--layout", &path("layout.csv")]).unwrap();
    labtrack(
        &db,
        &[
            "extract",
            "samples",
            "--output",
            "gdna",
            "--robot",
            "ep1",
            "--extraction-robot",
            "kf1",
            "--kit-lot",
            "kit1",
            "--volume-nl",
            "70000",
        ],
    )
    .unwrap();

    fs::write(path("readings.csv"), "well,raw\nA1,500\nA2,1000\nH12,0\n").unwrap();
    labtrack(
        &db,
        &[
            "quantify",
            "--plate",
            "gdna",
            "--readings",
            &path("readings.csv"),
            "--slope",
            "0.01",
            "--intercept",
            "0",
        ],
    )
    .unwrap();
    labtrack(
        &db,
        &["normalize", "gdna", "--output", "norm", "--water-lot", "water1", "--reformat"],
    )
    .unwrap();

    let store = LimsStore::open(&db).unwrap();
    let normalized = store.plate_compositions("norm").unwrap();
    let wells: Vec<_> = normalized.iter().map(|(w, _)| w.to_string()).collect();
    assert_eq!(wells, vec!["A1", "A2"]);
    let process = normalized[0].1.upstream_process;
    drop(store);

    labtrack(
        &db,
        &["picklist", &process.to_string(), "-o", &path("picklist.csv")],
    )
    .unwrap();
    let picklist = fs::read_to_string(path("picklist.csv")).unwrap();
    let lines: Vec<_> = picklist.lines().collect();
    // Header, then sample and water for each of the two wells.
    assert_eq!(lines.len(), 5);
    assert!(lines[1].starts_with("s1,gdna,384PP_AQ_BP2,A1,5.0,1000.0,norm,A1"));
    assert!(lines[2].starts_with("s1,water,384PP_AQ_BP2,A1,,2500.0,norm,A1"));

    labtrack(&db, &["lineage", "--plate", "norm", "--well", "A2"]).unwrap();
    labtrack(&db, &["lineage", "--sample", "s2"]).unwrap();
    let sample_sheet = labtrack(&db, &["sample-sheet", &process.to_string()]);
    assert!(sample_sheet.is_err());

    let store = LimsStore::open(&db).unwrap();
    let ancestors = store.ancestors_of(normalized[1].1.id).unwrap();
    assert!(ancestors.iter().any(|c| c.id < normalized[1].1.id));
    assert!(store.composition(CompositionId(i64::MAX)).is_err());
}
