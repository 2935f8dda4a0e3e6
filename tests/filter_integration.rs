use std::io::Write;
use std::process::{Command, Output};

const SCENARIO: &str = "fixture/scenario.osm";

fn osmfilter(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_osmfilter"))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("OSMFILTER_HASH_MEMORY")
        .output()
        .expect("failed to execute process")
}

/// Runs with `-o` pointing at a fresh temporary file and returns its content.
fn filter_to(input: &str, suffix: &str, args: &[&str]) -> (tempfile::NamedTempFile, Vec<u8>) {
    let output_file = tempfile::NamedTempFile::with_suffix(suffix).unwrap();
    let output_path = output_file.path().to_str().unwrap();
    let mut full = vec![input, "-o", output_path];
    full.extend_from_slice(args);
    let output = osmfilter(&full);
    assert!(
        output.status.success(),
        "osmfilter failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let content = std::fs::read(output_path).unwrap();
    (output_file, content)
}

fn filter_osm(input: &str, args: &[&str]) -> String {
    let (_file, content) = filter_to(input, ".osm", args);
    String::from_utf8(content).unwrap()
}

fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

#[test]
fn kept_way_brings_its_nodes() {
    let out = filter_osm(SCENARIO, &["--keep=highway=primary"]);
    assert!(out.contains("<node id=\"1\""));
    assert!(out.contains("<way id=\"1\""));
    assert!(!out.contains("<node id=\"2\""));
    assert!(!out.contains("<way id=\"2\""));
    assert!(!out.contains("<relation"));
    assert!(out.contains("<bounds minlat=\"51.5\" minlon=\"-0.2\" maxlat=\"51.6\" maxlon=\"-0.1\"/>"));
}

#[test]
fn continued_values_share_the_key() {
    let out = filter_osm(SCENARIO, &["--keep=amenity=bar =pub"]);
    assert!(out.contains("<node id=\"3\""));
    assert!(out.contains("<node id=\"4\""));
    assert!(!out.contains("<node id=\"5\""));
    assert_eq!(count(&out, "<node "), 2);
}

#[test]
fn numeric_comparison_selects_layers() {
    let out = filter_osm(SCENARIO, &["--keep=layer>=2"]);
    assert!(out.contains("<node id=\"6\""));
    assert!(!out.contains("<node id=\"7\""));
    assert_eq!(count(&out, "<way "), 0);
}

#[test]
fn relation_pulls_in_members_and_their_nodes() {
    let out = filter_osm(SCENARIO, &["--keep=type=multipolygon"]);
    assert!(out.contains("<relation id=\"1\""));
    assert!(out.contains("<way id=\"2\""));
    for node in ["5", "6", "7"] {
        assert!(out.contains(&format!("<node id=\"{node}\"")), "node {node} missing");
    }
    assert_eq!(count(&out, "<node "), 3);
}

#[test]
fn drop_options_remove_objects_sections_and_tags() {
    let out = filter_osm(
        SCENARIO,
        &["--drop=amenity=cafe", "--drop-ways", "--drop-node-tags=name="],
    );
    assert!(!out.contains("<node id=\"5\""));
    assert!(!out.contains("<way "));
    assert!(out.contains("<relation id=\"1\""));
    assert!(out.contains("k=\"amenity\" v=\"bar\""));
    assert!(!out.contains("k=\"name\""));
}

fn relation_chain(depth: i64) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::with_suffix(".osm").unwrap();
    writeln!(file, "<?xml version='1.0' encoding='UTF-8'?>\n<osm version=\"0.6\">").unwrap();
    for id in 101..=100 + depth {
        writeln!(file, "\t<relation id=\"{id}\">").unwrap();
        if id > 101 {
            writeln!(file, "\t\t<member type=\"relation\" ref=\"{}\" role=\"\"/>", id - 1).unwrap();
        }
        if id == 100 + depth {
            writeln!(file, "\t\t<tag k=\"type\" v=\"root\"/>").unwrap();
        }
        writeln!(file, "\t</relation>").unwrap();
    }
    writeln!(file, "</osm>").unwrap();
    file
}

#[test]
fn relation_chain_within_limit_is_kept_whole() {
    let chain = relation_chain(12);
    let out = filter_osm(chain.path().to_str().unwrap(), &["--keep-relations=type=root"]);
    assert_eq!(count(&out, "<relation id="), 12);
}

#[test]
fn relation_chain_beyond_limit_warns_and_stops() {
    let chain = relation_chain(16);
    let output_file = tempfile::NamedTempFile::with_suffix(".osm").unwrap();
    let output_path = output_file.path().to_str().unwrap();
    let output = osmfilter(&[
        chain.path().to_str().unwrap(),
        "--keep-relations=type=root",
        "-o",
        output_path,
    ]);
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("more than 12 hierarchy levels"), "{stderr}");

    let out = std::fs::read_to_string(output_path).unwrap();
    assert_eq!(count(&out, "<relation id="), 13);
    assert!(out.contains("<relation id=\"104\""));
    assert!(!out.contains("<relation id=\"103\""));
}

#[test]
fn o5m_round_trip_matches_direct_conversion() {
    let (o5m_file, o5m) = filter_to(SCENARIO, ".o5m", &[]);
    assert!(o5m.starts_with(b"\xff\xe0\x04o5m2"));
    let via_o5m = filter_osm(o5m_file.path().to_str().unwrap(), &[]);
    let direct = filter_osm(SCENARIO, &[]);
    assert_eq!(via_o5m, direct);
    assert!(direct.contains("user=\"m&#38;m\""));
    assert!(direct.contains("lat=\"51.5100001\" lon=\"-0.1500002\""));
}

#[test]
fn filtering_own_output_is_stable() {
    let (first_file, first) = filter_to(SCENARIO, ".o5m", &["--keep=highway"]);
    let (_second_file, second) = filter_to(first_file.path().to_str().unwrap(), ".o5m", &["--keep=highway"]);
    assert_eq!(first, second);

    let (first_file, first) = filter_to(SCENARIO, ".osm", &["--keep=amenity"]);
    let (_second_file, second) = filter_to(first_file.path().to_str().unwrap(), ".osm", &["--keep=amenity"]);
    assert_eq!(first, second);
}

#[test]
fn osmium_emulation_marks_end_of_output() {
    let out = filter_osm(SCENARIO, &["--emulate-osmium", "--keep=amenity=pub"]);
    assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
    assert!(out.contains("generator=\"Osmium (http://wiki.openstreetmap.org/wiki/Osmium)\""));
    assert!(out.trim_end().ends_with("<!--End of emulated output.-->"));
}

#[test]
fn drop_author_keeps_only_version() {
    let out = filter_osm(SCENARIO, &["--drop-author"]);
    assert!(out.contains("version=\"2\""));
    assert!(!out.contains("user="));
    assert!(!out.contains("timestamp="));
}

#[test]
fn change_file_deletions_survive_o5c() {
    let mut change = tempfile::NamedTempFile::with_suffix(".osc").unwrap();
    write!(
        change,
        "<?xml version='1.0' encoding='UTF-8'?>\n<osmChange version=\"0.6\">\n\
         <delete>\n\t<node id=\"8\" version=\"2\" timestamp=\"2014-01-01T00:00:00Z\" changeset=\"9\" uid=\"1\" user=\"a\" lat=\"1\" lon=\"2\"/>\n</delete>\n\
         <create>\n\t<node id=\"9\" version=\"1\" timestamp=\"2014-01-01T00:00:00Z\" changeset=\"9\" uid=\"1\" user=\"a\" lat=\"1\" lon=\"2\"/>\n</create>\n\
         </osmChange>\n"
    )
    .unwrap();
    let (o5c_file, o5c) = filter_to(change.path().to_str().unwrap(), ".o5c", &[]);
    assert!(o5c.starts_with(b"\xff\xe0\x04o5c2"));

    let (_osc_file, osc) = filter_to(o5c_file.path().to_str().unwrap(), ".osc", &[]);
    let osc = String::from_utf8(osc).unwrap();
    assert!(osc.contains("<osmChange version=\"0.6\""));
    assert!(osc.contains("<delete>"));
    assert!(osc.contains("<create>"));
    assert!(osc.contains("<node id=\"8\""));
    assert!(osc.contains("<node id=\"9\""));

    let plain = filter_osm(o5c_file.path().to_str().unwrap(), &[]);
    assert!(!plain.contains("<node id=\"8\""));
    assert!(plain.contains("<node id=\"9\""));
}

#[test]
fn parameter_file_supplies_options() {
    let mut params = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
    writeln!(params, "keep: \"highway=primary\"\ndrop-author: true").unwrap();
    let out = filter_osm(
        SCENARIO,
        &["--parameter-file", params.path().to_str().unwrap()],
    );
    assert!(out.contains("<way id=\"1\""));
    assert!(out.contains("<node id=\"1\""));
    assert!(!out.contains("<node id=\"2\""));
    assert!(!out.contains("user="));
}

#[test]
fn writes_to_stdout_without_output_path() {
    let output = osmfilter(&[SCENARIO, "--keep=amenity=pub"]);
    assert!(output.status.success());
    let out = String::from_utf8(output.stdout).unwrap();
    assert!(out.contains("<node id=\"4\""));
    assert!(out.trim_end().ends_with("</osm>"));
}

#[test]
fn exit_codes_follow_failure_class() {
    assert_eq!(osmfilter(&[]).status.code(), Some(1));
    assert_eq!(osmfilter(&["fixture/does-not-exist.osm"]).status.code(), Some(1));
    assert_eq!(osmfilter(&[SCENARIO, "--keep=( amenity=pub"]).status.code(), Some(2));
    assert_eq!(osmfilter(&[SCENARIO, "-o", "out.osm.pbf"]).status.code(), Some(3));

    let mut pbf = tempfile::NamedTempFile::with_suffix(".osm.pbf").unwrap();
    pbf.write_all(b"\x00\x00\x00\x0d\x0a\x09OSMHeader").unwrap();
    assert_eq!(osmfilter(&[pbf.path().to_str().unwrap()]).status.code(), Some(5));
}
