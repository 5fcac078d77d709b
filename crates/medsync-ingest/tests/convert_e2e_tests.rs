//! End-to-end tests for the zipped-xml-to-json converter

mod common;

use assert_cmd::Command;
use common::RecordingProgress;
use medsync_ingest::extractor::{ArchiveExtractor, ExtractionRequest, ExtractorCommand};
use medsync_ingest::merge::merge_records;
use medsync_ingest::parser::StreamingParser;
use predicates::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

const ENTRY: &str = "full database.xml";

const DRUGBANK_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<drugbank xmlns="http://www.drugbank.ca" version="5.1" exported-on="2024-01-03">
  <drug type="biotech" created="2005-06-13">
    <drugbank-id primary="true">DB00001</drugbank-id>
    <drugbank-id>BTD00024</drugbank-id>
    <name>Lepirudin</name>
    <description>Lepirudin is a recombinant hirudin.</description>
    <indication>For the treatment of heparin-induced thrombocytopenia</indication>
    <classification>
      <description/>
      <direct-parent>Peptides</direct-parent>
    </classification>
    <synonyms>
      <synonym language="english" coder="">Hirudin variant-1</synonym>
      <synonym language="english" coder="">Lepirudin recombinant</synonym>
    </synonyms>
  </drug>
  <drug type="small molecule" created="2005-06-13">
    <drugbank-id primary="true">DB00945</drugbank-id>
    <name>Acetylsalicylic acid</name>
    <description/>
    <synonyms>
      <synonym language="english" coder="">Aspirin</synonym>
    </synonyms>
  </drug>
</drugbank>
"#;

fn write_archive(dir: &Path, xml: &str) -> PathBuf {
    let path = dir.join("drugbank.zip");
    let file = std::fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file(ENTRY, SimpleFileOptions::default()).unwrap();
    zip.write_all(xml.as_bytes()).unwrap();
    zip.finish().unwrap();
    path
}

#[test]
fn test_converts_archive() {
    let dir = TempDir::new().unwrap();
    let archive = write_archive(dir.path(), DRUGBANK_XML);
    let output = dir.path().join("out.json");

    Command::cargo_bin("zipped-xml-to-json")
        .unwrap()
        .arg(&archive)
        .arg(ENTRY)
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Converting"))
        .stdout(predicate::str::contains("Wrote 2 entries under <drugbank>"));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(json["drugbank"]["@version"], "5.1");
    assert_eq!(json["drugbank"]["drug"][1]["name"], "Acetylsalicylic acid");
}

#[test]
fn test_output_is_byte_identical_across_runs() {
    let dir = TempDir::new().unwrap();
    let archive = write_archive(dir.path(), DRUGBANK_XML);
    let first = dir.path().join("first.json");
    let second = dir.path().join("second.json");

    for output in [&first, &second] {
        Command::cargo_bin("zipped-xml-to-json")
            .unwrap()
            .arg(&archive)
            .arg(ENTRY)
            .arg(output)
            .assert()
            .success();
    }

    assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
}

#[test]
fn test_missing_archive_exits_with_one() {
    let dir = TempDir::new().unwrap();

    Command::cargo_bin("zipped-xml-to-json")
        .unwrap()
        .arg(dir.path().join("nope.zip"))
        .arg(ENTRY)
        .arg(dir.path().join("out.json"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cannot open archive"));
}

#[test]
fn test_missing_entry_exits_with_one() {
    let dir = TempDir::new().unwrap();
    let archive = write_archive(dir.path(), DRUGBANK_XML);

    Command::cargo_bin("zipped-xml-to-json")
        .unwrap()
        .arg(&archive)
        .arg("other.xml")
        .arg(dir.path().join("out.json"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("other.xml"));
}

#[test]
fn test_missing_arguments_exit_with_one() {
    Command::cargo_bin("zipped-xml-to-json")
        .unwrap()
        .arg("only-one.zip")
        .assert()
        .code(1);
}

#[tokio::test]
async fn test_extract_and_parse() {
    let dir = TempDir::new().unwrap();
    let archive = write_archive(dir.path(), DRUGBANK_XML);
    let output = dir.path().join("drugbank-data.json");

    let extractor = ArchiveExtractor::new(ExtractorCommand::direct(env!(
        "CARGO_BIN_EXE_zipped-xml-to-json"
    )));
    let request = ExtractionRequest::new(&archive, ENTRY, &output).unwrap();
    let json_path = extractor.extract(&request).await.unwrap();

    let records = StreamingParser::new("drugbank.drug.*".parse().unwrap())
        .collect(&json_path, &RecordingProgress::default())
        .await
        .unwrap();
    let outcome = merge_records(&records, &Default::default());

    assert_eq!(outcome.medications.len(), 2);
    let lepirudin = &outcome.medications[0];
    assert_eq!(lepirudin.drugbank_id.as_deref(), Some("DB00001"));
    assert_eq!(lepirudin.name, "Lepirudin");
    assert_eq!(lepirudin.drug_class.as_deref(), Some("Peptides"));
    assert_eq!(
        lepirudin.synonyms,
        vec!["Hirudin variant-1", "Lepirudin recombinant"]
    );

    let aspirin = &outcome.medications[1];
    assert_eq!(aspirin.drugbank_id.as_deref(), Some("DB00945"));
    assert_eq!(aspirin.description, None);
    assert_eq!(aspirin.synonyms, vec!["Aspirin"]);
}

#[tokio::test]
async fn test_extractor_reports_converter_failure() {
    let dir = TempDir::new().unwrap();
    let extractor = ArchiveExtractor::new(ExtractorCommand::direct(env!(
        "CARGO_BIN_EXE_zipped-xml-to-json"
    )));
    let request = ExtractionRequest::new(
        dir.path().join("missing.zip"),
        ENTRY,
        dir.path().join("out.json"),
    )
    .unwrap();

    let err = extractor.extract(&request).await.unwrap_err();
    assert_eq!(err.exit_code(), Some(1));
}
