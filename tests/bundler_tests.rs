mod common;

use common::{LANGUAGES, Staging, VERSION_TEXT, file_contents};
use omaha_packager::bundler::stub::unpack;
use omaha_packager::bundler::{BuildMode, BuildRequest, BuildSettings, Bundler, Stage};
use omaha_packager::payload::resolve_files_for_languages;
use omaha_packager::version::{load_version_file, parse_version_text};
use sha2::{Digest, Sha256};
use std::sync::Arc;

fn request(staging: &Staging, prefix: &str, mode: BuildMode) -> BuildRequest {
    BuildRequest {
        version: load_version_file(&staging.version_file()).unwrap(),
        prefix: prefix.to_string(),
        mode,
        output_dir: staging.output(),
    }
}

fn bundler(staging: &Staging, extra: &str) -> Bundler {
    let settings = BuildSettings::load(&staging.write_settings(extra)).unwrap();
    Bundler::new(settings).unwrap()
}

#[test]
fn test_official_build_round_trips_payload() {
    let staging = Staging::new("");
    let artifact = bundler(&staging, "")
        .build(&request(&staging, "", BuildMode::Official))
        .unwrap();

    assert_eq!(artifact.name, "GoogleUpdateSetup.exe");
    assert_eq!(artifact.version, "1.3.99.5");
    assert!(!artifact.signed);
    assert_eq!(artifact.tag_capacity, None);

    let bytes = std::fs::read(&artifact.path).unwrap();
    assert_eq!(bytes.len() as u64, artifact.size);
    assert_eq!(format!("{:x}", Sha256::digest(&bytes)), artifact.checksum);

    let version = parse_version_text(VERSION_TEXT, "VERSION").unwrap();
    let expected = resolve_files_for_languages("", &version, &LANGUAGES).unwrap();
    let payload = unpack(&bytes).unwrap();
    assert!(payload.branch_filtered);
    let names: Vec<&str> = payload.files.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, expected);
    for (name, data) in &payload.files {
        assert_eq!(data, &file_contents(name), "{name}");
    }
    assert!(names.contains(&"npGoogleUpdate3.dll"));
    assert!(names.contains(&"goopdateres_fr.dll"));
}

#[test]
fn test_contents_log_lists_version_and_entries() {
    let staging = Staging::new("");
    let artifact = bundler(&staging, "")
        .build(&request(&staging, "", BuildMode::Official))
        .unwrap();

    assert_eq!(
        artifact.contents_log,
        staging.output().join("GoogleUpdateSetup_Contents.txt")
    );
    let log = std::fs::read_to_string(&artifact.contents_log).unwrap();
    assert!(log.starts_with("*** Omaha Version ***\n\n1.3.99.5\n\n\n*** Payload ***\n\n"));
    for entry in &artifact.entries {
        assert!(log.contains(&format!("{entry}\n")));
    }
}

#[test]
fn test_rebuild_is_byte_identical() {
    let staging = Staging::new("");
    let bundler = bundler(&staging, "");
    let first = bundler.build(&request(&staging, "", BuildMode::Official)).unwrap();
    let first_bytes = std::fs::read(&first.path).unwrap();
    let second = bundler.build(&request(&staging, "", BuildMode::Official)).unwrap();

    assert_eq!(first.checksum, second.checksum);
    assert_eq!(std::fs::read(&second.path).unwrap(), first_bytes);
}

#[test]
fn test_test_build_bumps_version_and_prefixes_names() {
    let staging = Staging::new("TEST_");
    let artifact = bundler(&staging, "")
        .build(&request(&staging, "", BuildMode::Test { delta: 1 }))
        .unwrap();

    assert_eq!(artifact.name, "TEST_GoogleUpdateSetup.exe");
    assert_eq!(artifact.version, "1.3.99.6");
    // Archive entries never carry the test prefix.
    assert!(artifact.entries.iter().all(|e| !e.starts_with("TEST_")));
    assert!(artifact.entries.contains(&"GoogleUpdate.exe".to_string()));
}

#[test]
fn test_even_version_fails_in_resolve() {
    let staging = Staging::new("");
    let mut req = request(&staging, "", BuildMode::Official);
    req.version = parse_version_text(&VERSION_TEXT.replace("= 5", "= 6"), "VERSION").unwrap();

    let err = bundler(&staging, "").build(&req).unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Resolve));
    assert!(err.to_string().contains("1.3.99.6"));
    assert!(!staging.output().join("GoogleUpdateSetup.exe").exists());
}

#[test]
fn test_missing_payload_file_fails_in_archive() {
    let staging = Staging::new("");
    std::fs::remove_file(staging.payload_dir().join("psuser_64.dll")).unwrap();

    let err = bundler(&staging, "")
        .build(&request(&staging, "", BuildMode::Official))
        .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Archive));
    assert!(err.to_string().contains("psuser_64.dll"));
}

#[test]
fn test_unknown_language_fails_in_resolve() {
    let staging = Staging::new("");
    let settings_path = staging.write_settings("");
    let text = std::fs::read_to_string(&settings_path)
        .unwrap()
        .replace("[\"en\", \"fr\"]", "[\"en\", \"tlh\"]");
    std::fs::write(&settings_path, text).unwrap();

    let bundler = Bundler::new(BuildSettings::load(&settings_path).unwrap()).unwrap();
    let err = bundler
        .build(&request(&staging, "", BuildMode::Official))
        .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Resolve));
    assert!(err.to_string().contains("tlh"));
}

#[test]
fn test_store_compression_skips_branch_filter() {
    let staging = Staging::new("");
    let artifact = bundler(&staging, "[compression]\nkind = \"store\"\n")
        .build(&request(&staging, "", BuildMode::Official))
        .unwrap();

    let payload = unpack(&std::fs::read(&artifact.path).unwrap()).unwrap();
    assert!(!payload.branch_filtered);
    assert_eq!(payload.files.len(), artifact.entries.len());
}

#[tokio::test]
async fn test_build_all_keeps_request_order() {
    let staging = Staging::new("");
    staging.stage_payload("Beta");
    let bundler = Arc::new(bundler(&staging, ""));

    let results = bundler
        .build_all(vec![
            request(&staging, "Beta", BuildMode::Official),
            request(&staging, "", BuildMode::Official),
        ])
        .await;

    let names: Vec<String> = results.into_iter().map(|r| r.unwrap().name).collect();
    assert_eq!(names, ["BetaGoogleUpdateSetup.exe", "GoogleUpdateSetup.exe"]);
}
