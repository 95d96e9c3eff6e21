mod common;

use assert_cmd::Command;
use common::{Staging, signed_pe};
use omaha_packager::identifier::{derive_guid, installer_namespace};
use predicates::prelude::*;

fn packager() -> Command {
    Command::cargo_bin("omaha_packager").unwrap()
}

#[test]
fn test_msi_version() {
    packager()
        .args(["msi-version", "6.1.420.8"])
        .assert()
        .success()
        .stdout("64.105.8\n");
}

#[test]
fn test_msi_version_out_of_range() {
    packager()
        .args(["msi-version", "1.3.5.20000"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("20000"));
}

#[test]
fn test_guid_defaults_to_installer_namespace() {
    let expected = derive_guid(&installer_namespace(), b"Upgrade Google Chrome");
    packager()
        .args(["guid", "--name", "Upgrade Google Chrome"])
        .assert()
        .success()
        .stdout(format!("{expected}\n"));
}

#[test]
fn test_resolve_lists_payload() {
    let staging = Staging::new("");
    packager()
        .arg("resolve")
        .arg("--version-file")
        .arg(staging.version_file())
        .args(["--languages", "en,fr"])
        .assert()
        .success()
        .stdout(predicate::str::contains("GoogleUpdateCore.exe"))
        .stdout(predicate::str::contains("goopdateres_fr.dll"))
        .stdout(predicate::str::contains("GoopdateBho.dll").not());
}

#[test]
fn test_build_then_inspect() {
    let staging = Staging::new("");
    let settings = staging.write_settings("");

    packager()
        .arg("build")
        .arg("--version-file")
        .arg(staging.version_file())
        .arg("--config")
        .arg(&settings)
        .arg("--output")
        .arg(staging.output())
        .assert()
        .success();

    let installer = staging.output().join("GoogleUpdateSetup.exe");
    assert!(installer.is_file());

    packager()
        .arg("inspect")
        .arg("--input")
        .arg(&installer)
        .assert()
        .success()
        .stdout(predicate::str::contains("signature: none"))
        .stdout(predicate::str::contains("GoogleUpdate.exe"));
}

#[test]
fn test_build_reports_failing_stage() {
    let staging = Staging::new("");
    let settings = staging.write_settings("");
    std::fs::write(
        staging.version_file(),
        common::VERSION_TEXT.replace("version_patch = 5", "version_patch = 4"),
    )
    .unwrap();

    packager()
        .arg("build")
        .arg("--version-file")
        .arg(staging.version_file())
        .arg("--config")
        .arg(&settings)
        .arg("--output")
        .arg(staging.output())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("stage 'resolve'"))
        .stderr(predicate::str::contains("1.3.99.4"))
        .stderr(predicate::str::contains("odd patch"));
}

#[test]
fn test_tag_then_extract() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("GoogleUpdateSetup.exe");
    std::fs::write(&input, signed_pe(true, 256)).unwrap();
    let bundles = dir.path().join("bundles.txt");
    std::fs::write(
        &bundles,
        "('Chrome', 'True', 'en', None, None, [('{8A69D345-D564-463C-AFF1-A69D9E530F96}', 'Google Chrome', '')])\n",
    )
    .unwrap();
    let out = dir.path().join("tagged");

    packager()
        .arg("tag")
        .arg("--input")
        .arg(&input)
        .arg("--bundles")
        .arg(&bundles)
        .arg("--output")
        .arg(&out)
        .assert()
        .success();

    packager()
        .arg("extract-tag")
        .arg("--input")
        .arg(out.join("bundles").join("en").join("Tagged_ChromeSetup_en.exe"))
        .assert()
        .success()
        .stdout(
            "appguid={8A69D345-D564-463C-AFF1-A69D9E530F96}&appname=Google%20Chrome&needsadmin=True&lang=en\n",
        );
}

#[test]
fn test_tag_refuses_unsigned_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("setup.exe");
    std::fs::write(&input, common::unsigned_pe()).unwrap();
    let bundles = dir.path().join("bundles.txt");
    std::fs::write(&bundles, "('App', 'False', 'de', None, None, [('{A}', 'App', '')])\n").unwrap();

    packager()
        .arg("tag")
        .arg("--input")
        .arg(&input)
        .arg("--bundles")
        .arg(&bundles)
        .arg("--output")
        .arg(dir.path().join("tagged"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not signed"))
        .stderr(predicate::str::contains("--allow-unsigned"));
}

#[test]
fn test_extract_tag_without_tag_fails() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("plain.exe");
    std::fs::write(&input, common::unsigned_pe()).unwrap();

    packager()
        .arg("extract-tag")
        .arg("--input")
        .arg(&input)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("carries no tag"));
}
