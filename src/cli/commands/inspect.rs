//! `inspect` and `extract-tag`: read back what the pipeline wrote.

use crate::bundler::ErrorExt;
use crate::bundler::stub::{locate_payload, unpack};
use crate::cli::{Command, RuntimeConfig};
use crate::error::{CliError, Result};
use crate::tagging::pe::{self, PeSignature};
use crate::tagging::{BinaryFormat, extract_tag, sniff_format, tag_capacity, tag_string};
use serde::Serialize;
use std::path::Path;

fn read_input(path: &Path) -> Result<Vec<u8>> {
    Ok(std::fs::read(path).fs_context("reading binary", path)?)
}

#[derive(Serialize)]
struct ExtractedTag {
    tag: String,
    fields: Vec<(String, String)>,
}

pub(super) fn execute_extract_tag(command: &Command, config: &RuntimeConfig) -> Result<()> {
    let Command::ExtractTag { input } = command else {
        return Err(CliError::InvalidArguments {
            reason: "expected the extract-tag command".to_string(),
        }
        .into());
    };

    let binary = read_input(input)?;
    let Some(raw) = extract_tag(&binary) else {
        return Err(CliError::ExecutionFailed {
            command: "extract-tag".to_string(),
            reason: format!("{} carries no tag", input.display()),
        }
        .into());
    };
    let tag = String::from_utf8_lossy(&raw).into_owned();

    if config.is_json() {
        let fields = tag_string::parse(&tag);
        return super::print_json(config, &ExtractedTag { tag, fields });
    }
    let _ = config.output().println(&tag);
    for (key, value) in tag_string::parse(&tag) {
        let _ = config.output().verbose(&format!("{key} = {value}"));
    }
    Ok(())
}

#[derive(Serialize)]
struct Inspection {
    format: &'static str,
    size: usize,
    signed: bool,
    signature_len: Option<usize>,
    tag_capacity: Option<usize>,
    tag: Option<String>,
    payload_len: Option<usize>,
    branch_filtered: Option<bool>,
    entries: Vec<String>,
}

fn inspect_binary(binary: &[u8]) -> Result<Inspection> {
    let format = sniff_format(binary)?;
    let (signed, signature_len, capacity) = match format {
        BinaryFormat::Pe => match pe::inspect(binary)? {
            PeSignature::Signed(table) => (true, Some(table.der_len), tag_capacity(binary)?),
            PeSignature::Unsigned => (false, None, None),
        },
        BinaryFormat::Msi => (false, None, None),
    };

    let mut inspection = Inspection {
        format: match format {
            BinaryFormat::Pe => "pe",
            BinaryFormat::Msi => "msi",
        },
        size: binary.len(),
        signed,
        signature_len,
        tag_capacity: capacity,
        tag: extract_tag(binary).map(|raw| String::from_utf8_lossy(&raw).into_owned()),
        payload_len: None,
        branch_filtered: None,
        entries: Vec::new(),
    };

    if let Some(location) = locate_payload(binary) {
        let payload = unpack(binary)?;
        inspection.payload_len = Some(location.len);
        inspection.branch_filtered = Some(payload.branch_filtered);
        inspection.entries = payload.files.into_iter().map(|(name, _)| name).collect();
    }
    Ok(inspection)
}

pub(super) fn execute_inspect(command: &Command, config: &RuntimeConfig) -> Result<()> {
    let Command::Inspect { input } = command else {
        return Err(CliError::InvalidArguments {
            reason: "expected the inspect command".to_string(),
        }
        .into());
    };

    let inspection = inspect_binary(&read_input(input)?)?;
    if config.is_json() {
        return super::print_json(config, &inspection);
    }

    let out = config.output();
    let _ = out.println(&format!("{}: {} ({} bytes)", input.display(), inspection.format, inspection.size));
    match inspection.signature_len {
        Some(len) => {
            let _ = out.println(&format!("signature: {len} byte PKCS#7 blob"));
        }
        None => {
            let _ = out.println("signature: none");
        }
    }
    match inspection.tag_capacity {
        Some(capacity) => {
            let _ = out.println(&format!("tag region: {capacity} bytes"));
        }
        None => {
            let _ = out.println("tag region: none");
        }
    }
    if let Some(tag) = &inspection.tag {
        let _ = out.println(&format!("tag: {tag}"));
    }
    if let Some(len) = inspection.payload_len {
        let filtered = if inspection.branch_filtered == Some(true) {
            ", branch filtered"
        } else {
            ""
        };
        let _ = out.println(&format!("payload: {len} bytes{filtered}"));
        for entry in &inspection.entries {
            let _ = out.indent(entry);
        }
    }
    Ok(())
}
