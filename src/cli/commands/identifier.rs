//! `guid` and `msi-version`: deterministic identifiers.

use crate::cli::{Command, RuntimeConfig};
use crate::error::{CliError, Result};
use crate::identifier::{convert_to_installer_version, derive_guid, installer_namespace};

fn namespace_bytes(namespace: Option<&str>, namespace_hex: Option<&str>) -> Result<Vec<u8>> {
    match (namespace, namespace_hex) {
        (Some(text), _) => Ok(text.as_bytes().to_vec()),
        (None, Some(hex_text)) => hex::decode(hex_text.trim()).map_err(|e| {
            CliError::InvalidArguments {
                reason: format!("--namespace-hex '{hex_text}' is not valid hex: {e}"),
            }
            .into()
        }),
        (None, None) => Ok(installer_namespace()),
    }
}

pub(super) fn execute_guid(command: &Command, config: &RuntimeConfig) -> Result<()> {
    let Command::Guid {
        namespace,
        namespace_hex,
        name,
    } = command
    else {
        return Err(CliError::InvalidArguments {
            reason: "expected the guid command".to_string(),
        }
        .into());
    };

    let namespace = namespace_bytes(namespace.as_deref(), namespace_hex.as_deref())?;
    let guid = derive_guid(&namespace, name.as_bytes());
    if config.is_json() {
        return super::print_json(config, &serde_json::json!({ "name": name, "guid": guid }));
    }
    let _ = config.output().println(&guid);
    Ok(())
}

pub(super) fn execute_msi_version(command: &Command, config: &RuntimeConfig) -> Result<()> {
    let Command::MsiVersion { version } = command else {
        return Err(CliError::InvalidArguments {
            reason: "expected the msi-version command".to_string(),
        }
        .into());
    };

    let converted = convert_to_installer_version(version)?;
    if config.is_json() {
        return super::print_json(config, &serde_json::json!({ "version": version, "msi_version": converted }));
    }
    let _ = config.output().println(&converted);
    Ok(())
}
