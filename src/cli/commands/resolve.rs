//! `resolve`: print what a version's payload would contain.

use crate::cli::{Command, RuntimeConfig};
use crate::error::{CliError, Result};
use crate::payload::{resolve_files, resolve_files_for_languages, resolve_languages};
use crate::version::load_version_file;
use serde::Serialize;

#[derive(Serialize)]
struct Resolution {
    version: String,
    files: Vec<String>,
    languages: Vec<String>,
}

pub(super) fn execute_resolve(command: &Command, config: &RuntimeConfig) -> Result<()> {
    let Command::Resolve {
        version_file,
        prefix,
        languages,
    } = command
    else {
        return Err(CliError::InvalidArguments {
            reason: "expected the resolve command".to_string(),
        }
        .into());
    };

    let version = load_version_file(version_file)?;
    let (files, languages) = match languages {
        Some(languages) => (
            resolve_files_for_languages(prefix, &version, languages.as_slice())?,
            languages.clone(),
        ),
        None => (resolve_files(prefix, &version)?, resolve_languages(&version)?),
    };

    if config.is_json() {
        return super::print_json(
            config,
            &Resolution {
                version: version.to_string(),
                files,
                languages,
            },
        );
    }

    let out = config.output();
    let _ = out.info(&format!("Payload for {version} ({} files)", files.len()));
    for file in &files {
        let _ = out.println(file);
    }
    let _ = out.verbose(&format!("Languages: {}", languages.join(", ")));
    Ok(())
}
