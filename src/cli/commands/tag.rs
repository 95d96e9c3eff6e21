//! `tag`: stamp one copy of an installer per bundle.

use crate::bundler::pool::default_workers;
use crate::cli::{Command, RuntimeConfig};
use crate::error::{CliError, PackagerError, Result};
use crate::tagging::{BinaryTagger, SignaturePolicy, TagPlacement, tag_bundles_file};

pub(super) async fn execute_tag(command: &Command, config: &RuntimeConfig) -> Result<()> {
    let Command::Tag {
        input,
        bundles,
        output,
        test,
        allow_unsigned,
        appended,
        budget,
        workers,
    } = command
    else {
        return Err(CliError::InvalidArguments {
            reason: "expected the tag command".to_string(),
        }
        .into());
    };

    let mut tagger = BinaryTagger::default();
    if let Some(budget) = budget {
        tagger = BinaryTagger::new(*budget);
    }
    if *allow_unsigned {
        tagger = tagger.with_policy(SignaturePolicy::AllowUnsigned);
    }
    let placement = appended.then_some(TagPlacement::Appended);

    let out = config.output();
    let _ = out.info(&format!("Tagging {} with {}", input.display(), bundles.display()));

    let results = tag_bundles_file(
        &tagger,
        input,
        bundles,
        output,
        test.then_some(true),
        placement,
        workers.unwrap_or_else(default_workers),
    )
    .await?;

    let mut tagged = Vec::new();
    let mut first_error = None;
    for result in results {
        match result {
            Ok(bundle) => {
                let _ = out.success(&format!(
                    "{} ({} byte tag, {})",
                    bundle.path.display(),
                    bundle.tag_len,
                    bundle.placement
                ));
                let _ = out.verbose(&format!("sha256 {}", bundle.checksum));
                tagged.push(bundle);
            }
            Err(e) => {
                let error = PackagerError::from(e);
                if first_error.is_some() {
                    super::report_failure(config, "tag", &error);
                } else {
                    first_error = Some(error);
                }
            }
        }
    }

    if config.is_json() {
        super::print_json(config, &tagged)?;
    }
    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
