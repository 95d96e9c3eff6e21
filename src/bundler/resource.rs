//! Resource embedding.
//!
//! A resource description binds the compressed payload, the dependency
//! manifest and the resource identifier header. It is rendered from a
//! fixed template and compiled into a resource container, either by the
//! built-in packer or by an external resource compiler and linker.
//!
//! Packed container layout (all integers little-endian):
//!
//! ```text
//! "MIRC" | u32 version | u32 count
//! count x ( u16 name_len | name | u16 type_len | type | u64 data_len | data )
//! ```

use crate::bail;
use crate::bundler::error::{Context, ErrorExt};
use crate::bundler::process::{ProcessRunner, ToolCommand, run_tool};
use crate::bundler::Result;
use handlebars::Handlebars;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Resource name of the compressed payload.
pub const PAYLOAD_RESOURCE: &str = "IDR_PAYLOAD";

/// Resource type of the compressed payload.
pub const PAYLOAD_RESOURCE_TYPE: &str = "B";

/// Packed container magic.
pub const CONTAINER_MAGIC: &[u8; 4] = b"MIRC";

const CONTAINER_VERSION: u32 = 1;

const RESOURCE_TEMPLATE: &str = r#"// Payload resources for the metainstaller.
{{#if resource_header}}
#include "{{resource_header}}"
{{/if}}

IDR_PAYLOAD B "{{payload_filename}}"
{{#if manifest_filename}}
1 24 "{{manifest_filename}}"
{{/if}}
"#;

/// Inputs bound into the resource description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInputs {
    /// Compressed payload
    pub payload: PathBuf,
    /// Dependency manifest
    pub manifest: Option<PathBuf>,
    /// Resource identifier header
    pub resource_header: Option<PathBuf>,
}

#[derive(Serialize)]
struct TemplateData {
    payload_filename: String,
    manifest_filename: Option<String>,
    resource_header: Option<String>,
}

fn rc_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "\\\\")
}

/// Renders the resource description text.
pub fn render_description(inputs: &ResourceInputs) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars.register_template_string("resources", RESOURCE_TEMPLATE)?;

    let data = TemplateData {
        payload_filename: rc_path(&inputs.payload),
        manifest_filename: inputs.manifest.as_deref().map(rc_path),
        resource_header: inputs.resource_header.as_deref().map(rc_path),
    };
    Ok(handlebars.render("resources", &data)?)
}

/// One compiled resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Resource name
    pub name: String,
    /// Resource type
    pub kind: String,
    /// Resource bytes
    pub data: Vec<u8>,
}

/// A data line of a resource description: `NAME TYPE "path"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionEntry {
    /// Resource name
    pub name: String,
    /// Resource type
    pub kind: String,
    /// File providing the data
    pub path: PathBuf,
}

/// Parses the data lines of a resource description.
///
/// Comments and preprocessor lines are skipped.
pub fn parse_description(text: &str) -> Result<Vec<DescriptionEntry>> {
    let mut entries = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") || line.starts_with('#') {
            continue;
        }
        let Some((head, quoted)) = line.split_once('"') else {
            bail!("resource description line {}: missing quoted path", index + 1);
        };
        let path = quoted
            .strip_suffix('"')
            .with_context(|| format!("resource description line {}: unterminated path", index + 1))?;
        let mut fields = head.split_whitespace();
        let (Some(name), Some(kind), None) = (fields.next(), fields.next(), fields.next()) else {
            bail!("resource description line {}: expected NAME TYPE \"path\"", index + 1);
        };
        entries.push(DescriptionEntry {
            name: name.to_string(),
            kind: kind.to_string(),
            path: PathBuf::from(path.replace("\\\\", "\\")),
        });
    }
    Ok(entries)
}

/// Serializes resources into a packed container.
pub fn pack_resources(resources: &[Resource]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(CONTAINER_MAGIC);
    out.extend_from_slice(&CONTAINER_VERSION.to_le_bytes());
    out.extend_from_slice(&u32::try_from(resources.len())?.to_le_bytes());
    for resource in resources {
        for text in [&resource.name, &resource.kind] {
            out.extend_from_slice(&u16::try_from(text.len())?.to_le_bytes());
            out.extend_from_slice(text.as_bytes());
        }
        out.extend_from_slice(&(resource.data.len() as u64).to_le_bytes());
        out.extend_from_slice(&resource.data);
    }
    Ok(out)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).context("resource container length overflow")?;
        let slice = self
            .data
            .get(self.pos..end)
            .context("resource container is truncated")?;
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<usize> {
        let b = self.take(2)?;
        Ok(usize::from(u16::from_le_bytes([b[0], b[1]])))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<usize> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(usize::try_from(u64::from_le_bytes(raw))?)
    }

    fn text(&mut self) -> Result<String> {
        let len = self.u16()?;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }
}

/// Parses a packed container.
pub fn parse_container(data: &[u8]) -> Result<Vec<Resource>> {
    let mut cursor = Cursor { data, pos: 0 };
    if cursor.take(4)? != CONTAINER_MAGIC {
        bail!("not a packed resource container");
    }
    let version = cursor.u32()?;
    if version != CONTAINER_VERSION {
        bail!("unsupported resource container version {}", version);
    }
    let count = cursor.u32()?;
    let mut resources = Vec::new();
    for _ in 0..count {
        let name = cursor.text()?;
        let kind = cursor.text()?;
        let len = cursor.u64()?;
        let data = cursor.take(len)?.to_vec();
        resources.push(Resource { name, kind, data });
    }
    Ok(resources)
}

/// Finds the resource `name` of type `kind`.
pub fn find_resource<'a>(resources: &'a [Resource], name: &str, kind: &str) -> Option<&'a Resource> {
    resources.iter().find(|r| r.name == name && r.kind == kind)
}

/// Compiles a rendered resource description into a container file.
pub trait ResourceCompiler: Send + Sync {
    /// Compiles `description` (already written to disk) into `output`.
    fn compile(&self, description: &Path, output: &Path) -> Result<PathBuf>;
}

/// Built-in compiler producing a packed container.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackedResourceCompiler;

impl ResourceCompiler for PackedResourceCompiler {
    fn compile(&self, description: &Path, output: &Path) -> Result<PathBuf> {
        let text = std::fs::read_to_string(description)
            .fs_context("reading resource description", description)?;
        let base = description.parent().unwrap_or_else(|| Path::new("."));

        let mut resources = Vec::new();
        for entry in parse_description(&text)? {
            let path = if entry.path.is_relative() {
                base.join(&entry.path)
            } else {
                entry.path.clone()
            };
            let data = std::fs::read(&path).fs_context("reading resource data", &path)?;
            log::debug!("resource {} {}: {} bytes", entry.name, entry.kind, data.len());
            resources.push(Resource {
                name: entry.name,
                kind: entry.kind,
                data,
            });
        }

        std::fs::write(output, pack_resources(&resources)?)
            .fs_context("writing resource container", output)?;
        Ok(output.to_path_buf())
    }
}

/// External `rc` + `link` pair producing a resource-only DLL.
pub struct ExternalResourceCompiler<'a> {
    runner: &'a dyn ProcessRunner,
    rc_program: String,
    link_program: String,
}

impl<'a> ExternalResourceCompiler<'a> {
    /// Compiler invoking `rc_program` then `link_program`.
    pub fn new(runner: &'a dyn ProcessRunner, rc_program: impl Into<String>, link_program: impl Into<String>) -> Self {
        Self {
            runner,
            rc_program: rc_program.into(),
            link_program: link_program.into(),
        }
    }
}

impl ResourceCompiler for ExternalResourceCompiler<'_> {
    fn compile(&self, description: &Path, output: &Path) -> Result<PathBuf> {
        let res = description.with_extension("res");
        let rc = ToolCommand::new(&self.rc_program)
            .arg(format!("/fo{}", res.display()))
            .path_arg(description);
        run_tool(self.runner, &rc, &res)?;

        let link = ToolCommand::new(&self.link_program)
            .args(["/NOLOGO", "/NOENTRY", "/DLL", "/MACHINE:X86"])
            .arg(format!("/OUT:{}", output.display()))
            .path_arg(&res);
        run_tool(self.runner, &link, output)
    }
}
