// crates/core/src/codec.rs
//! Work transfer encoding.
//!
//! A worker receives its job as a self-contained shell script on stdout of
//! the forced command. The script unpacks the job type's bundle, writes the
//! job payload to `data` and the job id to `id`, then runs `./exec`. Workers
//! in the field pipe this straight into `sh`, so the layout below is a wire
//! format: changing it breaks deployed workers.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::CodecError;
use crate::types::{is_valid_type_name, JobId};

/// Heredoc terminators. `_` is outside the standard base64 alphabet, so an
/// encoded line can never end a heredoc early.
pub const BUNDLE_MARKER: &str = "__JOBFARM_BUNDLE__";
pub const DATA_MARKER: &str = "__JOBFARM_DATA__";

/// Bundle archives are gzip-compressed tarballs named after their job type.
pub const BUNDLE_EXTENSION: &str = "tar.gz";

/// Fixed file names the worker-side entry point relies on.
pub const DATA_FILE: &str = "data";
pub const ID_FILE: &str = "id";
pub const ENTRY_POINT: &str = "./exec";

/// Input bytes per encoded line (57 bytes -> 76 base64 characters).
const LINE_BYTES: usize = 57;
/// Input bytes per written segment; a whole number of lines.
const SEGMENT_BYTES: usize = LINE_BYTES * 1024;

/// Resolves job type names to bundle archives on disk.
#[derive(Debug, Clone)]
pub struct BundleStore {
    dir: PathBuf,
}

impl BundleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the bundle for `type_name`: `<dir>/<type_name>.tar.gz`.
    pub fn bundle_path(&self, type_name: &str) -> Result<PathBuf, CodecError> {
        if !is_valid_type_name(type_name) {
            return Err(CodecError::InvalidTypeName(type_name.to_string()));
        }
        Ok(self.dir.join(format!("{type_name}.{BUNDLE_EXTENSION}")))
    }

    /// Read the bundle for `type_name` into memory.
    pub async fn load(&self, type_name: &str) -> Result<Vec<u8>, CodecError> {
        let path = self.bundle_path(type_name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CodecError::MissingBundle {
                type_name: type_name.to_string(),
                path,
            }),
            Err(e) => Err(CodecError::io(path, e)),
        }
    }
}

/// The script streamed to a worker for one leased job.
#[derive(Debug, Clone, Copy)]
pub struct WorkScript<'a> {
    job_id: JobId,
    bundle: &'a [u8],
    payload: &'a [u8],
}

impl<'a> WorkScript<'a> {
    pub fn new(job_id: JobId, bundle: &'a [u8], payload: &'a [u8]) -> Self {
        Self {
            job_id,
            bundle,
            payload,
        }
    }

    /// Stream the script to `out`, flushing at the end.
    pub async fn write_to<W>(&self, out: &mut W) -> Result<(), CodecError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        for segment in self.segments() {
            out.write_all(segment.as_bytes())
                .await
                .map_err(CodecError::Output)?;
        }
        out.flush().await.map_err(CodecError::Output)
    }

    /// The whole script as one string.
    pub fn render(&self) -> String {
        self.segments().collect()
    }

    /// Script text in emission order. Large inputs are split so streaming
    /// never holds more than one encoded segment at a time.
    fn segments(&self) -> impl Iterator<Item = Cow<'a, str>> + 'a {
        let job_id = self.job_id;
        let header = Cow::Owned(format!(
            "#!/bin/sh\nset -e\nbase64 -d <<'{BUNDLE_MARKER}' | tar -xzf -\n"
        ));
        let between = Cow::Owned(format!(
            "{BUNDLE_MARKER}\nbase64 -d > {DATA_FILE} <<'{DATA_MARKER}'\n"
        ));
        let footer = Cow::Owned(format!(
            "{DATA_MARKER}\necho {job_id} > {ID_FILE}\n{ENTRY_POINT}\n"
        ));

        std::iter::once(header)
            .chain(encoded_segments(self.bundle))
            .chain(std::iter::once(between))
            .chain(encoded_segments(self.payload))
            .chain(std::iter::once(footer))
    }
}

fn encoded_segments(bytes: &[u8]) -> impl Iterator<Item = Cow<'_, str>> {
    bytes
        .chunks(SEGMENT_BYTES)
        .map(|segment| Cow::Owned(encode_lines(segment)))
}

/// Standard base64 wrapped at 76 columns, every line newline-terminated.
fn encode_lines(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() / LINE_BYTES * 77 + 78);
    for line in bytes.chunks(LINE_BYTES) {
        STANDARD.encode_string(line, &mut out);
        out.push('\n');
    }
    out
}
