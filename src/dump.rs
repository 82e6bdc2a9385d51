//! HTTP dump of handled responses

use mime::Mime;
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering}
};
use crate::{
    codec::TestResponse,
    error::{Error, ErrorKind}
};

const FALLBACK_EXTENSION: &str = "txt";

/// Receives every parsed response when dumping is enabled
pub trait DumpSink: Send + Sync + 'static {
    /// Persists `response`, which answered `method` on `path`
    fn dump(&self, method: &str, path: &str, response: &TestResponse) -> Result<(), Error>;
}

/// Writes response bodies into a directory as
/// `<seq>_<method>_<path>.<ext>`
pub struct FileDump {
    dir: PathBuf,
    seq: AtomicU64
}

impl fmt::Debug for FileDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDump")
            .field("dir", &self.dir)
            .field("seq", &self.seq.load(Ordering::Relaxed))
            .finish()
    }
}

impl FileDump {
    /// Creates `dir` if needed and dumps into it
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|err| Error::new(ErrorKind::Dump, err))?;
        Ok(Self { dir, seq: AtomicU64::new(0) })
    }

    /// Returns the dump directory
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(&self, method: &str, path: &str, response: &TestResponse) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let extension = response
            .header("content-type")
            .and_then(|ct| ct.parse::<Mime>().ok())
            .map_or(FALLBACK_EXTENSION, |mime| extension_of(&mime));
        format!("{seq:04}_{method}_{}.{extension}", sanitize(path))
    }
}

impl DumpSink for FileDump {
    fn dump(&self, method: &str, path: &str, response: &TestResponse) -> Result<(), Error> {
        let file = self.dir.join(self.file_name(method, path, response));
        std::fs::write(&file, response.body()).map_err(|err| Error::new(ErrorKind::Dump, err))?;

        tracing::debug!(file = %file.display(), status = response.status_code(), "response dumped");
        Ok(())
    }
}

/// Picks the file extension for `mime`.
///
/// Prefers the extension named like the subtype (`html`, `json`, `jpeg`),
/// then `txt` for text, then whatever `mime_guess` lists first.
fn extension_of(mime: &Mime) -> &'static str {
    let Some(extensions) = mime_guess::get_mime_extensions(mime) else {
        return FALLBACK_EXTENSION;
    };
    let subtype = mime.subtype().as_str();
    extensions
        .iter()
        .find(|ext| ext.eq_ignore_ascii_case(subtype))
        .or_else(|| (mime.type_() == mime::TEXT)
            .then(|| extensions.iter().find(|ext| **ext == FALLBACK_EXTENSION))
            .flatten())
        .or_else(|| extensions.first())
        .copied()
        .unwrap_or(FALLBACK_EXTENSION)
}

/// Turns a request target into a file name fragment
fn sanitize(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let name: String = path
        .trim_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    if name.is_empty() { "root".into() } else { name }
}
