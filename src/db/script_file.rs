use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::db::error::ScriptLoadError;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const DECODE_CONTEXT_BYTES: usize = 12;

/// A script file located on disk and decoded to text.
#[derive(Debug, Clone)]
pub struct ScriptSource {
    pub path: PathBuf,
    pub text: String,
}

impl ScriptSource {
    pub fn load(name: &str, search_dirs: &[PathBuf]) -> Result<Self, ScriptLoadError> {
        let path = Self::resolve_path(name, search_dirs)?;
        let bytes = fs::read(&path).map_err(|source| ScriptLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let text = Self::decode(&bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "loaded SQL script");
        Ok(Self { path, text })
    }

    /// Places a script name is looked up, in priority order.
    ///
    /// The name is tried as given and relative to the working directory,
    /// then under every configured search directory and the directory of the
    /// running executable (and its parent), first directly, then in `src/`,
    /// then in `sql/`.
    pub fn candidate_paths(name: &str, search_dirs: &[PathBuf]) -> Vec<PathBuf> {
        let name = name.trim();
        let mut bases: Vec<PathBuf> = search_dirs.to_vec();
        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            if let Some(parent) = exe_dir.parent() {
                let parent = parent.to_path_buf();
                bases.push(exe_dir);
                bases.push(parent);
            } else {
                bases.push(exe_dir);
            }
        }

        let mut candidates = vec![PathBuf::from(name)];
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join(name));
        }
        for sub in [None, Some("src"), Some("sql")] {
            for base in &bases {
                let dir = match sub {
                    Some(sub) => base.join(sub),
                    None => base.clone(),
                };
                candidates.push(dir.join(name));
            }
        }
        candidates
    }

    pub fn resolve_path(name: &str, search_dirs: &[PathBuf]) -> Result<PathBuf, ScriptLoadError> {
        let candidates = Self::candidate_paths(name, search_dirs);
        if let Some(found) = candidates.iter().find(|path| path.is_file()) {
            return Ok(found.clone());
        }
        let cwd = std::env::current_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();
        Err(ScriptLoadError::NotFound {
            name: name.trim().to_string(),
            cwd,
            searched: candidates,
        })
    }

    /// Decodes raw file bytes as UTF-8.
    ///
    /// Every `C2 A0` pair (an encoded no-break space) becomes a plain space
    /// before decoding and a leading BOM is dropped. Offsets in a decode
    /// error refer to the buffer after the no-break space replacement.
    pub fn decode(bytes: &[u8]) -> Result<String, ScriptLoadError> {
        let normalized = replace_nbsp_bytes(bytes);
        let bom_len = if normalized.starts_with(UTF8_BOM) {
            UTF8_BOM.len()
        } else {
            0
        };

        match std::str::from_utf8(&normalized[bom_len..]) {
            Ok(text) => Ok(text.replace('\u{00A0}', " ")),
            Err(err) => {
                let offset = bom_len + err.valid_up_to();
                let start = offset.saturating_sub(DECODE_CONTEXT_BYTES);
                let end = (offset + DECODE_CONTEXT_BYTES).min(normalized.len());
                Err(ScriptLoadError::Decode {
                    offset,
                    byte: normalized[offset],
                    context: normalized[start..end].escape_ascii().to_string(),
                })
            }
        }
    }
}

fn replace_nbsp_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == 0xC2 && bytes.get(i + 1) == Some(&0xA0) {
            out.push(b' ');
            i += 2;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_replaces_encoded_nbsp_with_space() {
        let bytes = b"SELECT\xC2\xA01;";
        assert_eq!(ScriptSource::decode(bytes).unwrap(), "SELECT 1;");
    }

    #[test]
    fn decode_strips_bom() {
        let bytes = b"\xEF\xBB\xBFCREATE TABLE t (id int);";
        assert_eq!(
            ScriptSource::decode(bytes).unwrap(),
            "CREATE TABLE t (id int);"
        );
    }

    #[test]
    fn decode_keeps_other_unicode() {
        let text = "INSERT INTO t VALUES ('привет');";
        assert_eq!(ScriptSource::decode(text.as_bytes()).unwrap(), text);
    }

    #[test]
    fn decode_reports_offset_and_byte() {
        let bytes = b"SELECT 'abc\xFFdef';";
        match ScriptSource::decode(bytes) {
            Err(ScriptLoadError::Decode {
                offset,
                byte,
                context,
            }) => {
                assert_eq!(offset, 11);
                assert_eq!(byte, 0xFF);
                assert!(context.contains("\\xff"), "context: {context}");
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn decode_offset_counts_bom() {
        let bytes = b"\xEF\xBB\xBFab\xC3";
        match ScriptSource::decode(bytes) {
            Err(ScriptLoadError::Decode { offset, byte, .. }) => {
                assert_eq!(offset, 5);
                assert_eq!(byte, 0xC3);
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn resolve_prefers_search_dirs_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let name = "pgscript_resolve_order_test.sql";
        fs::write(second.path().join(name), "SELECT 2;").unwrap();
        fs::create_dir(first.path().join("sql")).unwrap();
        fs::write(first.path().join("sql").join(name), "SELECT 1;").unwrap();

        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let resolved = ScriptSource::resolve_path(name, &dirs).unwrap();
        // bare directories are searched before their sql/ subdirectories
        assert_eq!(resolved, second.path().join(name));
    }

    #[test]
    fn resolve_missing_file_lists_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = vec![dir.path().to_path_buf()];
        match ScriptSource::resolve_path("  pgscript_missing_file.sql ", &dirs) {
            Err(ScriptLoadError::NotFound { name, searched, .. }) => {
                assert_eq!(name, "pgscript_missing_file.sql");
                assert!(searched.contains(&dir.path().join("pgscript_missing_file.sql")));
                let in_sql_dir = dir.path().join("sql").join("pgscript_missing_file.sql");
                assert!(searched.contains(&in_sql_dir));
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[test]
    fn load_reads_and_decodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.sql");
        fs::write(&path, b"\xEF\xBB\xBFINSERT INTO t VALUES (1);\xC2\xA0").unwrap();

        let source = ScriptSource::load(path.to_str().unwrap(), &[]).unwrap();
        assert_eq!(source.path, path);
        assert_eq!(source.text, "INSERT INTO t VALUES (1); ");
    }
}
