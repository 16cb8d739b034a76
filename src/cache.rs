use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::domain::{AuthorityRecord, LookupMode};
use crate::error::KiraError;
use crate::normalize::normalize;

pub const CACHE_FILE_NAME: &str = "authority-cache.jsonl";
const CACHE_SCHEMA_VERSION: u32 = 1;
const COMPACT_MIN_LINES: usize = 256;

pub fn cache_key(mode: LookupMode, query: &str) -> String {
    format!("{mode}:{}", normalize(query))
}

/// Keyed store of authority answers, injected into the cached authority.
/// `put` calls are serialized by the implementation, never by the caller.
pub trait AuthorityCache: Send + Sync {
    fn get(&self, key: &str) -> Option<AuthorityRecord>;
    fn put(&self, key: &str, record: &AuthorityRecord) -> Result<(), KiraError>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheHeader {
    schema_version: u32,
}

#[derive(Debug, Deserialize)]
struct CacheLine {
    key: String,
    record: AuthorityRecord,
}

#[derive(Serialize)]
struct CacheLineRef<'a> {
    key: &'a str,
    record: &'a AuthorityRecord,
}

// Append-only JSON Lines file: a header line, then one `{key, record}` line per
// answer. Writers from any process append under an exclusive lock on a sidecar
// `.lock` file; a torn trailing line from a killed run is skipped on load.
#[derive(Debug)]
pub struct FileAuthorityCache {
    path: Utf8PathBuf,
    entries: Mutex<BTreeMap<String, AuthorityRecord>>,
}

impl FileAuthorityCache {
    pub fn default_path() -> Result<Utf8PathBuf, KiraError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir()
                        .join(".cache")
                        .join("kira-geneset-reconciler")
                        .join(CACHE_FILE_NAME),
                )
                .ok()
            })
            .ok_or_else(|| KiraError::Filesystem("unable to resolve cache directory".to_string()))
    }

    pub fn open(path: Utf8PathBuf) -> Result<Self, KiraError> {
        let entries = if path.as_std_path().exists() {
            let _lock = lock_cache(&path)?;
            let (entries, lines) = read_entries(&path)?;
            if lines >= COMPACT_MIN_LINES && lines > entries.len() * 2 {
                tracing::debug!(path = %path, lines, entries = entries.len(), "compacting authority cache");
                write_compacted(&path, &entries)?;
            }
            entries
        } else {
            BTreeMap::new()
        };
        tracing::debug!(path = %path, entries = entries.len(), "authority cache opened");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl AuthorityCache for FileAuthorityCache {
    fn get(&self, key: &str) -> Option<AuthorityRecord> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn put(&self, key: &str, record: &AuthorityRecord) -> Result<(), KiraError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| KiraError::Cache("cache lock poisoned".to_string()))?;
        if guard.get(key) == Some(record) {
            return Ok(());
        }
        append_entry(&self.path, key, record)?;
        guard.insert(key.to_string(), record.clone());
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.lock().map(|guard| guard.len()).unwrap_or(0)
    }
}

fn parent_dir(path: &Utf8Path) -> &Utf8Path {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    }
}

// Released when the returned handle is dropped.
fn lock_cache(path: &Utf8Path) -> Result<File, KiraError> {
    let parent = parent_dir(path);
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let lock_path = format!("{path}.lock");
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|err| KiraError::Cache(format!("open {lock_path}: {err}")))?;
    file.lock()
        .map_err(|err| KiraError::Cache(format!("lock {lock_path}: {err}")))?;
    Ok(file)
}

fn read_entries(path: &Utf8Path) -> Result<(BTreeMap<String, AuthorityRecord>, usize), KiraError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| KiraError::Cache(format!("read {path}: {err}")))?;
    let mut lines = content.lines().filter(|line| !line.trim().is_empty());
    let mut entries = BTreeMap::new();
    let Some(header) = lines.next() else {
        return Ok((entries, 0));
    };
    let header: CacheHeader = serde_json::from_str(header)
        .map_err(|err| KiraError::Cache(format!("parse header of {path}: {err}")))?;
    if header.schema_version != CACHE_SCHEMA_VERSION {
        return Err(KiraError::Cache(format!(
            "unsupported cache schema version {} in {path}",
            header.schema_version
        )));
    }

    let mut count = 0;
    for line in lines {
        count += 1;
        match serde_json::from_str::<CacheLine>(line) {
            Ok(entry) => {
                entries.insert(entry.key, entry.record);
            }
            Err(err) => tracing::warn!(path = %path, error = %err, "unreadable cache line skipped"),
        }
    }
    Ok((entries, count))
}

fn encode_line(key: &str, record: &AuthorityRecord) -> Result<String, KiraError> {
    let mut line = serde_json::to_string(&CacheLineRef { key, record })
        .map_err(|err| KiraError::Cache(err.to_string()))?;
    line.push('\n');
    Ok(line)
}

fn encode_header() -> Result<String, KiraError> {
    let mut line = serde_json::to_string(&CacheHeader {
        schema_version: CACHE_SCHEMA_VERSION,
    })
    .map_err(|err| KiraError::Cache(err.to_string()))?;
    line.push('\n');
    Ok(line)
}

fn append_entry(path: &Utf8Path, key: &str, record: &AuthorityRecord) -> Result<(), KiraError> {
    let _lock = lock_cache(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path.as_std_path())
        .map_err(|err| KiraError::Cache(format!("open {path}: {err}")))?;
    let len = file
        .metadata()
        .map_err(|err| KiraError::Filesystem(err.to_string()))?
        .len();

    let mut chunk = if len == 0 {
        encode_header()?
    } else if !ends_with_newline(&mut file)? {
        // A killed run left a torn line; start on a fresh one.
        "\n".to_string()
    } else {
        String::new()
    };
    chunk.push_str(&encode_line(key, record)?);
    file.write_all(chunk.as_bytes())
        .map_err(|err| KiraError::Filesystem(format!("append {path}: {err}")))?;
    file.sync_data()
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(())
}

fn ends_with_newline(file: &mut File) -> Result<bool, KiraError> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))
        .and_then(|_| file.read_exact(&mut last))
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(last[0] == b'\n')
}

// Caller holds the cache lock.
fn write_compacted(
    path: &Utf8Path,
    entries: &BTreeMap<String, AuthorityRecord>,
) -> Result<(), KiraError> {
    let mut content = encode_header()?;
    for (key, record) in entries {
        content.push_str(&encode_line(key, record)?);
    }
    let mut temp = Builder::new()
        .prefix("kira-gsr-cache")
        .tempfile_in(parent_dir(path).as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.write_all(content.as_bytes())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryAuthorityCache {
    entries: Mutex<BTreeMap<String, AuthorityRecord>>,
}

impl MemoryAuthorityCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuthorityCache for MemoryAuthorityCache {
    fn get(&self, key: &str) -> Option<AuthorityRecord> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn put(&self, key: &str, record: &AuthorityRecord) -> Result<(), KiraError> {
        self.entries
            .lock()
            .map_err(|_| KiraError::Cache("cache lock poisoned".to_string()))?
            .insert(key.to_string(), record.clone());
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.lock().map(|guard| guard.len()).unwrap_or(0)
    }
}
