use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use uuid::Uuid;

/// Writes `bytes` to a sibling temp file, then renames it over `path`.
///
/// Readers see either the previous content or the complete new content.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = temp_sibling(path);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Fills a fresh staging directory through `fill`, then swaps it in for `dir`.
///
/// Readers see either the previous directory or the complete new one. When
/// `fill` or the swap fails, the staging directory is removed and `dir` is
/// left as it was.
pub fn write_dir_atomic<E>(dir: &Path, fill: impl FnOnce(&Path) -> Result<(), E>) -> Result<(), E>
where
    E: From<io::Error>,
{
    let staging = temp_sibling(dir);
    fs::create_dir_all(&staging)?;
    let result = fill(&staging).and_then(|()| replace_dir(&staging, dir).map_err(E::from));
    if result.is_err() {
        let _ = fs::remove_dir_all(&staging);
    }
    result
}

fn replace_dir(staging: &Path, dir: &Path) -> io::Result<()> {
    let backup = temp_sibling(dir);
    let had_previous = match fs::rename(dir, &backup) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => return Err(err),
    };
    if let Err(err) = fs::rename(staging, dir) {
        if had_previous {
            let _ = fs::rename(&backup, dir);
        }
        return Err(err);
    }
    if had_previous {
        fs::remove_dir_all(&backup)?;
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "artifact".into(), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!(".{name}.tmp-{}", Uuid::new_v4().simple()))
}
