//! On-disk artifact format for built vector indexes.
//!
//! ```text
//! offset  size  field
//! 0       4     magic "CTVX"
//! 4       4     format version (u32 LE)
//! 8       4     dim (u32 LE)
//! 12      8     row count (u64 LE)
//! 20      ...   row-major f32 LE values, count × dim
//! ```
//!
//! Writes go to a sibling temp file that is renamed into place, so a reader
//! never observes a partially written artifact.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::Rows;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{Result, TriageError};
use crate::models::new_id;

const MAGIC: &[u8; 4] = b"CTVX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 20;

pub(crate) fn write_rows(path: &Path, dim: usize, count: usize, data: &[f32]) -> Result<()> {
    if data.len() != dim * count {
        return Err(TriageError::invalid(format!(
            "row data holds {} values, expected {} × {}",
            data.len(),
            count,
            dim
        )));
    }
    let dim32 = u32::try_from(dim)
        .map_err(|_| TriageError::invalid(format!("dimension {} too large", dim)))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);

    let written = (|| -> Result<()> {
        let file = fs::File::create(&tmp)?;
        let mut w = BufWriter::new(file);
        w.write_all(MAGIC)?;
        w.write_all(&FORMAT_VERSION.to_le_bytes())?;
        w.write_all(&dim32.to_le_bytes())?;
        w.write_all(&(count as u64).to_le_bytes())?;
        w.write_all(&vec_to_blob(data))?;
        let file = w.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();

    if written.is_err() {
        if let Err(e) = fs::remove_file(&tmp) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %tmp.display(), error = %e, "failed to remove temporary index artifact");
            }
        }
    }
    written
}

pub(crate) fn read_rows(path: &Path) -> Result<Rows> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TriageError::not_found(format!(
                "vector index artifact {}",
                path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };

    let corrupt = |what: &str| {
        TriageError::DataIntegrity(format!("corrupt index artifact {}: {}", path.display(), what))
    };

    if bytes.len() < HEADER_LEN {
        return Err(corrupt("truncated header"));
    }
    if &bytes[0..4] != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(corrupt(&format!("unsupported format version {}", version)));
    }
    let dim = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[12..20]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let expected = count
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| corrupt("size overflow"))?;
    let body = &bytes[HEADER_LEN..];
    if body.len() != expected {
        return Err(corrupt(&format!(
            "expected {} body bytes, found {}",
            expected,
            body.len()
        )));
    }

    Ok(Rows::from_parts(dim, blob_to_vec(body)))
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, new_id()))
}
