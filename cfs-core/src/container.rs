//! CFS container codec.
//!
//! A container stream is a sequence of entries with no separators or
//! stream-level prefix; the length is self-describing entry by entry.
//! Every entry occupies a whole number of 256-byte blocks:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0      | 3    | magic `"CFS"` |
//! | 3      | 1    | block count (1..255) |
//! | 4      | 2    | file size, little endian |
//! | 6      | 26   | name, zero-padded, zero-terminated |
//! | 32     | n    | payload: file bytes + zero padding to `blocks*256-32` |
//!
//! Directories are never stored; they are implied by `/` in entry names and
//! materialized on unpack.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{CfsError, CfsResult};

/// Fixed block size; every entry occupies a whole number of these.
pub const BLOCK_SIZE: usize = 0x100;

/// Fixed header size, carved out of the first block.
pub const HEADER_SIZE: usize = 0x20;

/// Maximum entry name length in bytes (26 minus the mandatory NUL).
pub const MAX_NAME_LEN: usize = 25;

/// Maximum file size: the block count must fit in one byte, so an entry
/// spans at most 255 blocks.
pub const MAX_FILE_SIZE: usize = 0xff * BLOCK_SIZE - HEADER_SIZE;

const MAGIC: &[u8; 3] = b"CFS";

/// One file in a container. `name` is a `/`-joined relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    pub name: String,
    pub data: Vec<u8>,
}

/// Number of blocks an entry with `size` payload bytes occupies.
///
/// The first block holds `256 - 32` payload bytes, the rest a steady 256.
/// Integer division under-counts by exactly one at the block edge, hence
/// the final correction step.
pub fn block_count(size: usize) -> usize {
    let mut count = 1;
    if size > BLOCK_SIZE - HEADER_SIZE {
        count += (size - (BLOCK_SIZE - HEADER_SIZE)) / BLOCK_SIZE;
    }
    if count * BLOCK_SIZE < size + HEADER_SIZE {
        count += 1;
    }
    count
}

/// Append one framed entry to `out`.
fn write_entry(out: &mut Vec<u8>, name: &str, data: &[u8]) -> CfsResult<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(CfsError::NameTooLong(name.to_string()));
    }
    if data.len() > MAX_FILE_SIZE {
        return Err(CfsError::FileTooLarge {
            path: PathBuf::from(name),
            size: data.len() as u64,
        });
    }
    let blocks = block_count(data.len());

    out.extend_from_slice(MAGIC);
    out.push(blocks as u8);
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    let mut name_field = [0u8; HEADER_SIZE - 6];
    name_field[..name.len()].copy_from_slice(name.as_bytes());
    out.extend_from_slice(&name_field);

    out.extend_from_slice(data);
    out.resize(out.len() + (blocks * BLOCK_SIZE - HEADER_SIZE - data.len()), 0);
    Ok(())
}

/// Pack in-memory entries into a container stream.
pub fn pack_entries(entries: &[ContainerEntry]) -> CfsResult<Vec<u8>> {
    let mut out = Vec::new();
    for entry in entries {
        write_entry(&mut out, &entry.name, &entry.data)?;
    }
    Ok(out)
}

/// Pack a directory tree into a container stream.
///
/// Directories recurse, regular files become entries; anything else is
/// rejected. Entries at each level are emitted sorted by name so the output
/// is byte-reproducible across hosts. Any failure aborts the whole pack.
pub fn pack_dir(root: &Path) -> CfsResult<Vec<u8>> {
    let mut out = Vec::new();
    pack_dir_inner(root, "", &mut out)?;
    Ok(out)
}

fn pack_dir_inner(dir: &Path, prefix: &str, out: &mut Vec<u8>) -> CfsResult<()> {
    let mut entries: Vec<fs::DirEntry> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        let name = name
            .to_str()
            .ok_or_else(|| CfsError::UnsupportedEntryKind(path.clone()))?;

        let joined = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };
        if joined.len() > MAX_NAME_LEN {
            return Err(CfsError::NameTooLong(joined));
        }

        if file_type.is_dir() {
            pack_dir_inner(&path, &joined, out)?;
        } else if file_type.is_file() {
            let data = fs::read(&path)?;
            if data.len() > MAX_FILE_SIZE {
                return Err(CfsError::FileTooLarge {
                    path,
                    size: data.len() as u64,
                });
            }
            write_entry(out, &joined, &data)?;
        } else {
            return Err(CfsError::UnsupportedEntryKind(path));
        }
    }
    Ok(())
}

/// Parse one entry at `offset`.
///
/// `Ok(None)` means the stream ends cleanly here: nothing left, or the next
/// bytes don't carry the magic. Truncation inside an entry and impossible
/// headers are hard errors.
fn read_entry(stream: &[u8], offset: usize) -> CfsResult<Option<(ContainerEntry, usize)>> {
    let rest = &stream[offset.min(stream.len())..];
    if rest.len() < HEADER_SIZE || &rest[0..3] != MAGIC {
        return Ok(None);
    }
    let blocks = rest[3] as usize;
    if blocks == 0 {
        return Ok(None);
    }
    let size = u16::from_le_bytes([rest[4], rest[5]]) as usize;
    let payload_len = blocks * BLOCK_SIZE - HEADER_SIZE;
    if size > payload_len {
        return Err(CfsError::MalformedHeader(offset));
    }

    let name_field = &rest[6..HEADER_SIZE];
    let name_len = name_field
        .iter()
        .position(|&b| b == 0)
        .ok_or(CfsError::MalformedHeader(offset))?;
    if name_len == 0 {
        return Err(CfsError::MalformedHeader(offset));
    }
    let name = std::str::from_utf8(&name_field[..name_len])
        .map_err(|_| CfsError::MalformedHeader(offset))?
        .to_string();

    if rest.len() < HEADER_SIZE + payload_len {
        return Err(CfsError::TruncatedStream(name));
    }
    let data = rest[HEADER_SIZE..HEADER_SIZE + size].to_vec();
    // The padding after `size` bytes is consumed and discarded.
    Ok(Some((
        ContainerEntry { name, data },
        offset + HEADER_SIZE + payload_len,
    )))
}

/// Unpack a container stream into in-memory entries.
///
/// The first entry must parse or the stream is rejected wholesale; after
/// that, a non-entry where the next header should be ends the stream
/// cleanly (trailing bytes are ignored).
pub fn parse_entries(stream: &[u8]) -> CfsResult<Vec<ContainerEntry>> {
    let mut entries = Vec::new();
    let mut offset = 0;
    loop {
        match read_entry(stream, offset)? {
            Some((entry, next)) => {
                entries.push(entry);
                offset = next;
            }
            None if entries.is_empty() => return Err(CfsError::EmptyOrMalformedStream),
            None => return Ok(entries),
        }
    }
}

/// Unpack a container stream into files under `dest`, creating intermediate
/// directories as needed. Returns the number of entries written.
///
/// Entries are materialized one by one as they parse. A defective entry
/// behind at least one valid one stops the unpack but keeps the files
/// already on disk, returning their count; a bad or absent first entry is
/// a hard error. Filesystem failures always abort.
pub fn unpack_to_dir(stream: &[u8], dest: &Path) -> CfsResult<usize> {
    let mut offset = 0;
    let mut written = 0;
    loop {
        let entry = match checked_entry(stream, offset) {
            Ok(entry) => entry,
            Err(err) if written == 0 => return Err(err),
            Err(_) => return Ok(written),
        };
        let Some((entry, next)) = entry else {
            if written == 0 {
                return Err(CfsError::EmptyOrMalformedStream);
            }
            return Ok(written);
        };
        let target = dest.join(&entry.name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|_| CfsError::DirectoryCreateFailure(parent.to_path_buf()))?;
        }
        fs::write(&target, &entry.data)?;
        written += 1;
        offset = next;
    }
}

/// Parse one entry and refuse names that would escape the destination.
fn checked_entry(stream: &[u8], offset: usize) -> CfsResult<Option<(ContainerEntry, usize)>> {
    let Some((entry, next)) = read_entry(stream, offset)? else {
        return Ok(None);
    };
    let escapes = Path::new(&entry.name)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(CfsError::MalformedHeader(offset));
    }
    Ok(Some((entry, next)))
}
