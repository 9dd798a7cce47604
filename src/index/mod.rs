//! Readers for the pre-built genome indices: the sharded k-mer table, the
//! sharded position list, and the assembly skeleton with its 2-bit base
//! file.  All are opened read-only for the duration of the run; every
//! worker thread holds its own clone (buffer, descriptors, position).

pub mod genome;
pub mod kmer_stream;
pub mod post_list;

use std::io::{self, Read};
use std::path::{Path, PathBuf};

pub(crate) fn read_i32(r: &mut impl Read) -> io::Result<i32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(i32::from_le_bytes(b))
}

pub(crate) fn read_i64(r: &mut impl Read) -> io::Result<i64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(i64::from_le_bytes(b))
}

/// `<root>.<ext>`, tolerating a `.gdb` suffix on the given source path.
pub fn index_file(src: &Path, ext: &str) -> PathBuf {
    let s = src.to_string_lossy();
    let root = s.strip_suffix(".gdb").unwrap_or(&s);
    PathBuf::from(format!("{}.{}", root, ext))
}

pub(crate) fn open_err(path: &Path, what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("cannot open {} {}", what, path.display()),
    )
}
