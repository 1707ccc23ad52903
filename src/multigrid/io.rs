//! Persistence of near-kernel vectors.
//!
//! `FileStore` writes one file per level, `<prefix>_level_<n>`, holding a small header
//! followed by the raw vector data:
//!
//! ```text
//! b"LAMGVEC1" | u32 ndim | u64 dims[ndim] | u32 nspin | u32 ncolor | u32 n_vec
//! | n_vec × len × (f64 re, f64 im)
//! ```
//!
//! All integers and floats are little-endian. The layout carries no interchange
//! guarantees beyond round-tripping through this crate.

use crate::core::field::{FieldParam, LatticeField, SiteSubset};
use crate::error::MgError;
use num_complex::Complex64;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 8] = b"LAMGVEC1";

/// Source and sink of near-kernel vectors, keyed by level.
pub trait VectorStore: Send + Sync {
    /// Read `n_vec` full-lattice vectors shaped like `template`.
    fn load(
        &self,
        level: usize,
        template: &FieldParam,
        n_vec: usize,
    ) -> Result<Vec<LatticeField>, MgError>;

    fn save(&self, level: usize, vectors: &[LatticeField]) -> Result<(), MgError>;
}

#[derive(Debug, Clone)]
pub struct FileStore {
    prefix: PathBuf,
}

impl FileStore {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn path(&self, level: usize) -> PathBuf {
        let mut name = self.prefix.clone().into_os_string();
        name.push(format!("_level_{level}"));
        PathBuf::from(name)
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> MgError + '_ {
    move |source| MgError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn read_u32(r: &mut impl Read, path: &Path) -> Result<u32, MgError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(io_err(path))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read, path: &Path) -> Result<u64, MgError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(io_err(path))?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64(r: &mut impl Read, path: &Path) -> Result<f64, MgError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(io_err(path))?;
    Ok(f64::from_le_bytes(buf))
}

impl VectorStore for FileStore {
    fn load(
        &self,
        level: usize,
        template: &FieldParam,
        n_vec: usize,
    ) -> Result<Vec<LatticeField>, MgError> {
        let path = self.path(level);
        let file = File::open(&path).map_err(io_err(&path))?;
        let mut r = BufReader::new(file);

        let mut magic = [0u8; 8];
        r.read_exact(&mut magic).map_err(io_err(&path))?;
        if &magic != MAGIC {
            return Err(MgError::Format(format!("{}: bad magic", path.display())));
        }
        let ndim = read_u32(&mut r, &path)? as usize;
        if ndim != template.lattice.ndim() {
            return Err(MgError::Format(format!(
                "{}: header claims {ndim} dimensions, expected {}",
                path.display(),
                template.lattice.ndim()
            )));
        }
        let mut dims = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            dims.push(read_u64(&mut r, &path)? as usize);
        }
        let nspin = read_u32(&mut r, &path)? as usize;
        let ncolor = read_u32(&mut r, &path)? as usize;
        let stored = read_u32(&mut r, &path)? as usize;
        if dims != template.lattice.dims() || nspin != template.nspin || ncolor != template.ncolor
        {
            return Err(MgError::Format(format!(
                "{}: stores {:?} x {}s x {}c, expected {}",
                path.display(),
                dims,
                nspin,
                ncolor,
                template.describe()
            )));
        }
        if stored < n_vec {
            return Err(MgError::Format(format!(
                "{}: holds {stored} vectors, {n_vec} requested",
                path.display()
            )));
        }

        let param = template.clone().with_subset(SiteSubset::Full);
        let mut vectors = Vec::with_capacity(n_vec);
        for _ in 0..n_vec {
            let mut field = LatticeField::new(param.clone());
            for z in field.data_mut() {
                let re = read_f64(&mut r, &path)?;
                let im = read_f64(&mut r, &path)?;
                *z = Complex64::new(re, im);
            }
            field.round_to_precision();
            vectors.push(field);
        }
        Ok(vectors)
    }

    fn save(&self, level: usize, vectors: &[LatticeField]) -> Result<(), MgError> {
        let Some(first) = vectors.first() else {
            return Ok(());
        };
        let param = first.param();
        if param.subset != SiteSubset::Full {
            return Err(MgError::config("only full-lattice vectors can be saved"));
        }
        let path = self.path(level);
        let file = File::create(&path).map_err(io_err(&path))?;
        let mut w = BufWriter::new(file);
        let mut header = Vec::new();
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&(param.lattice.ndim() as u32).to_le_bytes());
        for &l in param.lattice.dims() {
            header.extend_from_slice(&(l as u64).to_le_bytes());
        }
        header.extend_from_slice(&(param.nspin as u32).to_le_bytes());
        header.extend_from_slice(&(param.ncolor as u32).to_le_bytes());
        header.extend_from_slice(&(vectors.len() as u32).to_le_bytes());
        w.write_all(&header).map_err(io_err(&path))?;
        for v in vectors {
            if !v.param().same_layout(param) {
                return Err(MgError::DimensionMismatch(format!(
                    "cannot save {} alongside {}",
                    v.param().describe(),
                    param.describe()
                )));
            }
            for z in v.data() {
                w.write_all(&z.re.to_le_bytes()).map_err(io_err(&path))?;
                w.write_all(&z.im.to_le_bytes()).map_err(io_err(&path))?;
            }
        }
        w.flush().map_err(io_err(&path))?;
        log::debug!("saved {} vectors to {}", vectors.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::SourceKind;
    use crate::core::lattice::Lattice;

    fn scratch_prefix(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lamg-io-{tag}-{}", std::process::id()))
    }

    #[test]
    fn level_suffix() {
        let store = FileStore::new("/tmp/nullvecs");
        assert_eq!(store.path(2), PathBuf::from("/tmp/nullvecs_level_2"));
    }

    #[test]
    fn save_then_load() {
        let param = FieldParam::new(Lattice::new(&[4, 2]).unwrap(), 2, 1);
        let vectors: Vec<LatticeField> = (0..3)
            .map(|i| {
                let mut f = LatticeField::new(param.clone());
                f.source(SourceKind::Random(i)).unwrap();
                f
            })
            .collect();
        let store = FileStore::new(scratch_prefix("roundtrip"));
        store.save(0, &vectors).unwrap();
        let loaded = store.load(0, &param, 2).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].data(), vectors[1].data());
        let _ = std::fs::remove_file(store.path(0));
    }

    #[test]
    fn wrong_shape_is_a_format_error() {
        let param = FieldParam::new(Lattice::new(&[4]).unwrap(), 1, 1);
        let mut f = LatticeField::new(param.clone());
        f.source(SourceKind::Random(1)).unwrap();
        let store = FileStore::new(scratch_prefix("shape"));
        store.save(1, &[f]).unwrap();
        let other = FieldParam::new(Lattice::new(&[4]).unwrap(), 1, 2);
        assert!(matches!(store.load(1, &other, 1), Err(MgError::Format(_))));
        let _ = std::fs::remove_file(store.path(1));
    }

    #[test]
    fn corrupt_dimension_count_is_a_format_error() {
        let store = FileStore::new(scratch_prefix("corrupt"));
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(store.path(0), &bytes).unwrap();
        let param = FieldParam::new(Lattice::new(&[4, 4]).unwrap(), 1, 1);
        assert!(matches!(store.load(0, &param, 1), Err(MgError::Format(_))));
        let _ = std::fs::remove_file(store.path(0));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let store = FileStore::new(scratch_prefix("missing"));
        let param = FieldParam::new(Lattice::new(&[2]).unwrap(), 1, 1);
        assert!(matches!(store.load(0, &param, 1), Err(MgError::Io { .. })));
    }
}
