//! Catalog of finished containers: their header records, relative address
//! rewritten, sorted by title and closed by one all-zero record.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tap::Pipe;

use crate::error::{Error, Result};
use crate::format::{field_bytes, ContainerHeader, UrlEncoding, HEADER_SIZE, RELATIVE_URL_SIZE};

/// The player counts catalog entries in a signed byte.
pub const MAX_ENTRIES: usize = 127;

pub const CATALOG_FILE_NAME: &str = "catalog.bin";

/// Everything but unreserved characters and the path separator is escaped.
const ADDRESS_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// One container's header, ready to be written into a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub source: PathBuf,
    pub header: ContainerHeader,
    record: Vec<u8>,
}

impl CatalogEntry {
    /// Reads the header of the container at `path` and points its relative
    /// address at it from `root`, which must be canonical.
    pub fn load(root: &Path, path: &Path) -> Result<Self> {
        let mut record = vec![0u8; HEADER_SIZE];
        File::open(path)
            .and_then(|mut file| file.read_exact(&mut record))
            .map_err(Error::file(path))?;

        let mut header = ContainerHeader::parse(&record)?;
        let address = relative_address(root, path, header.version.url_encoding())?;
        header.set_relative_url(&address)?;

        // Splice the new field in so every other header byte is kept as is.
        let offset = header.version.layout().relative_url;
        record[offset..offset + RELATIVE_URL_SIZE].copy_from_slice(&header.relative_url);

        tracing::debug!("catalog entry {:?} -> {:?}", header.title(), address);
        Ok(Self {
            source: path.to_path_buf(),
            header,
            record,
        })
    }

    pub fn title(&self) -> &[u8] {
        field_bytes(&self.header.title)
    }

    pub fn record(&self) -> &[u8] {
        &self.record
    }
}

/// Path of `path` relative to the canonical directory `root`, joined with
/// `/` and encoded as the header's format version expects.
pub fn relative_address(root: &Path, path: &Path, encoding: UrlEncoding) -> Result<String> {
    let canonical = path.canonicalize().map_err(Error::file(path))?;
    let relative = canonical
        .strip_prefix(root)
        .map_err(|_| Error::OutsideCatalogRoot(path.to_path_buf()))?;

    let parts = relative
        .components()
        .map(|component| match component {
            Component::Normal(part) => part.to_str().ok_or_else(|| {
                Error::file(path)(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "path is not valid UTF-8",
                ))
            }),
            _ => Err(Error::OutsideCatalogRoot(path.to_path_buf())),
        })
        .collect::<Result<Vec<_>>>()?;
    let joined = parts.join("/");

    match encoding {
        UrlEncoding::Raw => joined,
        UrlEncoding::Percent => utf8_percent_encode(&joined, ADDRESS_ESCAPES).to_string(),
    }
    .pipe(Ok)
}

/// Canonical directory the catalog at `catalog` resolves addresses from.
pub fn catalog_root(catalog: &Path) -> Result<PathBuf> {
    let dir = match catalog.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    dir.canonicalize().map_err(Error::file(dir))
}

/// Loads every input and orders the entries by title. Fails before touching
/// any file when there are too many inputs.
pub fn collect_entries<P: AsRef<Path>>(catalog: &Path, inputs: &[P]) -> Result<Vec<CatalogEntry>> {
    if inputs.len() > MAX_ENTRIES {
        return Err(Error::CatalogFull {
            count: inputs.len(),
            max: MAX_ENTRIES,
        });
    }

    let root = catalog_root(catalog)?;
    let mut entries = inputs
        .iter()
        .map(|path| CatalogEntry::load(&root, path.as_ref()))
        .collect::<Result<Vec<_>>>()?;

    entries.sort_by(|a, b| a.title().cmp(b.title()));
    Ok(entries)
}

pub fn write_catalog(mut writer: impl Write, entries: &[CatalogEntry]) -> Result<()> {
    for entry in entries {
        writer.write_all(entry.record())?;
    }
    writer.write_all(&[0u8; HEADER_SIZE])?;
    writer.flush()?;
    Ok(())
}

/// Builds the catalog file at `catalog` from the containers at `inputs`
/// and returns the number of entries written.
pub fn build_catalog_file<P: AsRef<Path>>(catalog: &Path, inputs: &[P]) -> Result<usize> {
    let entries = collect_entries(catalog, inputs)?;

    let written = File::create(catalog)
        .map_err(Error::file(catalog))?
        .pipe(BufWriter::new)
        .pipe(|writer| write_catalog(writer, &entries));

    if let Err(e) = written {
        if let Err(rm) = std::fs::remove_file(catalog) {
            tracing::warn!("unable to remove partial catalog {:?}: {}", catalog, rm);
        }
        return Err(e);
    }

    tracing::info!("catalog {:?} written with {} entries", catalog, entries.len());
    Ok(entries.len())
}

/// Parses catalog records up to the all-zero terminator.
pub fn read_catalog(bytes: &[u8]) -> Result<Vec<ContainerHeader>> {
    let mut headers = vec![];
    for record in bytes.chunks(HEADER_SIZE) {
        if record.len() != HEADER_SIZE {
            return Err(Error::Corrupt(format!(
                "catalog record {} is only {} bytes",
                headers.len(),
                record.len()
            )));
        }
        if record.iter().all(|&b| b == 0) {
            return Ok(headers);
        }
        headers.push(ContainerHeader::parse(record)?);
    }

    Err(Error::Corrupt("catalog has no terminator record".into()))
}
