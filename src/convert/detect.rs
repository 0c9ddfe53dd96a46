//! Sniffing the compression family of an archive from its leading bytes.

use std::fs::File;
use std::io::Read as _;
use std::path::Path;

use exn::{Exn, ResultExt as _};
use tracing::trace;

use crate::error::ErrorMessage;

/// Compression families we know how to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Zip, used by `.cbz` files.
    Zip,
    /// RAR, used by `.cbr` files.
    Rar,
    /// 7z, used by `.cb7` files.
    SevenZip,
    /// None of the signatures matched.
    Unknown,
}

impl Compression {
    /// Number of leading bytes read from the file.
    const HEADER_LEN: u64 = 8;

    /// Magic bytes at the start of each archive type.
    const SIGNATURES: [(Self, &'static [u8]); 3] = [
        (Self::Zip, b"PK"),
        (Self::Rar, b"Rar!\x1A\x07\x00"),
        (Self::SevenZip, b"7z\xBC\xAF\x27\x1C"),
    ];

    /// Detect the compression family of the file at `path`.
    ///
    /// Only the first bytes are read, and the file is closed before returning. An unknown
    /// signature is not an error, the caller decides what to do with [`Compression::Unknown`].
    pub fn detect(path: &Path) -> Result<Self, Exn<ErrorMessage>> {
        let err = || {
            let path = path.display();
            ErrorMessage::new(format!("Could not read the header of \"{path}\""))
        };

        let mut header = Vec::with_capacity(Self::HEADER_LEN as usize);
        File::open(path)
            .and_then(|file| file.take(Self::HEADER_LEN).read_to_end(&mut header))
            .or_raise(err)?;

        let compression = Self::from_header(&header);
        trace!("detected {compression:?} for {path:?}");
        Ok(compression)
    }

    /// Match the leading bytes of a file against the known signatures.
    pub fn from_header(header: &[u8]) -> Self {
        Self::SIGNATURES
            .iter()
            .find(|(_, signature)| header.starts_with(signature))
            .map_or(Self::Unknown, |&(compression, _)| compression)
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Compression::*;

        let name = match self {
            Zip => "ZIP",
            Rar => "RAR",
            SevenZip => "7Z",
            Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_signatures() {
        assert_eq!(Compression::from_header(b"PK\x03\x04\0\0\0\0"), Compression::Zip);
        assert_eq!(
            Compression::from_header(b"Rar!\x1A\x07\x00\xCF"),
            Compression::Rar
        );
        assert_eq!(
            Compression::from_header(b"Rar!\x1A\x07\x01\x00"),
            Compression::Unknown,
            "RAR5 is not in the signature table"
        );
        assert_eq!(
            Compression::from_header(b"7z\xBC\xAF\x27\x1C\x00\x04"),
            Compression::SevenZip
        );
    }

    #[test]
    fn unknown_and_short_headers() {
        assert_eq!(Compression::from_header(b"GIF89a.."), Compression::Unknown);
        assert_eq!(Compression::from_header(b"P"), Compression::Unknown);
        assert_eq!(Compression::from_header(b""), Compression::Unknown);
        assert_eq!(Compression::from_header(b"Rar!"), Compression::Unknown);
    }

    #[test]
    fn detects_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("a.cbr");
        std::fs::write(&zip, b"PK\x05\x06").unwrap();
        let text = dir.path().join("b.cbz");
        std::fs::write(&text, b"not an archive at all").unwrap();

        assert_eq!(Compression::detect(&zip).unwrap(), Compression::Zip);
        assert_eq!(Compression::detect(&text).unwrap(), Compression::Unknown);
        assert!(Compression::detect(&dir.path().join("missing")).is_err());
    }
}
