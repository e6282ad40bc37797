// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Artifact reading and atomic publishing
//!
//! Every file the pipeline produces is written to a temporary file in the
//! destination directory and renamed into place, so readers never observe a
//! partially written artifact and a failed write leaves nothing behind.

use crate::error::{Error, Result};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Read a JSON document; malformed content is an input error
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `path` atomically using `write` to produce the content
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let io_err = |source: std::io::Error| Error::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer)?;
        writer.flush().map_err(io_err)?;
    }
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    tracing::debug!(path = %path.display(), "Published artifact");
    Ok(())
}

/// Pretty-printed JSON document
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, |w| {
        serde_json::to_writer_pretty(&mut *w, value)?;
        w.write_all(b"\n").map_err(|source| Error::Write {
            path: path.to_path_buf(),
            source,
        })
    })
}

/// PNG image
pub fn write_png(path: &Path, image: &RgbaImage) -> Result<()> {
    write_atomic(path, |w| {
        PngEncoder::new(w)
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgba8,
            )
            .map_err(|source| Error::ImageEncode {
                path: path.to_path_buf(),
                source,
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_write_json_roundtrip() {
        let dir = temp_dir();
        let path = dir.path().join("report.json");
        write_json(&path, &vec![1, 2, 3]).unwrap();

        let back: Vec<i32> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn test_failed_write_leaves_no_file() {
        let dir = temp_dir();
        let path = dir.path().join("broken.dxf");

        let result = write_atomic(&path, |w| {
            w.write_all(b"partial").unwrap();
            Err(Error::Dxf("boom".into()))
        });

        assert!(result.is_err());
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_directory_is_write_error() {
        let dir = temp_dir();
        let path = dir.path().join("missing").join("layout.dxf");

        let err = write_json(&path, &1).unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_read_json_errors() {
        let dir = temp_dir();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{\"forward_matrix\": [").unwrap();

        let err = read_json::<serde_json::Value>(&path).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert_eq!(err.kind(), ErrorKind::Input);

        let missing = read_json::<serde_json::Value>(&dir.path().join("none.json")).unwrap_err();
        assert!(matches!(missing, Error::Read { .. }));
    }

    #[test]
    fn test_write_png() {
        let dir = temp_dir();
        let path = dir.path().join("img.png");
        let img = RgbaImage::from_pixel(4, 3, image::Rgba([10, 20, 30, 255]));
        write_png(&path, &img).unwrap();

        let back = image::open(&path).unwrap().to_rgba8();
        assert_eq!(back.dimensions(), (4, 3));
        assert_eq!(back.get_pixel(1, 1), &image::Rgba([10, 20, 30, 255]));
    }
}
