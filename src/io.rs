use std::fs::{File, OpenOptions};
use std::io;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

const BUFFER_SIZE: usize = 1024 * 1024;

// Open a line-delimited file for reading, decompressing it if the name ends in ".gz".
pub fn open_lines(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let file = OpenOptions::new()
        .read(true)
        .write(false)
        .create(false)
        .open(path)?;
    if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        Ok(Box::new(BufReader::with_capacity(
            BUFFER_SIZE,
            MultiGzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(BUFFER_SIZE, file)))
    }
}

// A gzip JSONL sink that only appears under its final name once it is complete.
// Lines go to "<path>.tmp"; `finish` flushes the gzip trailer and renames the file
// into place. Dropping an unfinished writer closes and removes the temporary file.
pub struct GzJsonlWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    writer: Option<BufWriter<GzEncoder<File>>>,
}

impl GzJsonlWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = PathBuf::from(format!("{}.tmp", path.display()));
        let file = OpenOptions::new()
            .read(false)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        let writer = BufWriter::with_capacity(
            BUFFER_SIZE,
            GzEncoder::new(file, Compression::default()),
        );
        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            writer: Some(writer),
        })
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "writer already finished"))?;
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    // Flush, then move the temp file into place. On any error the temp file is removed.
    pub fn finish(mut self) -> io::Result<PathBuf> {
        let result = self.flush_and_rename();
        if result.is_err() {
            self.remove_tmp();
        }
        result
    }

    fn flush_and_rename(&mut self) -> io::Result<PathBuf> {
        if let Some(writer) = self.writer.take() {
            let encoder = writer.into_inner().map_err(|e| e.into_error())?;
            encoder.finish()?;
        }
        std::fs::rename(&self.tmp_path, &self.path)?;
        Ok(self.path.clone())
    }

    fn remove_tmp(&self) {
        if let Err(e) = std::fs::remove_file(&self.tmp_path) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("Could not remove {}: {}", self.tmp_path.display(), e);
            }
        }
    }
}

impl Drop for GzJsonlWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            drop(writer);
            self.remove_tmp();
        }
    }
}

#[cfg(test)]
pub mod io_tests {
    use super::*;
    use serde_json::{json, Value};

    fn read_all(path: &Path) -> Vec<Value> {
        open_lines(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str::<Value>(&l.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn test_write_then_read_gz() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/train.jsonl.gz");

        let mut writer = GzJsonlWriter::create(&path).unwrap();
        writer.write_record(&json!({"message": "this is a test"})).unwrap();
        writer.write_record(&json!({"message": "second"})).unwrap();
        assert!(!path.exists());
        writer.finish().unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("out/train.jsonl.gz.tmp").exists());
        assert_eq!(
            read_all(&path),
            vec![json!({"message": "this is a test"}), json!({"message": "second"})]
        );
    }

    #[test]
    fn test_unfinished_writer_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.jsonl.gz");
        {
            let mut writer = GzJsonlWriter::create(&path).unwrap();
            writer.write_record(&json!({"partial": true})).unwrap();
        }
        assert!(!path.exists());
        assert!(!dir.path().join("test.jsonl.gz.tmp").exists());
    }

    #[test]
    fn test_failed_rename_removes_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.jsonl.gz");
        // a non-empty directory cannot be replaced by a file
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), "x").unwrap();

        let mut writer = GzJsonlWriter::create(&path).unwrap();
        writer.write_record(&json!({"message": "lost"})).unwrap();
        assert!(writer.finish().is_err());
        assert!(!dir.path().join("train.jsonl.gz.tmp").exists());
        assert!(path.join("keep").exists());
    }

    #[test]
    fn test_read_plain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("licenses.json");
        std::fs::write(&path, "{\"message\": \"this is a test\"}\n").unwrap();
        assert_eq!(read_all(&path), vec![json!({"message": "this is a test"})]);
    }
}
