use std::fs;
use std::io::{self, BufReader, Read, Write};

use camino::Utf8Path;
use flate2::read::MultiGzDecoder;
use tempfile::Builder;

use crate::error::KiraError;

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix("kira-gsr-file")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("persist {path}: {err}")))?;
    Ok(())
}

pub fn open_text(path: &Utf8Path) -> Result<Box<dyn Read>, KiraError> {
    let file = fs::File::open(path.as_std_path()).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => KiraError::MissingRequiredInput(path.to_string()),
        _ => KiraError::Filesystem(format!("open {path}: {err}")),
    })?;
    if path.extension() == Some("gz") {
        return Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))));
    }
    Ok(Box::new(BufReader::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    #[test]
    fn reads_plain_and_gzip() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();

        let plain = root.join("genes.tsv");
        write_bytes_atomic(&plain, b"symbol\nTP53\n").unwrap();
        let mut text = String::new();
        open_text(&plain).unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "symbol\nTP53\n");

        let gz = root.join("genes.tsv.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"symbol\nEGFR\n").unwrap();
        fs::write(gz.as_std_path(), encoder.finish().unwrap()).unwrap();
        let mut text = String::new();
        open_text(&gz).unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "symbol\nEGFR\n");
    }

    #[test]
    fn missing_file_is_missing_input() {
        let err = match open_text(Utf8Path::new("/definitely/not/here.tsv")) {
            Err(err) => err,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, KiraError::MissingRequiredInput(_)));
    }
}
