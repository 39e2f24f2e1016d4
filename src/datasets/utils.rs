use std::{
    io::{Seek, SeekFrom},
    path::Path,
};

use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use tar::Archive;
use tracing::info;
use zip::ZipArchive;

use crate::error::{GcnError, Result};

/// HTTP body that reports download progress as it is read.
pub struct RemoteFile {
    response: reqwest::blocking::Response,
    current_size: u64,
    pbar: Option<ProgressBar>,
}
impl RemoteFile {
    pub fn with_pbar(url: &str) -> Result<Self> {
        Self::with_config(url, 3600, true)
    }
    pub fn with_config(url: &str, timeout: u64, pbar: bool) -> Result<Self> {
        let client = reqwest::blocking::Client::new();
        let response = client
            .get(url)
            .timeout(std::time::Duration::from_secs(timeout))
            .send()?
            .error_for_status()?;
        let total_size = response
            .content_length()
            .ok_or_else(|| GcnError::dataset(format!("{url} sent no content length")))?;

        let pbar = if pbar {
            let pbar = ProgressBar::new(total_size);
            let style = ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                .map_err(|e| GcnError::dataset(e.to_string()))?
                .progress_chars("#>-");
            pbar.set_style(style);
            pbar.set_message(format!("Downloading {}", url));
            Some(pbar)
        } else {
            None
        };
        Ok(Self {
            response,
            current_size: 0,
            pbar,
        })
    }
    fn update(&mut self, size: usize) {
        self.current_size += size as u64;
        if let Some(pbar) = &self.pbar {
            pbar.set_position(self.current_size);
        }
    }
}

impl std::io::Read for RemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let size = self.response.read(buf)?;
        self.update(size);
        if size == 0 {
            if let Some(pbar) = &self.pbar {
                pbar.finish();
            }
        }
        Ok(size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Zip,
    Tgz,
}

/// Unpacks an archive already on disk into `path`.
pub fn extract<R, P>(mut archive: R, path: P, format: CompressionFormat) -> Result<()>
where
    R: std::io::Read + Seek,
    P: AsRef<Path>,
{
    archive.seek(SeekFrom::Start(0))?;
    match format {
        CompressionFormat::Zip => {
            let mut archive = ZipArchive::new(archive)?;
            archive.extract(path)?;
        }
        CompressionFormat::Tgz => {
            let tar = GzDecoder::new(archive);
            let mut archive = Archive::new(tar);
            archive.unpack(path)?;
        }
    }
    Ok(())
}

pub fn download_and_extract<P: AsRef<Path>>(
    url: &str,
    path: P,
    format: CompressionFormat,
) -> Result<()> {
    info!(url, path = %path.as_ref().display(), "downloading dataset");
    let mut remote_file = RemoteFile::with_pbar(url)?;
    let mut archive = tempfile::tempfile()?;
    std::io::copy(&mut remote_file, &mut archive)?;
    extract(archive, path, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn extracts_tgz() {
        let mut archive = tempfile::tempfile().unwrap();
        {
            let gz = flate2::write::GzEncoder::new(&mut archive, flate2::Compression::default());
            let mut builder = tar::Builder::new(gz);
            let data = b"1 2\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "toy/toy.cites", &data[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }
        let dir = tempfile::tempdir().unwrap();
        extract(archive, dir.path(), CompressionFormat::Tgz).unwrap();
        let cites = std::fs::read_to_string(dir.path().join("toy/toy.cites")).unwrap();
        assert_eq!(cites, "1 2\n");
    }

    #[test]
    fn extracts_zip() {
        let mut archive = tempfile::tempfile().unwrap();
        {
            let mut writer = zip::ZipWriter::new(&mut archive);
            writer
                .start_file("toy/toy.content", zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(b"a 1 0 x\n").unwrap();
            writer.finish().unwrap();
        }
        let dir = tempfile::tempdir().unwrap();
        extract(archive, dir.path(), CompressionFormat::Zip).unwrap();
        let content = std::fs::read_to_string(dir.path().join("toy/toy.content")).unwrap();
        assert_eq!(content, "a 1 0 x\n");
    }
}
