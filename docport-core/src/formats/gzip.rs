use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::attachment::AttachmentDescriptor;
use crate::document::Document;
use crate::errors::PortResult;

use super::{
    ArchiveContents, ArchiveFormat, ArchiveSink, EntryCollector, FormatInfo, ReadOptions,
    ATTACHMENTS_ENTRY, DOCUMENTS_ENTRY,
};

/// Gzip-compressed tar stream. Entries are appended as they arrive, so
/// attachment appends must be serialized by the caller.
pub struct GzipFormat {
    info: FormatInfo,
}

impl GzipFormat {
    pub fn new() -> Self {
        Self {
            info: FormatInfo::new(
                "gzip",
                "gzip",
                "tgz",
                &["application/gzip", "application/x-gzip", "application/x-compressed-tar"],
            ),
        }
    }
}

impl Default for GzipFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveFormat for GzipFormat {
    fn info(&self) -> &FormatInfo {
        &self.info
    }

    fn open(&self, dest: &Path) -> PortResult<Box<dyn ArchiveSink>> {
        let file = File::create(dest)?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        Ok(Box::new(TarSink {
            builder: tar::Builder::new(encoder),
        }))
    }

    fn read(&self, src: &Path, staging: &Path, options: &ReadOptions) -> PortResult<ArchiveContents> {
        let file = File::open(src)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let mut collector = EntryCollector::new(staging);

        for entry in archive.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry.path()?.to_string_lossy().into_owned();
            collector.accept(&path, &mut entry)?;
        }

        collector.finish(options)
    }
}

struct TarSink {
    builder: tar::Builder<GzEncoder<BufWriter<File>>>,
}

impl TarSink {
    fn append(&mut self, path: &str, bytes: &[u8]) -> PortResult<()> {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        self.builder.append_data(&mut header, path, bytes)?;
        Ok(())
    }
}

impl ArchiveSink for TarSink {
    fn write_documents(
        &mut self,
        documents: &[Document],
        attachments: &[AttachmentDescriptor],
    ) -> PortResult<()> {
        self.append(DOCUMENTS_ENTRY, &serde_json::to_vec(documents)?)?;
        self.append(ATTACHMENTS_ENTRY, &serde_json::to_vec(attachments)?)
    }

    fn write_attachment(&mut self, attachment: &AttachmentDescriptor, bytes: &[u8]) -> PortResult<()> {
        self.append(&attachment.archive_path(), bytes)
    }

    fn finish(self: Box<Self>) -> PortResult<()> {
        let encoder = self.builder.into_inner()?;
        let mut writer = encoder.finish()?;
        std::io::Write::flush(&mut writer)?;
        Ok(())
    }
}
