use std::fs::File;
use std::io::Write;
use std::path::Path;

use ::zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

use crate::attachment::AttachmentDescriptor;
use crate::document::Document;
use crate::errors::PortResult;

use super::{
    ArchiveContents, ArchiveFormat, ArchiveSink, EntryCollector, FormatInfo, ReadOptions,
    ATTACHMENTS_ENTRY, DOCUMENTS_ENTRY,
};

/// Zip container with the same entry layout as the gzip format.
pub struct ZipFormat {
    info: FormatInfo,
}

impl ZipFormat {
    pub fn new() -> Self {
        Self {
            info: FormatInfo::new(
                "zip",
                "Zip",
                "zip",
                &["application/zip", "application/x-zip-compressed"],
            ),
        }
    }
}

impl Default for ZipFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveFormat for ZipFormat {
    fn info(&self) -> &FormatInfo {
        &self.info
    }

    fn open(&self, dest: &Path) -> PortResult<Box<dyn ArchiveSink>> {
        let file = File::create(dest)?;
        Ok(Box::new(ZipSink {
            writer: ZipWriter::new(file),
        }))
    }

    fn read(&self, src: &Path, staging: &Path, options: &ReadOptions) -> PortResult<ArchiveContents> {
        let mut archive = ZipArchive::new(File::open(src)?)?;
        let mut collector = EntryCollector::new(staging);

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            collector.accept(&name, &mut entry)?;
        }

        collector.finish(options)
    }
}

struct ZipSink {
    writer: ZipWriter<File>,
}

impl ZipSink {
    fn append(&mut self, path: &str, bytes: &[u8]) -> PortResult<()> {
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        self.writer.start_file(path, options)?;
        self.writer.write_all(bytes)?;
        Ok(())
    }
}

impl ArchiveSink for ZipSink {
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

    fn finish(mut self: Box<Self>) -> PortResult<()> {
        let mut file = self.writer.finish()?;
        file.flush()?;
        Ok(())
    }
}
