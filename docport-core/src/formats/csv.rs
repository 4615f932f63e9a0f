use std::fs::File;
use std::path::Path;

use tracing::debug;

use crate::attachment::AttachmentDescriptor;
use crate::document::Document;
use crate::errors::PortResult;

use super::rows::{documents_to_table, table_to_documents, Cell, Table};
use super::{ArchiveContents, ArchiveFormat, ArchiveSink, FormatInfo, ReadOptions};

/// One row per document, comma separated, header row first.
pub struct CsvFormat {
    info: FormatInfo,
}

impl CsvFormat {
    pub fn new() -> Self {
        Self {
            info: FormatInfo::new("csv", "CSV", "csv", &["text/csv", "application/vnd.ms-excel"])
                .without_attachments(),
        }
    }
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveFormat for CsvFormat {
    fn info(&self) -> &FormatInfo {
        &self.info
    }

    fn open(&self, dest: &Path) -> PortResult<Box<dyn ArchiveSink>> {
        Ok(Box::new(CsvSink {
            writer: ::csv::Writer::from_path(dest)?,
        }))
    }

    fn read(&self, src: &Path, _staging: &Path, options: &ReadOptions) -> PortResult<ArchiveContents> {
        let mut reader = ::csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(File::open(src)?);

        let headers = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(
                record
                    .iter()
                    .map(|field| Cell::Text(field.to_string()))
                    .collect(),
            );
        }

        let documents = table_to_documents(Table { headers, rows }, options);
        debug!(documents = documents.len(), "Read CSV import");
        Ok(ArchiveContents {
            documents,
            ..ArchiveContents::default()
        })
    }
}

struct CsvSink {
    writer: ::csv::Writer<File>,
}

impl ArchiveSink for CsvSink {
    fn write_documents(
        &mut self,
        documents: &[Document],
        _attachments: &[AttachmentDescriptor],
    ) -> PortResult<()> {
        let table = documents_to_table(documents)?;
        self.writer.write_record(&table.headers)?;
        for row in table.rows {
            self.writer
                .write_record(row.into_iter().map(Cell::into_text))?;
        }
        Ok(())
    }

    fn write_attachment(&mut self, _attachment: &AttachmentDescriptor, _bytes: &[u8]) -> PortResult<()> {
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> PortResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}
