use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Reader, Xlsx};
use rust_xlsxwriter::Workbook;
use tracing::{debug, info};

use crate::attachment::AttachmentDescriptor;
use crate::document::Document;
use crate::errors::{PortError, PortResult};

use super::rows::{documents_to_table, table_to_documents, Cell, Table};
use super::{ArchiveContents, ArchiveFormat, ArchiveSink, FormatInfo, ReadOptions};

/// Sheet holding one row per document.
pub const SHEET_NAME: &str = "docs";

pub struct XlsxFormat {
    info: FormatInfo,
}

impl XlsxFormat {
    pub fn new() -> Self {
        Self {
            info: FormatInfo::new(
                "xlsx",
                "Excel",
                "xlsx",
                &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"],
            )
            .without_attachments(),
        }
    }
}

impl Default for XlsxFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveFormat for XlsxFormat {
    fn info(&self) -> &FormatInfo {
        &self.info
    }

    fn open(&self, dest: &Path) -> PortResult<Box<dyn ArchiveSink>> {
        Ok(Box::new(XlsxSink {
            dest: dest.to_path_buf(),
            documents: Vec::new(),
        }))
    }

    fn read(&self, src: &Path, _staging: &Path, options: &ReadOptions) -> PortResult<ArchiveContents> {
        let mut workbook: Xlsx<_> = open_workbook(src)
            .map_err(|e| PortError::archive(format!("failed to open workbook: {}", e)))?;

        let sheet_names = workbook.sheet_names().to_vec();
        let sheet = sheet_names
            .iter()
            .find(|name| name.as_str() == SHEET_NAME)
            .or_else(|| sheet_names.first())
            .cloned()
            .ok_or_else(|| PortError::archive("workbook has no sheets"))?;

        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| PortError::archive(format!("failed to read sheet '{}': {}", sheet, e)))?;
        debug!(sheet = %sheet, rows = range.height(), cols = range.width(), "Reading sheet");

        let mut rows = range.rows();
        let headers = match rows.next() {
            Some(header_row) => header_row
                .iter()
                .map(|cell| match cell {
                    Data::String(s) => s.trim().to_string(),
                    Data::Empty => String::new(),
                    other => other.to_string(),
                })
                .collect(),
            None => Vec::new(),
        };
        let rows = rows
            .map(|row| row.iter().map(data_to_cell).collect())
            .collect();

        Ok(ArchiveContents {
            documents: table_to_documents(Table { headers, rows }, options),
            ..ArchiveContents::default()
        })
    }
}

fn data_to_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::Bool(b) => Cell::Bool(*b),
        other => Cell::Text(other.to_string()),
    }
}

/// The workbook is assembled in one go on `finish`.
struct XlsxSink {
    dest: PathBuf,
    documents: Vec<Document>,
}

impl ArchiveSink for XlsxSink {
    fn write_documents(
        &mut self,
        documents: &[Document],
        _attachments: &[AttachmentDescriptor],
    ) -> PortResult<()> {
        self.documents.extend_from_slice(documents);
        Ok(())
    }

    fn write_attachment(&mut self, _attachment: &AttachmentDescriptor, _bytes: &[u8]) -> PortResult<()> {
        Ok(())
    }

    fn finish(self: Box<Self>) -> PortResult<()> {
        let table = documents_to_table(&self.documents)?;
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(SHEET_NAME).map_err(PortError::archive)?;

        for (col_idx, header) in table.headers.iter().enumerate() {
            worksheet
                .write_string(0, col_idx as u16, header)
                .map_err(PortError::archive)?;
        }
        for (row_idx, row) in table.rows.into_iter().enumerate() {
            let row_num = (row_idx + 1) as u32;
            for (col_idx, cell) in row.into_iter().enumerate() {
                let col = col_idx as u16;
                let written = match cell {
                    Cell::Empty => continue,
                    Cell::Text(text) => worksheet.write_string(row_num, col, text),
                    Cell::Number(n) => worksheet.write_number(row_num, col, n),
                    Cell::Bool(b) => worksheet.write_boolean(row_num, col, b),
                };
                written.map_err(PortError::archive)?;
            }
        }

        workbook.save(&self.dest).map_err(PortError::archive)?;
        info!(documents = self.documents.len(), path = %self.dest.display(), "Wrote workbook");
        Ok(())
    }
}
