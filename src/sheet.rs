use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use umya_spreadsheet::Spreadsheet;

use crate::extract::Extraction;

/// Office Open XML workbooks, edited through `umya_spreadsheet`.
const WORKBOOK_FORMATS: &[&str] = &["xlsx", "xlsm"];

/// Binary formats with no writer available.
const UNSUPPORTED_FORMATS: &[&str] = &["xls", "ods", "numbers"];

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("spreadsheet not found: {0}")]
    NotFound(PathBuf),
    #[error("unsupported spreadsheet format {0} (save it as .xlsx or .csv)")]
    UnsupportedFormat(PathBuf),
    #[error("failed to read spreadsheet {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse spreadsheet {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("workbook {path}: {message}")]
    Workbook { path: PathBuf, message: String },
    #[error("spreadsheet {0} has no header row")]
    MissingHeader(PathBuf),
    #[error("failed to write spreadsheet {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

enum Backend {
    /// Text table; new rows go after the last byte of the file.
    Csv { crlf: bool, ends_with_newline: bool },
    /// First worksheet of the workbook; new rows go below the used range.
    Workbook(Box<Spreadsheet>),
}

/// A single-sheet table. Row 0 holds the headers.
///
/// Existing rows are never rewritten. CSV files only grow at the end;
/// workbooks only gain cells below the last used row.
pub struct Sheet {
    path: PathBuf,
    rows: Vec<Vec<String>>,
    backend: Backend,
    pending: Vec<Vec<String>>,
}

impl Sheet {
    pub fn open(path: &Path) -> Result<Self, SheetError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if UNSUPPORTED_FORMATS.contains(&ext.as_str()) {
            return Err(SheetError::UnsupportedFormat(path.to_path_buf()));
        }

        let (rows, backend) = if WORKBOOK_FORMATS.contains(&ext.as_str()) {
            read_workbook(path)?
        } else {
            read_csv(path)?
        };
        let sheet = Self {
            path: path.to_path_buf(),
            rows,
            backend,
            pending: Vec::new(),
        };
        if sheet.headers().is_empty() {
            return Err(SheetError::MissingHeader(sheet.path));
        }
        debug!(path = %sheet.path.display(), rows = sheet.rows.len(), "spreadsheet opened");
        Ok(sheet)
    }

    /// Trimmed, non-empty header cells in column order.
    pub fn headers(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.trim())
                    .filter(|cell| !cell.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Index of the last declared row (0 = header only).
    pub fn last_row(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }

    /// One cell per header column; missing fields and unnamed columns are empty.
    pub fn build_row(&self, result: &Extraction) -> Vec<String> {
        self.rows[0]
            .iter()
            .map(|header| match header.trim() {
                "" => String::new(),
                name => result.get(name).unwrap_or_default().to_string(),
            })
            .collect()
    }

    /// Extend the declared range by one row. Written out by [`Sheet::save`].
    pub fn append_row(&mut self, row: Vec<String>) -> usize {
        self.rows.push(row.clone());
        self.pending.push(row);
        self.last_row()
    }

    pub fn save(&mut self) -> Result<(), SheetError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let first = self.rows.len() - self.pending.len();
        match &mut self.backend {
            Backend::Csv {
                crlf,
                ends_with_newline,
            } => {
                append_csv(&self.path, &self.pending, *crlf, *ends_with_newline)?;
                *ends_with_newline = true;
            }
            Backend::Workbook(book) => append_workbook(&self.path, book, first, &self.pending)?,
        }
        self.pending.clear();
        Ok(())
    }
}

fn read_csv(path: &Path) -> Result<(Vec<Vec<String>>, Backend), SheetError> {
    let bytes = std::fs::read(path).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => SheetError::NotFound(path.to_path_buf()),
        _ => SheetError::Read {
            path: path.to_path_buf(),
            source,
        },
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes.as_slice());
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| SheetError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }

    let backend = Backend::Csv {
        crlf: bytes.windows(2).any(|w| w == b"\r\n"),
        ends_with_newline: bytes.last().map_or(true, |b| *b == b'\n' || *b == b'\r'),
    };
    Ok((rows, backend))
}

fn append_csv(
    path: &Path,
    pending: &[Vec<String>],
    crlf: bool,
    ends_with_newline: bool,
) -> Result<(), SheetError> {
    let write_err = |source| SheetError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(write_err)?;
    let newline: &[u8] = if crlf { b"\r\n" } else { b"\n" };
    if !ends_with_newline {
        file.write_all(newline).map_err(write_err)?;
    }

    let terminator = if crlf {
        csv::Terminator::CRLF
    } else {
        csv::Terminator::Any(b'\n')
    };
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(terminator)
        .from_writer(file);
    for row in pending {
        writer
            .write_record(row)
            .map_err(|e| write_err(std::io::Error::other(e)))?;
    }
    writer.flush().map_err(write_err)?;
    Ok(())
}

fn workbook_err(path: &Path, message: impl ToString) -> SheetError {
    SheetError::Workbook {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Cell text of the first worksheet, padded to the used range.
fn read_workbook(path: &Path) -> Result<(Vec<Vec<String>>, Backend), SheetError> {
    if !path.exists() {
        return Err(SheetError::NotFound(path.to_path_buf()));
    }
    let book = umya_spreadsheet::reader::xlsx::read(path).map_err(|e| workbook_err(path, e))?;
    let sheet = book
        .get_sheet(&0)
        .ok_or_else(|| workbook_err(path, "workbook has no worksheets"))?;

    let (max_col, max_row) = sheet.get_highest_column_and_row();
    let rows = (1..=max_row)
        .map(|row| {
            (1..=max_col)
                .map(|col| sheet.get_value((col, row)))
                .collect::<Vec<_>>()
        })
        .collect();
    Ok((rows, Backend::Workbook(Box::new(book))))
}

/// Write `pending` as string cells starting at zero-based row `first`, then
/// save the workbook. Empty cells are written too so the used range grows.
fn append_workbook(
    path: &Path,
    book: &mut Spreadsheet,
    first: usize,
    pending: &[Vec<String>],
) -> Result<(), SheetError> {
    let sheet = book
        .get_sheet_mut(&0)
        .ok_or_else(|| workbook_err(path, "workbook has no worksheets"))?;
    for (offset, row) in pending.iter().enumerate() {
        let row_num = u32::try_from(first + offset + 1)
            .map_err(|_| workbook_err(path, "row index out of range"))?;
        for (col, value) in row.iter().enumerate() {
            let col_num = u32::try_from(col + 1)
                .map_err(|_| workbook_err(path, "column index out of range"))?;
            sheet
                .get_cell_mut((col_num, row_num))
                .set_value_string(value.as_str());
        }
    }
    umya_spreadsheet::writer::xlsx::write(book, path).map_err(|e| workbook_err(path, e))
}

/// Read the header row that defines which fields to extract.
pub fn read_headers(path: &Path) -> Result<Vec<String>, SheetError> {
    Ok(Sheet::open(path)?.headers())
}

/// Append one extraction as a new row and persist it. Returns the new row index.
///
/// Headers are re-read from the file at call time; `expected` is only used
/// to report drift since the headers were first read.
pub fn append_extraction(
    path: &Path,
    result: &Extraction,
    expected: &[String],
) -> Result<usize, SheetError> {
    let mut sheet = Sheet::open(path)?;
    let live = sheet.headers();
    if live != expected {
        warn!(
            expected = expected.len(),
            live = live.len(),
            "Spreadsheet headers changed since extraction; using current headers"
        );
    }

    let row = sheet.build_row(result);
    let index = sheet.append_row(row);
    sheet.save()?;
    info!(path = %path.display(), row = index, "Row appended");
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sheet(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn fields(pairs: &[(&str, &str)]) -> Extraction {
        Extraction::Fields(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_headers_are_trimmed_and_skip_blanks() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_sheet(tmp.path(), "s.csv", " Name ,,Budget\n");
        assert_eq!(read_headers(&path).unwrap(), names(&["Name", "Budget"]));
    }

    #[test]
    fn test_missing_field_becomes_empty_cell() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_sheet(tmp.path(), "s.csv", "A,B\n");
        let sheet = Sheet::open(&path).unwrap();
        assert_eq!(sheet.build_row(&fields(&[("A", "x")])), names(&["x", ""]));
    }

    #[test]
    fn test_row_keeps_header_positions() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_sheet(tmp.path(), "s.csv", "A,,C\n");
        let sheet = Sheet::open(&path).unwrap();
        let row = sheet.build_row(&fields(&[("A", "1"), ("C", "3")]));
        assert_eq!(row, names(&["1", "", "3"]));
    }

    #[test]
    fn test_raw_fallback_appends_empty_row() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_sheet(tmp.path(), "s.csv", "A,B\n");
        let raw = Extraction::Raw {
            raw_response: "nothing".to_string(),
        };
        append_extraction(&path, &raw, &names(&["A", "B"])).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A,B\n,\n");
    }

    #[test]
    fn test_append_leaves_prior_bytes_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let original = "\"Name\",Budget\nAlice,\"1,000\"\n\"Bob\",  20 \n";
        let path = write_sheet(tmp.path(), "s.csv", original);

        let before = Sheet::open(&path).unwrap();
        assert_eq!(before.last_row(), 2);

        let index = append_extraction(
            &path,
            &fields(&[("Name", "Carol"), ("Budget", "3,500")]),
            &names(&["Name", "Budget"]),
        )
        .unwrap();
        assert_eq!(index, 3);

        let after = std::fs::read_to_string(&path).unwrap();
        assert!(after.starts_with(original));
        assert_eq!(&after[original.len()..], "Carol,\"3,500\"\n");

        let reopened = Sheet::open(&path).unwrap();
        assert_eq!(reopened.last_row(), 3);
        assert_eq!(reopened.rows[..3], before.rows[..]);
    }

    #[test]
    fn test_append_without_trailing_newline() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_sheet(tmp.path(), "s.csv", "A,B\r\n1,2");
        append_extraction(&path, &fields(&[("B", "y")]), &names(&["A", "B"])).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A,B\r\n1,2\r\n,y\r\n");
    }

    #[test]
    fn test_headers_reread_at_write_time() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_sheet(tmp.path(), "s.csv", "A,B,C\n");
        // caller still believes the schema is [A, B]
        append_extraction(
            &path,
            &fields(&[("A", "1"), ("C", "3")]),
            &names(&["A", "B"]),
        )
        .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A,B,C\n1,,3\n");
    }

    #[test]
    fn test_empty_file_has_no_header() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_sheet(tmp.path(), "s.csv", "");
        assert!(matches!(
            Sheet::open(&path),
            Err(SheetError::MissingHeader(_))
        ));
        let path = write_sheet(tmp.path(), "blank.csv", " , \n");
        assert!(matches!(
            Sheet::open(&path),
            Err(SheetError::MissingHeader(_))
        ));
    }

    #[test]
    fn test_missing_and_binary_files() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            Sheet::open(&tmp.path().join("nope.csv")),
            Err(SheetError::NotFound(_))
        ));
        assert!(matches!(
            Sheet::open(&tmp.path().join("nope.xlsx")),
            Err(SheetError::NotFound(_))
        ));
        let path = write_sheet(tmp.path(), "book.ods", "PK");
        assert!(matches!(
            Sheet::open(&path),
            Err(SheetError::UnsupportedFormat(_))
        ));
        let path = write_sheet(tmp.path(), "broken.xlsx", "not a zip");
        assert!(matches!(
            Sheet::open(&path),
            Err(SheetError::Workbook { .. })
        ));
    }

    fn write_workbook(path: &Path, rows: &[&[&str]]) {
        let mut book = umya_spreadsheet::new_file();
        let sheet = book.get_sheet_mut(&0).unwrap();
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                sheet
                    .get_cell_mut(((c + 1) as u32, (r + 1) as u32))
                    .set_value_string(*value);
            }
        }
        umya_spreadsheet::writer::xlsx::write(&book, path).unwrap();
    }

    #[test]
    fn test_xlsx_append_keeps_prior_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("leads.xlsx");
        write_workbook(
            &path,
            &[
                &["Company", "", "Budget", "Contact"],
                &["Acme", "note", "1,000", "Alice"],
                &["Globex", "", "20", ""],
            ],
        );

        let before = Sheet::open(&path).unwrap();
        assert_eq!(before.headers(), names(&["Company", "Budget", "Contact"]));
        assert_eq!(before.last_row(), 2);

        let index = append_extraction(
            &path,
            &fields(&[("Contact", "Carol"), ("Company", "Initech")]),
            &names(&["Company", "Budget", "Contact"]),
        )
        .unwrap();
        assert_eq!(index, 3);

        let after = Sheet::open(&path).unwrap();
        assert_eq!(after.last_row(), 3);
        assert_eq!(after.rows[..3], before.rows[..]);
        assert_eq!(after.rows[3], names(&["Initech", "", "", "Carol"]));
    }

    #[test]
    fn test_xlsx_without_header_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.xlsx");
        write_workbook(&path, &[]);
        assert!(matches!(
            Sheet::open(&path),
            Err(SheetError::MissingHeader(_))
        ));
    }

    #[test]
    fn test_save_without_pending_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_sheet(tmp.path(), "s.csv", "A");
        let mut sheet = Sheet::open(&path).unwrap();
        sheet.save().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A");
    }
}
