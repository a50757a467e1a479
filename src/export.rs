use crate::batch::{BatchFileRecord, FileStatus};
use crate::error::{Error, Result};
use crate::types::{FieldDefinition, FieldType, FieldValues};
use chrono::{NaiveDateTime, SecondsFormat};
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook, Worksheet, XlsxError};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Columns written before the configured fields.
pub const FIXED_HEADERS: &[&str] = &["filename", "file_size_bytes", "parsed_at", "parse_duration_ms"];

const FILE_STEM: &str = "extracted_data";
const WORKSHEET_NAME: &str = "Extracted Data";

/// Quote a CSV cell when it contains a comma, quote, newline or space,
/// doubling embedded quotes. Quoting on a bare space is kept for
/// compatibility with files exported by earlier versions.
pub fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains(' ') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Display text of an extracted value; missing and null are empty.
pub fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn csv_value(data: &FieldValues, field_name: &str) -> String {
    escape_csv(&cell_text(data.get(field_name)))
}

fn exportable(records: &[BatchFileRecord]) -> impl Iterator<Item = &BatchFileRecord> {
    records
        .iter()
        .filter(|r| r.status() == FileStatus::Completed && !r.extracted_data().is_empty())
}

fn fixed_cells(record: &BatchFileRecord) -> [String; 4] {
    [
        record.file().name.clone(),
        record.file().size().to_string(),
        record
            .parse_end_time()
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default(),
        record
            .parse_duration()
            .map(|d| d.as_millis().to_string())
            .unwrap_or_default(),
    ]
}

/// CSV text for every completed record with data, one column per field in `fields` order.
pub fn export_csv(records: &[BatchFileRecord], fields: &[FieldDefinition]) -> String {
    let header: Vec<String> = FIXED_HEADERS
        .iter()
        .map(|h| h.to_string())
        .chain(fields.iter().map(|f| f.name.clone()))
        .map(|h| escape_csv(&h))
        .collect();
    let mut lines = vec![header.join(",")];

    for record in exportable(records) {
        let row: Vec<String> = fixed_cells(record)
            .iter()
            .map(|c| escape_csv(c))
            .chain(fields.iter().map(|f| csv_value(record.extracted_data(), &f.name)))
            .collect();
        lines.push(row.join(","));
    }
    lines.join("\n")
}

/// `extracted_data_2024-03-05T14-07-09.csv` style name for an export made at `now`.
pub fn export_file_name(now: &NaiveDateTime, extension: &str) -> String {
    format!("{}_{}.{}", FILE_STEM, now.format("%Y-%m-%dT%H-%M-%S"), extension)
}

/// Use the given path (forcing the extension), or a fresh timestamped name in Downloads/Desktop.
fn resolve_export_path(path_override: Option<&Path>, extension: &str) -> Result<PathBuf> {
    if let Some(p) = path_override.filter(|p| !p.as_os_str().is_empty()) {
        let mut pb = p.to_path_buf();
        if pb.extension().and_then(|e| e.to_str()) != Some(extension) {
            pb.set_extension(extension);
        }
        return Ok(pb);
    }

    let dir = dirs::download_dir()
        .or_else(dirs::desktop_dir)
        .ok_or_else(|| Error::validation("Could not find Downloads or Desktop folder."))?;
    let now = chrono::Local::now().naive_local();
    let mut path = dir.join(export_file_name(&now, extension));
    let mut counter = 2u32;
    while path.exists() {
        let stem = format!("{}_{}_{}", FILE_STEM, now.format("%Y-%m-%dT%H-%M-%S"), counter);
        path = dir.join(format!("{}.{}", stem, extension));
        counter += 1;
    }
    Ok(path)
}

/// Write the CSV export and return where it went.
pub fn write_csv(
    records: &[BatchFileRecord],
    fields: &[FieldDefinition],
    path_override: Option<&Path>,
) -> Result<PathBuf> {
    let path = resolve_export_path(path_override, "csv")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, export_csv(records, fields))?;
    info!(path = %path.display(), "csv export written");
    Ok(path)
}

/// Drop control characters (except tab, newline, CR) that make spreadsheet apps reject the file.
fn sanitize_cell(s: &str) -> String {
    s.chars()
        .filter(|&c| {
            let u = c as u32;
            c == '\t' || c == '\n' || c == '\r' || !(u < 0x20 || u == 0x7F || u == 0xFFFE || u == 0xFFFF)
        })
        .collect()
}

/// Estimate column width from text length (char count × 1.2, clamped 10–50).
fn estimate_text_width(text: &str) -> f64 {
    let w = text.chars().count() as f64 * 1.2;
    w.clamp(10.0, 50.0)
}

/// Numbers stay numbers; numeric-looking strings like "1,250.50" are parsed.
fn numeric_value(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace([',', ' '], "").trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn write_text(ws: &mut Worksheet, row: u32, col: u16, text: &str, format: &Format) -> Result<(), XlsxError> {
    ws.write_string_with_format(row, col, sanitize_cell(text), format).map(|_| ())
}

/// Same rows as the CSV export, as an `.xlsx` workbook.
pub fn export_xlsx(
    records: &[BatchFileRecord],
    fields: &[FieldDefinition],
    path_override: Option<&Path>,
) -> Result<PathBuf> {
    let path = resolve_export_path(path_override, "xlsx")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(WORKSHEET_NAME)?;

    let header_format = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(0x2563EB))
        .set_font_color(Color::RGB(0xFFFFFF));
    let text_format = Format::new().set_text_wrap();
    let number_format = Format::new()
        .set_num_format("#,##0.00")
        .set_align(FormatAlign::Right);

    let headers: Vec<&str> = FIXED_HEADERS
        .iter()
        .copied()
        .chain(fields.iter().map(|f| f.name.as_str()))
        .collect();
    let mut widths: Vec<f64> = headers.iter().map(|h| estimate_text_width(h)).collect();
    for (col, header) in headers.iter().enumerate() {
        write_text(worksheet, 0, col as u16, header, &header_format)?;
    }

    for (row_idx, record) in exportable(records).enumerate() {
        let row = (row_idx + 1) as u32;
        for (col, cell) in fixed_cells(record).iter().enumerate() {
            if col == 1 || col == 3 {
                if let Ok(n) = cell.parse::<f64>() {
                    worksheet.write_number(row, col as u16, n)?;
                    continue;
                }
            }
            write_text(worksheet, row, col as u16, cell, &text_format)?;
            widths[col] = widths[col].max(estimate_text_width(cell));
        }
        for (i, field) in fields.iter().enumerate() {
            let col = FIXED_HEADERS.len() + i;
            let value = record.extracted_data().get(&field.name);
            if field.field_type == FieldType::Number {
                if let Some(n) = numeric_value(value) {
                    worksheet.write_number_with_format(row, col as u16, n, &number_format)?;
                    continue;
                }
            }
            let text = cell_text(value);
            write_text(worksheet, row, col as u16, &text, &text_format)?;
            widths[col] = widths[col].max(estimate_text_width(&text));
        }
    }

    for (col, w) in widths.iter().enumerate() {
        worksheet.set_column_width(col as u16, *w)?;
    }
    worksheet.set_freeze_panes(1, 0)?;
    workbook.save(&path)?;
    info!(path = %path.display(), "xlsx export written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchFile, PDF_CONTENT_TYPE};
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn escapes_commas_and_quotes() {
        assert_eq!(escape_csv(r#"Acme, Inc. "East""#), r#""Acme, Inc. ""East""""#);
    }

    #[test]
    fn quotes_on_space() {
        assert_eq!(escape_csv("New York"), "\"New York\"");
        assert_eq!(escape_csv("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn plain_values_unquoted() {
        assert_eq!(escape_csv("123"), "123");
        assert_eq!(escape_csv(""), "");
    }

    #[test]
    fn cell_text_renders_json_values() {
        assert_eq!(cell_text(None), "");
        assert_eq!(cell_text(Some(&Value::Null)), "");
        assert_eq!(cell_text(Some(&json!("x"))), "x");
        assert_eq!(cell_text(Some(&json!(12.5))), "12.5");
        assert_eq!(cell_text(Some(&json!(true))), "true");
    }

    fn completed(name: &str, data: Value) -> BatchFileRecord {
        let mut r = BatchFileRecord::new(BatchFile::from_bytes(name, PDF_CONTENT_TYPE, vec![b'%'; 2048]));
        let a = r.begin_attempt();
        r.complete(a, data.as_object().unwrap());
        r
    }

    fn fields() -> Vec<FieldDefinition> {
        vec![
            FieldDefinition::new("start date", "Start", FieldType::String),
            FieldDefinition::new("total", "Total", FieldType::Number),
            FieldDefinition::new("hauler", "Hauler", FieldType::String),
        ]
    }

    #[test]
    fn csv_has_header_and_completed_rows_only() {
        let done = completed("march bill.pdf", json!({"start date": "2024-03-01", "total": 1200, "hauler": "Acme, Inc."}));
        let empty = completed("empty.pdf", json!({}));
        let mut failed = BatchFileRecord::new(BatchFile::from_bytes("f.pdf", PDF_CONTENT_TYPE, vec![1]));
        let a = failed.begin_attempt();
        failed.fail(a, "boom".into());
        let pending = BatchFileRecord::new(BatchFile::from_bytes("p.pdf", PDF_CONTENT_TYPE, vec![1]));

        let csv = export_csv(&[done, empty, failed, pending], &fields());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "filename,file_size_bytes,parsed_at,parse_duration_ms,\"start date\",total,hauler"
        );
        let cols: Vec<&str> = lines[1].splitn(5, ',').collect();
        assert_eq!(cols[0], "\"march bill.pdf\"");
        assert_eq!(cols[1], "2048");
        assert!(cols[2].ends_with('Z'));
        assert!(cols[3].parse::<u64>().is_ok());
        assert_eq!(cols[4], "2024-03-01,1200,\"Acme, Inc.\"");
    }

    #[test]
    fn missing_and_null_fields_are_empty() {
        let r = completed("a.pdf", json!({"total": null, "hauler": "X"}));
        let csv = export_csv(&[r], &fields());
        let row = csv.lines().nth(1).unwrap();
        assert!(row.ends_with(",,,X"), "{row}");
    }

    #[test]
    fn file_name_is_timestamped() {
        let now = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap().and_hms_opt(14, 7, 9).unwrap();
        assert_eq!(export_file_name(&now, "csv"), "extracted_data_2024-03-05T14-07-09.csv");
    }

    #[test]
    fn write_csv_forces_extension() {
        let dir = tempfile::tempdir().unwrap();
        let r = completed("a.pdf", json!({"total": 3}));
        let path = write_csv(&[r], &fields(), Some(&dir.path().join("out.txt"))).unwrap();
        assert_eq!(path, dir.path().join("out.csv"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("filename,"));
    }

    #[test]
    fn xlsx_export_writes_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let r = completed("a.pdf", json!({"start date": "2024-01-01", "total": "1,250.50", "hauler": "bad\u{1}char"}));
        let path = export_xlsx(&[r], &fields(), Some(&dir.path().join("report"))).unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("xlsx"));
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    #[test]
    fn numeric_strings_parse_for_number_columns() {
        assert_eq!(numeric_value(Some(&json!("1,250.50"))), Some(1250.5));
        assert_eq!(numeric_value(Some(&json!(7))), Some(7.0));
        assert_eq!(numeric_value(Some(&json!("n/a"))), None);
        assert_eq!(sanitize_cell("a\u{1}b\tc"), "ab\tc");
    }
}
