//! Writing result tables to CSV and Excel, and reading them back.

use log::info;
use rust_xlsxwriter::Workbook;
use std::path::Path;

use crate::error::OctalError;
use crate::table::MeasurementTable;

/// One worksheet of an Excel export.
#[derive(Debug, Clone, Copy)]
pub enum Sheet<'a> {
    /// A table with a header row.
    Table(&'a str, &'a MeasurementTable),
    /// Two-column parameter listing.
    Pairs(&'a str, &'a [(String, String)]),
}

fn ensure_parent(path: &Path) -> Result<(), OctalError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| OctalError::io(e, format!("Creating {}", parent.display())))?;
    }
    Ok(())
}

/// Write `table` with a header row. Cells past the end of a shorter column
/// are left empty.
pub fn export_to_csv(table: &MeasurementTable, path: &Path) -> Result<(), OctalError> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(table.column_names())?;
    for i in 0..table.len() {
        writer.write_record(
            table
                .row(i)
                .into_iter()
                .map(|v| v.map(|v| v.to_string()).unwrap_or_default()),
        )?;
    }
    writer
        .flush()
        .map_err(|e| OctalError::io(e, format!("Writing {}", path.display())))?;
    info!("Exported {} rows to {}", table.len(), path.display());
    Ok(())
}

/// Write `(parameter, value)` pairs under a `Params,Value` header.
pub fn export_info_csv(entries: &[(String, String)], path: &Path) -> Result<(), OctalError> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Params", "Value"])?;
    for (param, value) in entries {
        writer.write_record([param, value])?;
    }
    writer
        .flush()
        .map_err(|e| OctalError::io(e, format!("Writing {}", path.display())))?;
    Ok(())
}

/// Write every sheet into one workbook at `path`.
pub fn export_to_excel(sheets: &[Sheet<'_>], path: &Path) -> Result<(), OctalError> {
    if sheets.is_empty() {
        return Err(OctalError::Export("No sheets to write".to_string()));
    }
    ensure_parent(path)?;

    let mut workbook = Workbook::new();
    for sheet in sheets {
        let worksheet = workbook.add_worksheet();
        match sheet {
            Sheet::Table(name, table) => {
                worksheet.set_name(*name)?;
                for (col, (header, values)) in table.columns().enumerate() {
                    let col = col as u16;
                    worksheet.write_string(0, col, header)?;
                    for (row, v) in values.iter().enumerate() {
                        worksheet.write_number(row as u32 + 1, col, *v)?;
                    }
                }
            }
            Sheet::Pairs(name, pairs) => {
                worksheet.set_name(*name)?;
                worksheet.write_string(0, 0, "Params")?;
                worksheet.write_string(0, 1, "Value")?;
                for (row, (param, value)) in pairs.iter().enumerate() {
                    let row = row as u32 + 1;
                    worksheet.write_string(row, 0, param)?;
                    match value.parse::<f64>() {
                        Ok(v) => worksheet.write_number(row, 1, v)?,
                        Err(_) => worksheet.write_string(row, 1, value)?,
                    };
                }
            }
        }
    }
    workbook.save(path)?;
    info!("Exported {} sheet(s) to {}", sheets.len(), path.display());
    Ok(())
}

/// Read a CSV written by [`export_to_csv`] back into a table.
///
/// Empty cells read as `NaN`.
pub fn read_csv(path: &Path) -> Result<MeasurementTable, OctalError> {
    let meta = std::fs::metadata(path)
        .map_err(|_| OctalError::Export(format!("File does not exist: {}", path.display())))?;
    if !meta.is_file() {
        return Err(OctalError::Export(format!("Not a file: {}", path.display())));
    }
    if meta.len() == 0 {
        return Err(OctalError::Export(format!("File is empty: {}", path.display())));
    }

    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); headers.len()];

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        for (col, cell) in record.iter().enumerate().take(headers.len()) {
            let cell = cell.trim();
            let value = if cell.is_empty() {
                f64::NAN
            } else {
                cell.parse().map_err(|_| {
                    OctalError::Parse(format!(
                        "{}: row {}, column '{}': '{}' is not a number",
                        path.display(),
                        line + 2,
                        headers[col],
                        cell
                    ))
                })?
            };
            columns[col].push(value);
        }
    }

    let mut table = MeasurementTable::new();
    for (name, values) in headers.into_iter().zip(columns) {
        table.add_column(name, values);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample() -> MeasurementTable {
        let mut table = MeasurementTable::with_columns(&["Wavelength", "Loss [dB]"]);
        table.push_row(&[1550.0, -3.5]).unwrap();
        table.push_row(&[1551.0, -3.25]).unwrap();
        table
    }

    #[test]
    fn test_csv_export_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("loss.csv");
        export_to_csv(&sample(), &path).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Wavelength,Loss [dB]\n1550,-3.5\n1551,-3.25\n"
        );
        assert_eq!(read_csv(&path).unwrap(), sample());
    }

    #[test]
    fn test_ragged_columns_leave_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.csv");
        let mut table = sample();
        table.add_column("Extra", vec![1.0]);
        export_to_csv(&table, &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().nth(2), Some("1551,-3.25,"));
        let back = read_csv(&path).unwrap();
        assert!(back.column("Extra").unwrap()[1].is_nan());
    }

    #[test]
    fn test_read_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.csv");
        assert!(matches!(read_csv(&missing), Err(OctalError::Export(m)) if m.contains("does not exist")));

        let empty = dir.path().join("empty.csv");
        fs::write(&empty, "").unwrap();
        assert!(matches!(read_csv(&empty), Err(OctalError::Export(m)) if m.contains("empty")));
    }

    #[test]
    fn test_info_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_info.csv");
        let entries = vec![
            ("Test type".to_string(), "dc".to_string()),
            ("Start voltage [V]".to_string(), "0".to_string()),
        ];
        export_info_csv(&entries, &path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Params,Value\nTest type,dc\nStart voltage [V],0\n"
        );
    }

    #[test]
    fn test_excel_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("100A.xlsx");
        let config = vec![("Output power [dBm]".to_string(), "10".to_string())];
        let table = sample();
        export_to_excel(
            &[Sheet::Pairs("config", &config), Sheet::Table("data", &table)],
            &path,
        )
        .unwrap();
        assert!(fs::metadata(&path).unwrap().len() > 0);

        assert!(matches!(export_to_excel(&[], &path), Err(OctalError::Export(_))));
    }
}
