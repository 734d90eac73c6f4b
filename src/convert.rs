use std::path::Path;

use rust_xlsxwriter::{Format, Workbook};
use tracing::info;

use crate::error::Result;
use crate::flatten::NUMERIC_COLUMNS;
use crate::writer::ChunkedReader;

/// ワークシート名
pub const SHEET_NAME: &str = "Issues";

/// 完成したCSVをチャンク単位で読み戻し、1枚のワークシートとして保存する
///
/// 戻り値は書き込んだデータ行数（ヘッダーを除く）。
pub fn convert_csv_to_xlsx<P, Q>(csv_path: P, xlsx_path: Q, chunk_size: usize) -> Result<usize>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let reader = ChunkedReader::open(csv_path.as_ref(), chunk_size)?;

    let numeric: Vec<bool> = reader
        .headers()
        .iter()
        .map(|h| NUMERIC_COLUMNS.contains(&h))
        .collect();

    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    for (col, name) in reader.headers().iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, name, &header_format)?;
    }

    let mut row: u32 = 1;
    for chunk in reader {
        for record in chunk? {
            for (col, value) in record.iter().enumerate() {
                if value.is_empty() {
                    continue;
                }
                let is_numeric = numeric.get(col).copied().unwrap_or(false);
                match value.parse::<i64>() {
                    Ok(n) if is_numeric => {
                        worksheet.write_number(row, col as u16, n as f64)?;
                    }
                    _ => {
                        worksheet.write_string(row, col as u16, value)?;
                    }
                }
            }
            row += 1;
        }
    }

    workbook.save(xlsx_path.as_ref())?;

    let data_rows = (row - 1) as usize;
    info!(
        rows = data_rows,
        path = %xlsx_path.as_ref().display(),
        "Converted CSV to spreadsheet"
    );
    Ok(data_rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::flatten_issue;
    use crate::models::Issue;
    use crate::writer::ChunkedWriter;
    use tempfile::TempDir;

    #[test]
    fn test_convert_csv_to_xlsx() {
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("issues.csv");
        let xlsx_path = temp_dir.path().join("issues.xlsx");

        let mut writer = ChunkedWriter::new(&csv_path, 2);
        for i in 0..5 {
            let issue = Issue {
                key: Some(format!("K{}", i)),
                line: Some(i),
                ..Issue::default()
            };
            writer.append(std::iter::once(flatten_issue(&issue)));
            writer.flush_if_needed().unwrap();
        }
        writer.flush_remaining().unwrap();

        let rows = convert_csv_to_xlsx(&csv_path, &xlsx_path, 2).unwrap();

        assert_eq!(rows, 5);
        let metadata = std::fs::metadata(&xlsx_path).unwrap();
        assert!(metadata.len() > 0);
        // xlsx はZIPコンテナ
        let bytes = std::fs::read(&xlsx_path).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn test_convert_missing_csv_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = convert_csv_to_xlsx(
            temp_dir.path().join("missing.csv"),
            temp_dir.path().join("out.xlsx"),
            10,
        );
        assert!(result.is_err());
    }
}
