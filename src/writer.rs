//! 平坦化した行をチャンク単位でCSVに書き出す
//!
//! 行はメモリ上のバッファに溜め、しきい値に達したらファイルへ書き出して
//! バッファを空にする。ファイルハンドルは書き出しの間だけ保持する。
//! 最初の書き出しはファイルを作り直してヘッダーを書き、以降は追記する。

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use tracing::debug;

use crate::error::{Error, Result};
use crate::flatten::{COLUMNS, FlattenedIssue};

/// デフォルトのチャンクサイズ（行数）
pub const DEFAULT_CHUNK_SIZE: usize = 5000;

#[derive(Debug)]
pub struct ChunkedWriter {
    path: PathBuf,
    threshold: usize,
    buffer: Vec<FlattenedIssue>,
    flush_count: usize,
    rows_written: usize,
}

impl ChunkedWriter {
    pub fn new<P: AsRef<Path>>(path: P, threshold: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            threshold: threshold.max(1),
            buffer: Vec::new(),
            flush_count: 0,
            rows_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// バッファ中でまだ書き出していない行数
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// ファイルに書き出し済みの行数
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn flush_count(&self) -> usize {
        self.flush_count
    }

    /// 一度でも書き出してファイルが存在するか
    pub fn has_output(&self) -> bool {
        self.flush_count > 0
    }

    /// 行をバッファに追加
    pub fn append<I>(&mut self, rows: I)
    where
        I: IntoIterator<Item = FlattenedIssue>,
    {
        self.buffer.extend(rows);
    }

    /// バッファがしきい値以上なら書き出す。書き出した場合は `true`
    pub fn flush_if_needed(&mut self) -> Result<bool> {
        if self.buffer.len() >= self.threshold {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// しきい値に関係なく残りの行を書き出す。書き出した場合は `true`
    pub fn flush_remaining(&mut self) -> Result<bool> {
        if self.buffer.is_empty() {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    fn flush(&mut self) -> Result<()> {
        let first = self.flush_count == 0;

        let file = if first {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            File::create(&self.path)?
        } else {
            OpenOptions::new().append(true).open(&self.path)?
        };

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if first {
            writer.write_record(COLUMNS)?;
        }
        for row in &self.buffer {
            writer.write_record(row.to_record())?;
        }
        writer.flush()?;

        self.rows_written += self.buffer.len();
        self.flush_count += 1;
        debug!(
            rows = self.buffer.len(),
            total = self.rows_written,
            path = %self.path.display(),
            "Flushed chunk"
        );
        self.buffer.clear();
        Ok(())
    }
}

/// 書き出したCSVを一定行数ずつ読み戻すイテレータ
///
/// 壊れた行に当たると、それまでに読めた行をチャンクとして返したあとでエラーを1回返し、
/// 以降は `None` を返す。
pub struct ChunkedReader {
    headers: StringRecord,
    records: csv::StringRecordsIntoIter<File>,
    chunk_size: usize,
    pending_error: Option<csv::Error>,
    finished: bool,
}

impl ChunkedReader {
    pub fn open<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path.as_ref())?;
        let headers = reader.headers()?.clone();

        Ok(Self {
            headers,
            records: reader.into_records(),
            chunk_size: chunk_size.max(1),
            pending_error: None,
            finished: false,
        })
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    /// ヘッダー名から列番号を引く
    pub fn column(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| Error::SerializationError(format!("column '{}' not found in CSV header", name)))
    }
}

impl Iterator for ChunkedReader {
    type Item = Result<Vec<StringRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            return Some(Err(e.into()));
        }
        if self.finished {
            return None;
        }

        let mut chunk = Vec::with_capacity(self.chunk_size);
        for record in self.records.by_ref() {
            match record {
                Ok(r) => chunk.push(r),
                Err(e) => {
                    self.finished = true;
                    if chunk.is_empty() {
                        return Some(Err(e.into()));
                    }
                    self.pending_error = Some(e);
                    return Some(Ok(chunk));
                }
            }
            if chunk.len() >= self.chunk_size {
                break;
            }
        }

        if chunk.is_empty() { None } else { Some(Ok(chunk)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::flatten_issue;
    use crate::models::Issue;
    use tempfile::TempDir;

    fn rows(n: usize) -> Vec<FlattenedIssue> {
        (0..n)
            .map(|i| {
                let issue = Issue {
                    key: Some(format!("ISSUE-{}", i)),
                    severity: Some(if i % 2 == 0 { "MAJOR" } else { "MINOR" }.to_string()),
                    message: Some(format!("message, with \"quotes\" {}", i)),
                    tags: Some(vec!["a".to_string(), "b".to_string()]),
                    ..Issue::default()
                };
                flatten_issue(&issue)
            })
            .collect()
    }

    fn read_all(path: &Path) -> (StringRecord, Vec<StringRecord>) {
        let reader = ChunkedReader::open(path, 4).unwrap();
        let headers = reader.headers().clone();
        let records = reader.flat_map(|chunk| chunk.unwrap()).collect();
        (headers, records)
    }

    #[test]
    fn test_flush_if_needed_respects_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.csv");
        let mut writer = ChunkedWriter::new(&path, 3);

        writer.append(rows(2));
        assert!(!writer.flush_if_needed().unwrap());
        assert!(!path.exists());
        assert_eq!(writer.buffered(), 2);

        writer.append(rows(1));
        assert!(writer.flush_if_needed().unwrap());
        assert!(path.exists());
        assert_eq!(writer.buffered(), 0);
        assert_eq!(writer.rows_written(), 3);
    }

    #[test]
    fn test_round_trip_independent_of_flush_boundaries() {
        let temp_dir = TempDir::new().unwrap();
        let source = rows(10);

        // 3行ごとに書き出す
        let chunked_path = temp_dir.path().join("chunked.csv");
        let mut chunked = ChunkedWriter::new(&chunked_path, 3);
        for row in source.clone() {
            chunked.append(std::iter::once(row));
            chunked.flush_if_needed().unwrap();
        }
        chunked.flush_remaining().unwrap();
        assert_eq!(chunked.flush_count(), 4);

        // 一度にすべて書き出す
        let single_path = temp_dir.path().join("single.csv");
        let mut single = ChunkedWriter::new(&single_path, DEFAULT_CHUNK_SIZE);
        single.append(source.clone());
        assert!(!single.flush_if_needed().unwrap());
        single.flush_remaining().unwrap();
        assert_eq!(single.flush_count(), 1);

        let (chunked_headers, chunked_records) = read_all(&chunked_path);
        let (single_headers, single_records) = read_all(&single_path);

        assert_eq!(chunked_headers, single_headers);
        assert_eq!(chunked_headers.iter().collect::<Vec<_>>(), COLUMNS.to_vec());
        assert_eq!(chunked_records, single_records);
        assert_eq!(chunked_records.len(), 10);
        for (record, row) in chunked_records.iter().zip(&source) {
            assert_eq!(record.iter().map(str::to_string).collect::<Vec<_>>(), row.to_record());
        }
    }

    #[test]
    fn test_first_flush_truncates_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.csv");
        std::fs::write(&path, "stale,data\n1,2\n3,4\n").unwrap();

        let mut writer = ChunkedWriter::new(&path, 10);
        writer.append(rows(1));
        writer.flush_remaining().unwrap();

        let (headers, records) = read_all(&path);
        assert_eq!(headers.get(0), Some("key"));
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_flush_remaining_with_empty_buffer_creates_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("out.csv");

        let mut writer = ChunkedWriter::new(&path, 10);
        assert!(!writer.flush_remaining().unwrap());
        assert!(!writer.has_output());
        assert!(!path.exists());

        writer.append(rows(1));
        assert!(writer.flush_remaining().unwrap());
        assert!(path.exists());
    }

    #[test]
    fn test_reader_chunks_and_column_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.csv");
        let mut writer = ChunkedWriter::new(&path, 100);
        writer.append(rows(9));
        writer.flush_remaining().unwrap();

        let reader = ChunkedReader::open(&path, 4).unwrap();
        assert_eq!(reader.column("severity").unwrap(), 2);
        assert!(reader.column("missing").is_err());

        let sizes: Vec<usize> = reader.map(|c| c.unwrap().len()).collect();
        assert_eq!(sizes, vec![4, 4, 1]);
    }

    #[test]
    fn test_reader_returns_rows_read_before_a_bad_record() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.csv");
        std::fs::write(&path, "a,b\n1,2\n3,4\n5,6,7\n8,9\n").unwrap();

        let mut reader = ChunkedReader::open(&path, 10).unwrap();

        let first = reader.next().unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(&first[1][0], "3");
        assert!(matches!(reader.next(), Some(Err(Error::Csv(_)))));
        assert!(reader.next().is_none());
    }
}
