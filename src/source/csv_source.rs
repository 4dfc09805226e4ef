// ==========================================
// 表格导入导出管道 - CSV 数据源
// ==========================================
// 读取方式: 单向游标，顺序窗口复用同一 reader，回退时重新打开
// 方言: 分隔符 / 包围符 / 转义符，自动跳过 BOM 与 "sep=" 声明行
// 红线: 空行也占一个行号（空行返回空行记录，是否丢弃由 skip_empty_rows 决定）
// ==========================================

use crate::config::pipeline_config::CsvDialect;
use crate::domain::row::Row;
use crate::domain::types::CellValue;
use crate::importer::error::{ImportError, ImportResult};
use crate::source::TabularSource;
use csv::{ReaderBuilder, StringRecord};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

// ==========================================
// RecordLines - 按物理行切分逻辑记录
// ==========================================
// csv crate 会静默跳过空行，这里先按行切出完整记录（包围符内的换行不切断），
// 空行直接产出空记录，非空记录再交给 csv 解析
struct RecordLines {
    input: BufReader<File>,
    parser: ReaderBuilder,
    enclosure: Option<u8>,
    escape: Option<u8>,
    /// 单个逻辑块内解析出的多条记录（仅 CR 换行的文件）
    pending: VecDeque<Vec<CellValue>>,
}

impl RecordLines {
    fn next_record(&mut self) -> ImportResult<Option<Vec<CellValue>>> {
        if let Some(cells) = self.pending.pop_front() {
            return Ok(Some(cells));
        }

        let mut buf = Vec::new();
        let mut quoted = false;
        loop {
            let start = buf.len();
            if self.input.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            quoted = self.scan_quotes(&buf[start..], quoted);
            if !quoted {
                break;
            }
        }
        if buf.is_empty() {
            return Ok(None);
        }

        let body = trim_terminator(&buf);
        if body.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let mut reader = self.parser.from_reader(body);
        let mut record = StringRecord::new();
        while reader.read_record(&mut record)? {
            self.pending
                .push_back(record.iter().map(CellValue::from_text).collect());
        }
        Ok(Some(self.pending.pop_front().unwrap_or_default()))
    }

    /// 返回扫描后是否仍处于包围符内
    fn scan_quotes(&self, bytes: &[u8], mut quoted: bool) -> bool {
        let Some(quote) = self.enclosure else {
            return false;
        };
        let mut escaped = false;
        for &b in bytes {
            if escaped {
                escaped = false;
            } else if quoted && self.escape == Some(b) && b != quote {
                escaped = true;
            } else if b == quote {
                quoted = !quoted;
            }
        }
        quoted
    }
}

fn trim_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

struct CsvCursor {
    records: RecordLines,
    /// 下一条记录的行偏移
    next_offset: usize,
}

pub struct CsvSource {
    path: PathBuf,
    dialect: CsvDialect,
    cursor: Option<CsvCursor>,
    row_count: Option<usize>,
}

impl CsvSource {
    /// 打开 CSV 文件
    ///
    /// 文件首行为 "sep=X" 时使用 X 作为分隔符并跳过该行
    pub fn open(path: &Path, dialect: CsvDialect) -> ImportResult<Self> {
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }
        dialect.validate()?;

        let mut source = Self {
            path: path.to_path_buf(),
            dialect,
            cursor: None,
            row_count: None,
        };

        let (_, declared) = source.open_buffered()?;
        if let Some(delimiter) = declared {
            debug!(file = %source.path.display(), delimiter = %delimiter.escape_default(), "检测到分隔符声明行");
            source.dialect.delimiter = delimiter;
        }

        Ok(source)
    }

    pub fn dialect(&self) -> &CsvDialect {
        &self.dialect
    }

    /// 打开文件并跳过 BOM 与分隔符声明行
    fn open_buffered(&self) -> ImportResult<(BufReader<File>, Option<char>)> {
        let mut buffered = BufReader::new(File::open(&self.path)?);

        if buffered.fill_buf()?.starts_with(UTF8_BOM) {
            buffered.consume(UTF8_BOM.len());
        }

        let mut declared = None;
        let mut consumed = 0;
        {
            let buf = buffered.fill_buf()?;
            if buf.starts_with(b"sep=") {
                let line_len = buf.iter().position(|b| *b == b'\n').map(|p| p + 1).unwrap_or(buf.len());
                let line = String::from_utf8_lossy(&buf[..line_len]);
                let value = line.trim_end_matches(['\r', '\n']).trim_start_matches("sep=");
                let mut chars = value.chars();
                if let (Some(c), None) = (chars.next(), chars.next()) {
                    declared = Some(c);
                    consumed = line_len;
                }
            }
        }
        buffered.consume(consumed);

        Ok((buffered, declared))
    }

    fn new_reader(&self) -> ImportResult<RecordLines> {
        let (buffered, _) = self.open_buffered()?;

        let mut builder = ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(true) // 允许行长度不一致
            .delimiter(self.dialect.delimiter_byte()?);

        match self.dialect.enclosure_byte()? {
            Some(quote) => {
                builder.quote(quote);
            }
            None => {
                builder.quoting(false);
            }
        }
        if let Some(escape) = self.dialect.escape_byte()? {
            builder.escape(Some(escape));
        }

        Ok(RecordLines {
            input: buffered,
            parser: builder,
            enclosure: self.dialect.enclosure_byte()?,
            escape: self.dialect.escape_byte()?,
            pending: VecDeque::new(),
        })
    }

    fn ensure_single_sheet(&self, sheet: usize) -> ImportResult<()> {
        if sheet == 0 {
            Ok(())
        } else {
            Err(ImportError::SourceRead(format!(
                "CSV 文件只有一个 sheet，请求的 sheet 序号: {}",
                sheet
            )))
        }
    }
}

impl TabularSource for CsvSource {
    fn sheet_count(&mut self) -> ImportResult<usize> {
        Ok(1)
    }

    fn sheet_names(&mut self) -> ImportResult<Vec<String>> {
        let name = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Worksheet")
            .to_string();
        Ok(vec![name])
    }

    fn row_count(&mut self, sheet: usize) -> ImportResult<usize> {
        self.ensure_single_sheet(sheet)?;
        if let Some(count) = self.row_count {
            return Ok(count);
        }

        // 流式计数，不保留记录
        let mut records = self.new_reader()?;
        let mut count = 0;
        while records.next_record()?.is_some() {
            count += 1;
        }

        self.row_count = Some(count);
        Ok(count)
    }

    fn read_rows(&mut self, sheet: usize, start: usize, count: usize) -> ImportResult<Vec<Row>> {
        self.ensure_single_sheet(sheet)?;

        let reusable = matches!(&self.cursor, Some(c) if c.next_offset <= start);
        if !reusable {
            let records = self.new_reader()?;
            self.cursor = Some(CsvCursor {
                records,
                next_offset: 0,
            });
        }

        let cursor = match self.cursor.as_mut() {
            Some(cursor) => cursor,
            None => return Ok(Vec::new()),
        };

        while cursor.next_offset < start {
            if cursor.records.next_record()?.is_none() {
                return Ok(Vec::new());
            }
            cursor.next_offset += 1;
        }

        let mut rows = Vec::with_capacity(count);
        while rows.len() < count {
            let Some(cells) = cursor.records.next_record()? else {
                break;
            };
            cursor.next_offset += 1;
            rows.push(Row::new(cursor.next_offset, cells));
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_semicolon_delimiter() {
        let file = csv_file("A1;B1\nA2;B2\n");

        let dialect = CsvDialect {
            delimiter: ';',
            ..CsvDialect::default()
        };
        let mut source = CsvSource::open(file.path(), dialect).unwrap();
        let rows = source.read_rows(0, 0, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cells(), &[CellValue::from("A1"), CellValue::from("B1")]);

        // 默认逗号分隔时整行为一个单元格
        let mut source = CsvSource::open(file.path(), CsvDialect::default()).unwrap();
        let rows = source.read_rows(0, 0, 10).unwrap();
        assert_eq!(rows[0].cells(), &[CellValue::from("A1;B1")]);
    }

    #[test]
    fn test_windows_keep_absolute_indices() {
        let file = csv_file("a\nb\nc\nd\ne\n");
        let mut source = CsvSource::open(file.path(), CsvDialect::default()).unwrap();

        assert_eq!(source.row_count(0).unwrap(), 5);
        let first = source.read_rows(0, 0, 2).unwrap();
        let second = source.read_rows(0, 2, 2).unwrap();
        let last = source.read_rows(0, 4, 2).unwrap();
        assert_eq!(first.iter().map(Row::index).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(second.iter().map(Row::index).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(last.iter().map(Row::index).collect::<Vec<_>>(), vec![5]);

        // 回退读取（重新打开）
        let again = source.read_rows(0, 1, 1).unwrap();
        assert_eq!(again[0].cells(), &[CellValue::from("b")]);
    }

    #[test]
    fn test_bom_and_separator_line_skipped() {
        let file = csv_file("\u{feff}sep=;\r\nname;status\r\nx;y\r\n");
        let mut source = CsvSource::open(file.path(), CsvDialect::default()).unwrap();
        assert_eq!(source.dialect().delimiter, ';');
        assert_eq!(source.row_count(0).unwrap(), 2);
        let heading = source.read_heading(0, 1).unwrap().unwrap();
        assert_eq!(heading, vec!["name".to_string(), "status".to_string()]);
    }

    #[test]
    fn test_unquoted_dialect_keeps_quotes() {
        let file = csv_file("\"a\",b\n");
        let dialect = CsvDialect {
            enclosure: None,
            ..CsvDialect::default()
        };
        let mut source = CsvSource::open(file.path(), dialect).unwrap();
        let rows = source.read_rows(0, 0, 1).unwrap();
        assert_eq!(rows[0].cells()[0], CellValue::from("\"a\""));
    }

    #[test]
    fn test_blank_lines_keep_row_numbers() {
        let file = csv_file("a,x\n\nc,bad\r\n");
        let mut source = CsvSource::open(file.path(), CsvDialect::default()).unwrap();

        assert_eq!(source.row_count(0).unwrap(), 3);
        let rows = source.read_rows(0, 0, 10).unwrap();
        assert_eq!(rows.iter().map(Row::index).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(rows[1].is_blank());
        assert_eq!(rows[2].cells(), &[CellValue::from("c"), CellValue::from("bad")]);
    }

    #[test]
    fn test_quoted_newline_stays_in_one_row() {
        let file = csv_file("\"line1\n\nline3\",b\nnext,c\n");
        let mut source = CsvSource::open(file.path(), CsvDialect::default()).unwrap();

        let rows = source.read_rows(0, 0, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cells()[0], CellValue::from("line1\n\nline3"));
        assert_eq!(rows[1].index(), 2);
    }
}
