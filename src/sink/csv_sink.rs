// ==========================================
// 表格导入导出管道 - CSV 写出
// ==========================================
// 方言: 分隔符 / 包围符（空则不加引号）/ 行尾 / BOM / "sep=" 声明行
// Excel 兼容模式在构造时展开为具体方言
// ==========================================

use crate::config::pipeline_config::CsvDialect;
use crate::domain::types::CellValue;
use crate::importer::error::{ImportError, ImportResult};
use crate::sink::{SheetHandle, SinkOutput, TabularSink};
use csv::{QuoteStyle, Terminator, Writer, WriterBuilder};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

enum CsvTarget {
    File { path: PathBuf, writer: BufWriter<File> },
    Memory(Vec<u8>),
}

impl Write for CsvTarget {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CsvTarget::File { writer, .. } => writer.write(buf),
            CsvTarget::Memory(bytes) => bytes.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CsvTarget::File { writer, .. } => writer.flush(),
            CsvTarget::Memory(_) => Ok(()),
        }
    }
}

fn write_error(err: impl std::fmt::Display) -> ImportError {
    ImportError::Export(format!("CSV 写出失败: {}", err))
}

pub struct CsvSink {
    writer: Writer<CsvTarget>,
    sheet_started: bool,
    rows_written: usize,
}

impl CsvSink {
    /// 写出到文件（父目录不存在时创建）
    pub fn to_path(path: &Path, dialect: CsvDialect) -> ImportResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_error)?;
            }
        }
        let file = File::create(path).map_err(write_error)?;
        Self::with_target(
            CsvTarget::File {
                path: path.to_path_buf(),
                writer: BufWriter::new(file),
            },
            dialect,
        )
    }

    /// 写出到内存
    pub fn in_memory(dialect: CsvDialect) -> ImportResult<Self> {
        Self::with_target(CsvTarget::Memory(Vec::new()), dialect)
    }

    fn with_target(mut target: CsvTarget, dialect: CsvDialect) -> ImportResult<Self> {
        let dialect = dialect.effective();
        dialect.validate()?;

        if dialect.use_bom {
            target.write_all(UTF8_BOM).map_err(write_error)?;
        }
        if dialect.include_separator_line {
            write!(target, "sep={}{}", dialect.delimiter, dialect.line_ending)
                .map_err(write_error)?;
        }

        let terminator = match dialect.line_ending.as_str() {
            "\r\n" => Terminator::CRLF,
            "\r" => Terminator::Any(b'\r'),
            _ => Terminator::Any(b'\n'),
        };

        let mut builder = WriterBuilder::new();
        builder
            .delimiter(dialect.delimiter_byte()?)
            .terminator(terminator)
            .flexible(true);

        match dialect.enclosure_byte()? {
            Some(quote) => {
                builder.quote(quote).quote_style(QuoteStyle::Necessary);
            }
            None => {
                builder.quote_style(QuoteStyle::Never);
            }
        }
        if let Some(escape) = dialect.escape_byte()? {
            builder.escape(escape).double_quote(false);
        }

        Ok(Self {
            writer: builder.from_writer(target),
            sheet_started: false,
            rows_written: 0,
        })
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }
}

impl TabularSink for CsvSink {
    fn begin_sheet(&mut self, _name: Option<&str>) -> ImportResult<SheetHandle> {
        if self.sheet_started {
            return Err(ImportError::Export(
                "CSV 只能写出一个工作表".to_string(),
            ));
        }
        self.sheet_started = true;
        Ok(SheetHandle(0))
    }

    fn append_row(&mut self, sheet: SheetHandle, cells: &[CellValue]) -> ImportResult<()> {
        if !self.sheet_started || sheet.0 != 0 {
            return Err(ImportError::Export(format!(
                "无效的工作表句柄: {}",
                sheet.0
            )));
        }
        self.writer
            .write_record(cells.iter().map(CellValue::as_text))
            .map_err(write_error)?;
        self.rows_written += 1;
        Ok(())
    }

    fn finalize(self: Box<Self>) -> ImportResult<SinkOutput> {
        let mut writer = self.writer;
        writer.flush().map_err(write_error)?;
        let target = writer.into_inner().map_err(write_error)?;

        match target {
            CsvTarget::File { path, mut writer } => {
                writer.flush().map_err(write_error)?;
                Ok(SinkOutput::Path(path))
            }
            CsvTarget::Memory(bytes) => Ok(SinkOutput::Bytes(bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_rows(dialect: CsvDialect, rows: &[Vec<CellValue>]) -> String {
        let mut sink: Box<dyn TabularSink> = Box::new(CsvSink::in_memory(dialect).unwrap());
        let sheet = sink.begin_sheet(None).unwrap();
        for row in rows {
            sink.append_row(sheet, row).unwrap();
        }
        let bytes = sink.finalize().unwrap().into_bytes().unwrap();
        String::from_utf8(bytes).unwrap()
    }

    fn sample() -> Vec<Vec<CellValue>> {
        vec![
            vec!["A1".into(), "B1".into()],
            vec!["A2".into(), "B2".into()],
        ]
    }

    #[test]
    fn test_custom_dialect_with_separator_line() {
        let dialect = CsvDialect {
            delimiter: ';',
            enclosure: None,
            line_ending: "\r\n".to_string(),
            use_bom: true,
            include_separator_line: true,
            ..CsvDialect::default()
        };
        let out = write_rows(dialect, &sample());
        assert!(out.starts_with('\u{feff}'));
        assert!(out.contains("sep=;\r\n"));
        assert!(out.contains("A1;B1\r\n"));
        assert!(out.contains("A2;B2\r\n"));
    }

    #[test]
    fn test_excel_compatibility_forces_dialect() {
        let dialect = CsvDialect {
            excel_compatibility: true,
            ..CsvDialect::default()
        };
        let out = write_rows(dialect, &sample());
        assert_eq!(out, "\u{feff}sep=;\r\nA1;B1\r\nA2;B2\r\n");
    }

    #[test]
    fn test_necessary_quoting() {
        let out = write_rows(
            CsvDialect::default(),
            &[vec!["a,b".into(), CellValue::Int(3), CellValue::Empty]],
        );
        assert_eq!(out, "\"a,b\",3,\n");
    }

    #[test]
    fn test_second_sheet_rejected() {
        let mut sink = CsvSink::in_memory(CsvDialect::default()).unwrap();
        sink.begin_sheet(Some("one")).unwrap();
        assert!(matches!(
            sink.begin_sheet(Some("two")),
            Err(ImportError::Export(_))
        ));
    }
}
