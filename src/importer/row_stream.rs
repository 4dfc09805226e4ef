// ==========================================
// 表格导入导出管道 - 行流与分块读取
// ==========================================
// 职责: 按窗口从数据源惰性读取行，按 chunk_size 分组回调
// 红线: 分块边界只由 chunk_size 与源表行数决定（ceil(n / size) 块）
// 红线: 表头行及其上方的行不进入任何分块
// ==========================================

use crate::domain::row::{Chunk, HeadingFormatter, HeadingRow, Row};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::strategy::ResolvedImport;
use crate::source::TabularSource;
use std::sync::Arc;
use tracing::{debug, instrument};

// ==========================================
// 分块计划 (Chunk Plan)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub sheet: usize,
    pub sequence: usize,
    /// 起始偏移（从 0 开始）
    pub start_offset: usize,
    /// 本块覆盖的源表行数
    pub len: usize,
}

impl ChunkPlan {
    pub fn start_row(&self) -> usize {
        self.start_offset + 1
    }

    pub fn end_row(&self) -> usize {
        self.start_offset + self.len
    }
}

/// 计算 [first_offset, end_offset) 的分块边界
///
/// # 参数
/// - first_offset: 首个数据行偏移（从 0 开始）
/// - end_offset: 数据末尾偏移（不含）
/// - chunk_size: 每块行数（0 时返回空计划）
pub fn plan_chunks(
    sheet: usize,
    first_offset: usize,
    end_offset: usize,
    chunk_size: usize,
) -> Vec<ChunkPlan> {
    if chunk_size == 0 || end_offset <= first_offset {
        return Vec::new();
    }

    (first_offset..end_offset)
        .step_by(chunk_size)
        .enumerate()
        .map(|(sequence, start_offset)| ChunkPlan {
            sheet,
            sequence,
            start_offset,
            len: chunk_size.min(end_offset - start_offset),
        })
        .collect()
}

// ==========================================
// 行流 (Row Stream)
// ==========================================
pub struct RowStream<'a> {
    source: &'a mut dyn TabularSource,
    sheet: usize,
    next_offset: usize,
    end_offset: usize,
    window: usize,
    heading: Option<Arc<HeadingRow>>,
    buffer: std::vec::IntoIter<Row>,
    finished: bool,
}

impl<'a> RowStream<'a> {
    pub fn heading(&self) -> Option<&Arc<HeadingRow>> {
        self.heading.as_ref()
    }

    fn attach(&self, row: Row) -> Row {
        match &self.heading {
            Some(heading) => row.with_heading(Arc::clone(heading)),
            None => row,
        }
    }
}

impl Iterator for RowStream<'_> {
    type Item = ImportResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.buffer.next() {
                return Some(Ok(self.attach(row)));
            }
            if self.finished || self.next_offset >= self.end_offset {
                return None;
            }

            let count = self.window.min(self.end_offset - self.next_offset);
            match self.source.read_rows(self.sheet, self.next_offset, count) {
                Ok(rows) => {
                    // 数据源提前结束
                    if rows.is_empty() {
                        self.finished = true;
                    }
                    self.next_offset += count;
                    self.buffer = rows.into_iter();
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// 读取表头并构建映射
///
/// # 返回
/// - None: 未配置表头，或表头行超出数据范围
pub fn read_heading(
    source: &mut dyn TabularSource,
    sheet: usize,
    heading_row: Option<usize>,
    formatter: HeadingFormatter,
) -> ImportResult<Option<Arc<HeadingRow>>> {
    let Some(heading_row) = heading_row else {
        return Ok(None);
    };
    Ok(source
        .read_heading(sheet, heading_row)?
        .map(|labels| Arc::new(HeadingRow::new(&labels, formatter))))
}

/// 打开一个 sheet 的行流（先读表头，再从表头下一行开始流式读取）
pub fn stream<'a>(
    source: &'a mut dyn TabularSource,
    sheet: usize,
    heading_row: Option<usize>,
    formatter: HeadingFormatter,
    window: usize,
) -> ImportResult<RowStream<'a>> {
    let heading = read_heading(source, sheet, heading_row, formatter)?;
    let end_offset = source.row_count(sheet)?;

    Ok(RowStream {
        source,
        sheet,
        next_offset: heading_row.unwrap_or(0),
        end_offset,
        window: window.max(1),
        heading,
        buffer: Vec::new().into_iter(),
        finished: false,
    })
}

// ==========================================
// 分块读取器 (Chunk Reader)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkReader {
    chunk_size: usize,
    heading_row: Option<usize>,
    formatter: HeadingFormatter,
    skip_empty_rows: bool,
}

impl ChunkReader {
    /// # 返回
    /// - Err(Configuration): chunk_size 为 0
    pub fn new(
        chunk_size: usize,
        heading_row: Option<usize>,
        formatter: HeadingFormatter,
    ) -> ImportResult<Self> {
        if chunk_size == 0 {
            return Err(ImportError::Configuration(
                "chunk_size 必须大于 0".to_string(),
            ));
        }
        Ok(Self {
            chunk_size,
            heading_row,
            formatter,
            skip_empty_rows: false,
        })
    }

    pub fn from_resolved(resolved: &ResolvedImport) -> ImportResult<Self> {
        Ok(Self::new(
            resolved.chunk_size,
            resolved.heading_row,
            resolved.heading_formatter,
        )?
        .skip_empty_rows(resolved.skip_empty_rows))
    }

    pub fn skip_empty_rows(mut self, skip: bool) -> Self {
        self.skip_empty_rows = skip;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 首个数据行偏移
    pub fn data_start(&self) -> usize {
        self.heading_row.unwrap_or(0)
    }

    pub fn read_heading(
        &self,
        source: &mut dyn TabularSource,
        sheet: usize,
    ) -> ImportResult<Option<Arc<HeadingRow>>> {
        read_heading(source, sheet, self.heading_row, self.formatter)
    }

    /// 计算一个 sheet 的分块计划（只统计行数，不读取数据）
    pub fn plan(&self, source: &mut dyn TabularSource, sheet: usize) -> ImportResult<Vec<ChunkPlan>> {
        let total = source.row_count(sheet)?;
        Ok(plan_chunks(sheet, self.data_start(), total, self.chunk_size))
    }

    /// 按计划读取单个分块（队列任务使用）
    pub fn read_chunk(
        &self,
        source: &mut dyn TabularSource,
        plan: &ChunkPlan,
        heading: Option<&Arc<HeadingRow>>,
    ) -> ImportResult<Chunk> {
        let rows = source
            .read_rows(plan.sheet, plan.start_offset, plan.len)?
            .into_iter()
            .map(|row| match heading {
                Some(h) => row.with_heading(Arc::clone(h)),
                None => row,
            })
            .collect();

        Ok(self.make_chunk(plan.sheet, plan.sequence, rows))
    }

    /// 逐块回调（同步模式）
    ///
    /// # 返回
    /// - Ok(usize): 回调的分块数
    #[instrument(skip(self, source, callback), fields(chunk_size = self.chunk_size))]
    pub fn for_each_chunk<F>(
        &self,
        source: &mut dyn TabularSource,
        sheet: usize,
        mut callback: F,
    ) -> ImportResult<usize>
    where
        F: FnMut(Chunk) -> ImportResult<()>,
    {
        let rows = stream(
            source,
            sheet,
            self.heading_row,
            self.formatter,
            self.chunk_size,
        )?;

        let mut sequence = 0;
        let mut pending = Vec::with_capacity(self.chunk_size);
        for row in rows {
            pending.push(row?);
            if pending.len() == self.chunk_size {
                let chunk = self.make_chunk(sheet, sequence, std::mem::take(&mut pending));
                callback(chunk)?;
                sequence += 1;
            }
        }
        if !pending.is_empty() {
            callback(self.make_chunk(sheet, sequence, pending))?;
            sequence += 1;
        }

        debug!(sheet, chunks = sequence, "sheet 分块读取完成");
        Ok(sequence)
    }

    fn make_chunk(&self, sheet: usize, sequence: usize, mut rows: Vec<Row>) -> Chunk {
        // 空行过滤发生在分块之后，行号不受影响
        if self.skip_empty_rows {
            rows.retain(|row| !row.is_blank());
        }
        Chunk {
            sheet,
            sequence,
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::CellValue;
    use crate::source::MemorySource;

    fn numbered(n: usize) -> MemorySource {
        MemorySource::single(
            (0..n)
                .map(|i| vec![CellValue::Int(i as i64)])
                .collect(),
        )
    }

    #[test]
    fn test_plan_chunk_count() {
        for total in 0..12 {
            for size in 1..5 {
                let plans = plan_chunks(0, 0, total, size);
                assert_eq!(plans.len(), (total + size - 1) / size);
                assert_eq!(plans.iter().map(|p| p.len).sum::<usize>(), total);
            }
        }
    }

    #[test]
    fn test_chunks_preserve_order_and_indices() {
        let mut source = numbered(7);
        let reader = ChunkReader::new(3, None, HeadingFormatter::Slug).unwrap();

        let mut seen = Vec::new();
        let mut sizes = Vec::new();
        let chunks = reader
            .for_each_chunk(&mut source, 0, |chunk| {
                sizes.push(chunk.len());
                seen.extend(chunk.rows.iter().map(Row::index));
                Ok(())
            })
            .unwrap();

        assert_eq!(chunks, 3);
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(seen, (1..=7).collect::<Vec<_>>());
    }

    #[test]
    fn test_heading_excluded_and_attached() {
        let mut source = MemorySource::from_strings(&[
            &["Name", "Status"],
            &["a", "x"],
            &["b", "y"],
        ]);
        let reader = ChunkReader::new(10, Some(1), HeadingFormatter::Slug).unwrap();

        let mut rows = Vec::new();
        reader
            .for_each_chunk(&mut source, 0, |chunk| {
                rows.extend(chunk.rows);
                Ok(())
            })
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index(), 2);
        assert_eq!(rows[1].get("status"), Some(&CellValue::from("y")));
    }

    #[test]
    fn test_stream_reads_in_windows() {
        let mut source = numbered(10);
        let count = stream(&mut source, 0, None, HeadingFormatter::Slug, 4)
            .unwrap()
            .filter_map(Result::ok)
            .count();
        assert_eq!(count, 10);
        assert_eq!(source.read_calls(), 3);
    }

    #[test]
    fn test_skip_empty_rows_keeps_numbering() {
        let mut source = MemorySource::from_strings(&[&["a"], &[""], &["c"]]);
        let reader = ChunkReader::new(2, None, HeadingFormatter::Slug)
            .unwrap()
            .skip_empty_rows(true);

        let mut chunks = Vec::new();
        reader
            .for_each_chunk(&mut source, 0, |chunk| {
                chunks.push(chunk.rows.iter().map(Row::index).collect::<Vec<_>>());
                Ok(())
            })
            .unwrap();

        assert_eq!(chunks, vec![vec![1], vec![3]]);
    }

    #[test]
    fn test_read_chunk_by_plan() {
        let mut source = numbered(5);
        let reader = ChunkReader::new(2, None, HeadingFormatter::Slug).unwrap();
        let plans = reader.plan(&mut source, 0).unwrap();
        assert_eq!(plans.len(), 3);

        let chunk = reader.read_chunk(&mut source, &plans[1], None).unwrap();
        assert_eq!(chunk.first_row(), Some(3));
        assert_eq!(chunk.last_row(), Some(4));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(
            ChunkReader::new(0, None, HeadingFormatter::Slug),
            Err(ImportError::Configuration(_))
        ));
    }
}
