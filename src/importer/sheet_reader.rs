// ==========================================
// 表格导入导出管道 - 导入管道（Sheet Reader）
// ==========================================
// 职责: 以单一泛型管道驱动任意导入策略
// 流程: 读表头 → 分块 → 校验 → 失败策略 → 批量写入 → 汇总
// 红线: 分块之间互相独立，不存在跨分块回滚
// ==========================================

use crate::config::pipeline_config::PipelineConfig;
use crate::domain::failure::Failure;
use crate::domain::row::{Chunk, Row};
use crate::domain::types::FailurePolicy;
use crate::importer::batch_inserter::{callback_error, BatchInserter};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::events::{EventBus, LifecyclePoint, PipelineEvent};
use crate::importer::failure_collector::FailureCollector;
use crate::importer::row_stream::ChunkReader;
use crate::importer::strategy::{ConsumeMode, ImportStrategy, ResolvedImport};
use crate::importer::validator::RowValidator;
use crate::repository::persistence_sink::PersistenceSink;
use crate::source::TabularSource;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

// ==========================================
// 导入结果 (Import Outcome)
// ==========================================
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SheetOutcome {
    pub sheet: usize,
    pub name: String,
    /// 进入分块的数据行数
    pub total_rows: usize,
    pub committed_rows: usize,
    pub failed_rows: usize,
    /// ToCollection 模式下收集的行
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportOutcome {
    pub operation_id: String,
    pub sheets: Vec<SheetOutcome>,
    /// 仅 CollectAndContinue 下非空
    pub failures: Vec<Failure>,
}

impl ImportOutcome {
    pub fn total_rows(&self) -> usize {
        self.sheets.iter().map(|s| s.total_rows).sum()
    }

    pub fn committed_rows(&self) -> usize {
        self.sheets.iter().map(|s| s.committed_rows).sum()
    }

    pub fn failed_rows(&self) -> usize {
        self.sheets.iter().map(|s| s.failed_rows).sum()
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// 单个分块的处理结果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChunkOutcome {
    pub committed: usize,
    pub failed: usize,
    pub rows: Vec<Row>,
}

// ==========================================
// ImportPipeline - 导入管道
// ==========================================
pub struct ImportPipeline<S: ImportStrategy> {
    strategy: Arc<S>,
    resolved: ResolvedImport,
    validator: RowValidator,
    events: EventBus,
    inserter: Option<BatchInserter<S::Entity>>,
}

impl<S: ImportStrategy> ImportPipeline<S> {
    /// 构建导入管道（能力与规则在此一次性解析）
    ///
    /// # 参数
    /// - strategy: 导入策略
    /// - sink: 落库目标（ToModel 模式必填）
    /// - config: 管道配置
    pub fn new(
        strategy: Arc<S>,
        sink: Option<Arc<dyn PersistenceSink<S::Entity>>>,
        config: &PipelineConfig,
    ) -> ImportResult<Self> {
        config.validate()?;
        let resolved = ResolvedImport::resolve(strategy.capabilities(), config)?;
        Self::build(strategy, sink, resolved)
    }

    /// 构建收集型管道（忽略策略的消费方式，行全部收集）
    pub fn collecting(strategy: Arc<S>, config: &PipelineConfig) -> ImportResult<Self> {
        config.validate()?;
        let mut resolved = ResolvedImport::resolve(strategy.capabilities(), config)?;
        resolved.consume = ConsumeMode::ToCollection;
        Self::build(strategy, None, resolved)
    }

    fn build(
        strategy: Arc<S>,
        sink: Option<Arc<dyn PersistenceSink<S::Entity>>>,
        resolved: ResolvedImport,
    ) -> ImportResult<Self> {
        let inserter = match resolved.consume {
            ConsumeMode::ToModel { batch_size } => {
                let sink = sink.ok_or_else(|| {
                    ImportError::Configuration("ToModel 导入需要提供落库目标".to_string())
                })?;
                Some(BatchInserter::new(sink, batch_size))
            }
            _ => None,
        };

        let validator = RowValidator::new(
            strategy.rules()?,
            strategy.custom_attributes(),
            strategy.custom_messages(),
        );

        let mut events = EventBus::new();
        strategy.register_events(&mut events);

        debug!(
            chunk_size = resolved.chunk_size,
            heading_row = ?resolved.heading_row,
            policy = %resolved.failure_policy,
            consume = ?resolved.consume,
            "导入管道构建完成"
        );

        Ok(Self {
            strategy,
            resolved,
            validator,
            events,
            inserter,
        })
    }

    pub fn resolved(&self) -> &ResolvedImport {
        &self.resolved
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn strategy(&self) -> &Arc<S> {
        &self.strategy
    }

    // ==========================================
    // 同步导入
    // ==========================================

    /// 同步导入（单线程逐块处理）
    ///
    /// # 返回
    /// - Ok(ImportOutcome): 导入结果（CollectAndContinue 下携带全部失败）
    /// - Err(Validation): FailFast 下首个失败行
    /// - Err(其他): 数据源/写入/配置错误
    #[instrument(skip(self, source), fields(operation_id))]
    pub fn import_synchronous(&self, source: &mut dyn TabularSource) -> ImportResult<ImportOutcome> {
        let start_time = Instant::now();
        let operation_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("operation_id", operation_id.as_str());

        info!(policy = %self.resolved.failure_policy, "开始同步导入");
        self.events
            .emit(&PipelineEvent::new(LifecyclePoint::BeforeImport).with_operation(&operation_id));

        match self.import_sheets(source, &operation_id) {
            Ok(outcome) => {
                info!(
                    total_rows = outcome.total_rows(),
                    committed_rows = outcome.committed_rows(),
                    failed_rows = outcome.failed_rows(),
                    elapsed_ms = start_time.elapsed().as_millis() as u64,
                    "同步导入完成"
                );
                self.events.emit(
                    &PipelineEvent::new(LifecyclePoint::AfterImport)
                        .with_operation(&operation_id)
                        .with_rows(outcome.committed_rows()),
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "同步导入失败");
                self.events.emit(
                    &PipelineEvent::new(LifecyclePoint::ImportFailed)
                        .with_operation(&operation_id)
                        .with_error(&e),
                );
                Err(e)
            }
        }
    }

    fn import_sheets(
        &self,
        source: &mut dyn TabularSource,
        operation_id: &str,
    ) -> ImportResult<ImportOutcome> {
        let names = source.sheet_names()?;
        let sheets = self.resolved.sheets.resolve(names.len())?;
        let mut collector = FailureCollector::new(self.resolved.failure_policy);
        let mut outcome = ImportOutcome {
            operation_id: operation_id.to_string(),
            ..ImportOutcome::default()
        };

        for sheet in sheets {
            let name = names.get(sheet).cloned().unwrap_or_default();
            self.events.emit(
                &PipelineEvent::new(LifecyclePoint::BeforeSheet)
                    .with_operation(operation_id)
                    .with_sheet(sheet, Some(&name)),
            );

            let sheet_outcome = self.import_sheet(source, sheet, name, &mut collector)?;

            self.events.emit(
                &PipelineEvent::new(LifecyclePoint::AfterSheet)
                    .with_operation(operation_id)
                    .with_sheet(sheet, Some(&sheet_outcome.name))
                    .with_rows(sheet_outcome.committed_rows),
            );
            outcome.sheets.push(sheet_outcome);
        }

        outcome.failures = collector.into_failures();
        Ok(outcome)
    }

    fn import_sheet(
        &self,
        source: &mut dyn TabularSource,
        sheet: usize,
        name: String,
        collector: &mut FailureCollector,
    ) -> ImportResult<SheetOutcome> {
        let reader = ChunkReader::from_resolved(&self.resolved)?;
        let mut stats = SheetOutcome {
            sheet,
            name,
            ..SheetOutcome::default()
        };

        reader.for_each_chunk(source, sheet, |chunk| {
            let chunk_outcome = self.process_chunk(&chunk, collector)?;
            stats.total_rows += chunk.len();
            stats.committed_rows += chunk_outcome.committed;
            stats.failed_rows += chunk_outcome.failed;
            stats.rows.extend(chunk_outcome.rows);
            Ok(())
        })?;

        debug!(
            sheet,
            total_rows = stats.total_rows,
            committed_rows = stats.committed_rows,
            "sheet 导入完成"
        );
        Ok(stats)
    }

    // ==========================================
    // 分块处理（同步与队列模式共用）
    // ==========================================

    /// 处理单个分块: 校验 → 失败策略 → 消费
    ///
    /// FailFast: 失败行之前的行照常提交，随后返回校验错误
    /// CollectAndContinue: 失败行被剔除，其余行作为一个单元提交
    pub fn process_chunk(
        &self,
        chunk: &Chunk,
        collector: &mut FailureCollector,
    ) -> ImportResult<ChunkOutcome> {
        let mut survivors = Vec::with_capacity(chunk.len());
        let mut chunk_failures = Vec::new();
        let mut failed = 0;

        for row in &chunk.rows {
            let failures = self.validator.validate(row);
            if failures.is_empty() {
                survivors.push(row.clone());
                continue;
            }

            failed += 1;
            if collector.policy() == FailurePolicy::FailFast {
                let committed = self.consume(&survivors)?;
                info!(
                    sheet = chunk.sheet,
                    row = row.index(),
                    committed,
                    "校验失败，终止导入"
                );
                collector.report(failures)?;
                return Ok(ChunkOutcome {
                    committed,
                    failed,
                    rows: self.collected(survivors),
                });
            }
            chunk_failures.extend(failures);
        }

        if !chunk_failures.is_empty() {
            self.strategy.on_failure(&chunk_failures);
            collector.report(chunk_failures)?;
        }

        let committed = self.consume(&survivors)?;
        debug!(
            sheet = chunk.sheet,
            sequence = chunk.sequence,
            committed,
            failed,
            "分块处理完成"
        );

        Ok(ChunkOutcome {
            committed,
            failed,
            rows: self.collected(survivors),
        })
    }

    fn consume(&self, rows: &[Row]) -> ImportResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        match self.resolved.consume {
            ConsumeMode::ToModel { .. } => match &self.inserter {
                Some(inserter) => inserter.commit(rows, |row| self.strategy.model(row)),
                None => Err(ImportError::Configuration(
                    "ToModel 导入需要提供落库目标".to_string(),
                )),
            },
            ConsumeMode::OnEachRow => {
                for row in rows {
                    self.strategy
                        .on_row(row)
                        .map_err(|e| callback_error(row.index(), e))?;
                }
                Ok(rows.len())
            }
            ConsumeMode::ToCollection => Ok(rows.len()),
        }
    }

    fn collected(&self, rows: Vec<Row>) -> Vec<Row> {
        if self.resolved.consume == ConsumeMode::ToCollection {
            rows
        } else {
            Vec::new()
        }
    }
}
