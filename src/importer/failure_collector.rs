// ==========================================
// 表格导入导出管道 - 失败收集器
// ==========================================
// FailFast: 首个失败即返回终止型校验错误
// CollectAndContinue: 追加到导入级失败序列，不返回错误
// ==========================================

use crate::domain::failure::Failure;
use crate::domain::types::FailurePolicy;
use crate::importer::error::{ImportError, ImportResult, ValidationError};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct FailureCollector {
    policy: FailurePolicy,
    failures: Vec<Failure>,
}

impl FailureCollector {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            failures: Vec::new(),
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// 上报一组失败
    ///
    /// # 返回
    /// - Err(Validation): FailFast 且失败非空
    /// - Ok(()): 其余情况（CollectAndContinue 下失败被累积）
    pub fn report(&mut self, failures: Vec<Failure>) -> ImportResult<()> {
        if failures.is_empty() {
            return Ok(());
        }

        match self.policy {
            FailurePolicy::FailFast => Err(ImportError::Validation(ValidationError::new(failures))),
            FailurePolicy::CollectAndContinue => {
                for failure in &failures {
                    warn!(row = failure.row, attribute = %failure.attribute, "行校验失败，已跳过");
                }
                self.failures.extend(failures);
                Ok(())
            }
        }
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<Failure> {
        self.failures
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(row: usize) -> Failure {
        Failure::new(row, "1", vec!["The selected 1 is invalid.".to_string()], vec![])
    }

    #[test]
    fn test_fail_fast_raises_on_first_report() {
        let mut collector = FailureCollector::new(FailurePolicy::FailFast);
        assert!(collector.report(vec![]).is_ok());

        let err = collector.report(vec![failure(3)]).unwrap_err();
        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.failures()[0].row, 3);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_collect_accumulates_in_order() {
        let mut collector = FailureCollector::new(FailurePolicy::CollectAndContinue);
        collector.report(vec![failure(2)]).unwrap();
        collector.report(vec![failure(5), failure(6)]).unwrap();
        let rows: Vec<usize> = collector.failures().iter().map(|f| f.row).collect();
        assert_eq!(rows, vec![2, 5, 6]);
    }
}
