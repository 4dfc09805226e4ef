// ==========================================
// 表格导入导出管道 - 生命周期事件
// ==========================================
// 约定: 每个生命周期节点一组监听器，按注册顺序同步调用
// 红线: 监听器只能观察，不能跳过或重排管道步骤
// ==========================================

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 生命周期节点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePoint {
    BeforeImport,
    BeforeSheet,
    AfterSheet,
    AfterImport,
    ImportFailed,
    BeforeExport,
    BeforeWriting,
}

/// 事件载荷（只读）
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineEvent {
    pub point: LifecyclePoint,
    /// 导入/导出标识（队列模式为 import_id）
    pub operation_id: Option<String>,
    pub sheet: Option<usize>,
    pub sheet_name: Option<String>,
    /// 已处理行数（AfterSheet / AfterImport）
    pub rows: Option<usize>,
    /// 错误描述（ImportFailed）
    pub error: Option<String>,
}

impl PipelineEvent {
    pub fn new(point: LifecyclePoint) -> Self {
        Self {
            point,
            operation_id: None,
            sheet: None,
            sheet_name: None,
            rows: None,
            error: None,
        }
    }

    pub fn with_operation(mut self, id: &str) -> Self {
        self.operation_id = Some(id.to_string());
        self
    }

    pub fn with_sheet(mut self, sheet: usize, name: Option<&str>) -> Self {
        self.sheet = Some(sheet);
        self.sheet_name = name.map(str::to_string);
        self
    }

    pub fn with_rows(mut self, rows: usize) -> Self {
        self.rows = Some(rows);
        self
    }

    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

pub type Listener = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

/// 事件总线
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: HashMap<LifecyclePoint, Vec<Listener>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&LifecyclePoint, usize> =
            self.listeners.iter().map(|(k, v)| (k, v.len())).collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册监听器
    pub fn on<F>(&mut self, point: LifecyclePoint, listener: F)
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        self.listeners
            .entry(point)
            .or_default()
            .push(Arc::new(listener));
    }

    /// 按注册顺序通知监听器
    pub fn emit(&self, event: &PipelineEvent) {
        if let Some(listeners) = self.listeners.get(&event.point) {
            for listener in listeners {
                listener(event);
            }
        }
    }

    pub fn listener_count(&self, point: LifecyclePoint) -> usize {
        self.listeners.get(&point).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_listeners_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            bus.on(LifecyclePoint::BeforeSheet, move |event| {
                seen.lock().unwrap().push((tag, event.sheet));
            });
        }

        bus.emit(&PipelineEvent::new(LifecyclePoint::BeforeSheet).with_sheet(0, None));
        bus.emit(&PipelineEvent::new(LifecyclePoint::AfterSheet));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", Some(0)), ("second", Some(0))]
        );
        assert_eq!(bus.listener_count(LifecyclePoint::AfterSheet), 0);
    }
}
