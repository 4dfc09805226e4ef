// ==========================================
// 表格导入导出管道 - 行校验器
// ==========================================
// 职责: 按规则集校验单行，产出 Failure（每个属性最多一个）
// 规则: 声明式规则 / 闭包规则 / 规则对象
// 红线: 行与行之间无共享状态（可并行校验）
// ==========================================

use crate::domain::failure::Failure;
use crate::domain::row::Row;
use crate::domain::types::CellValue;
use crate::importer::error::{ImportError, ImportResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// ==========================================
// 规则对象 (Rule Object)
// ==========================================
pub trait ValidationRule: Send + Sync {
    /// 是否通过
    fn passes(&self, attribute: &str, value: &CellValue) -> bool;

    /// 失败消息（支持 :attribute 占位符）
    fn message(&self) -> String;
}

/// 闭包规则：调用 fail(message) 表示校验失败
pub type ClosureRule = Arc<dyn Fn(&str, &CellValue, &mut dyn FnMut(String)) + Send + Sync>;

// ==========================================
// 规则 (Rule)
// ==========================================
#[derive(Clone)]
pub enum Rule {
    Required,
    Nullable,
    Filled,
    In(Vec<String>),
    NotIn(Vec<String>),
    Numeric,
    Integer,
    Boolean,
    Email,
    Date,
    Min(f64),
    Max(f64),
    Between(f64, f64),
    RequiredIf { other: String, values: Vec<String> },
    Closure(ClosureRule),
    Object(Arc<dyn ValidationRule>),
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::In(values) => write!(f, "in:{}", values.join(",")),
            Rule::NotIn(values) => write!(f, "not_in:{}", values.join(",")),
            Rule::Min(n) => write!(f, "min:{}", n),
            Rule::Max(n) => write!(f, "max:{}", n),
            Rule::Between(a, b) => write!(f, "between:{},{}", a, b),
            Rule::RequiredIf { other, values } => {
                write!(f, "required_if:{},{}", other, values.join(","))
            }
            other => write!(f, "{}", other.name()),
        }
    }
}

impl Rule {
    /// 构造闭包规则
    pub fn closure<F>(f: F) -> Self
    where
        F: Fn(&str, &CellValue, &mut dyn FnMut(String)) + Send + Sync + 'static,
    {
        Rule::Closure(Arc::new(f))
    }

    /// 构造规则对象
    pub fn object<R: ValidationRule + 'static>(rule: R) -> Self {
        Rule::Object(Arc::new(rule))
    }

    pub fn in_list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Rule::In(values.into_iter().map(Into::into).collect())
    }

    /// 规则名（自定义消息键使用，如 "1.in"）
    pub fn name(&self) -> &'static str {
        match self {
            Rule::Required => "required",
            Rule::Nullable => "nullable",
            Rule::Filled => "filled",
            Rule::In(_) => "in",
            Rule::NotIn(_) => "not_in",
            Rule::Numeric => "numeric",
            Rule::Integer => "integer",
            Rule::Boolean => "boolean",
            Rule::Email => "email",
            Rule::Date => "date",
            Rule::Min(_) => "min",
            Rule::Max(_) => "max",
            Rule::Between(..) => "between",
            Rule::RequiredIf { .. } => "required_if",
            Rule::Closure(_) => "closure",
            Rule::Object(_) => "custom",
        }
    }

    /// 解析单个声明式规则（"in:a,b" / "max:10" / "required"）
    pub fn parse_token(token: &str) -> ImportResult<Self> {
        let token = token.trim();
        let (name, args) = match token.split_once(':') {
            Some((name, args)) => (name.trim(), Some(args)),
            None => (token, None),
        };
        let list = || -> Vec<String> {
            args.map(|a| a.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default()
        };
        let number = |raw: &str| -> ImportResult<f64> {
            raw.trim().parse::<f64>().map_err(|_| {
                ImportError::Configuration(format!("校验规则参数不是数字: {}", token))
            })
        };

        let rule = match name {
            "required" => Rule::Required,
            "nullable" => Rule::Nullable,
            "filled" => Rule::Filled,
            "numeric" => Rule::Numeric,
            "integer" => Rule::Integer,
            "boolean" => Rule::Boolean,
            "email" => Rule::Email,
            "date" => Rule::Date,
            "in" => Rule::In(list()),
            "not_in" => Rule::NotIn(list()),
            "min" => Rule::Min(number(args.unwrap_or_default())?),
            "max" => Rule::Max(number(args.unwrap_or_default())?),
            "between" => {
                let parts = list();
                if parts.len() != 2 {
                    return Err(ImportError::Configuration(format!(
                        "between 规则需要两个参数: {}",
                        token
                    )));
                }
                Rule::Between(number(&parts[0])?, number(&parts[1])?)
            }
            "required_if" => {
                let mut parts = list();
                if parts.len() < 2 {
                    return Err(ImportError::Configuration(format!(
                        "required_if 规则至少需要两个参数: {}",
                        token
                    )));
                }
                let other = parts.remove(0);
                Rule::RequiredIf {
                    other,
                    values: parts,
                }
            }
            _ => {
                return Err(ImportError::Configuration(format!(
                    "未知的校验规则: {}",
                    token
                )))
            }
        };
        Ok(rule)
    }

    /// 解析管道分隔的规则串（"required|in:a,b"）
    pub fn parse(definition: &str) -> ImportResult<Vec<Rule>> {
        definition.split('|')
            .filter(|t| !t.trim().is_empty())
            .map(Rule::parse_token)
            .collect()
    }

    /// 隐式规则：值为空时仍然执行
    fn is_implicit(&self) -> bool {
        matches!(self, Rule::Required | Rule::Filled | Rule::RequiredIf { .. })
    }

    fn default_message(&self, numeric: bool) -> &'static str {
        match self {
            Rule::Required => "The :attribute field is required.",
            Rule::Filled => "The :attribute field must have a value.",
            Rule::In(_) | Rule::NotIn(_) => "The selected :attribute is invalid.",
            Rule::Numeric => "The :attribute must be a number.",
            Rule::Integer => "The :attribute must be an integer.",
            Rule::Boolean => "The :attribute field must be true or false.",
            Rule::Email => "The :attribute must be a valid email address.",
            Rule::Date => "The :attribute is not a valid date.",
            Rule::Min(_) if numeric => "The :attribute must be at least :min.",
            Rule::Min(_) => "The :attribute must be at least :min characters.",
            Rule::Max(_) if numeric => "The :attribute may not be greater than :max.",
            Rule::Max(_) => "The :attribute may not be greater than :max characters.",
            Rule::Between(..) if numeric => "The :attribute must be between :min and :max.",
            Rule::Between(..) => "The :attribute must be between :min and :max characters.",
            Rule::RequiredIf { .. } => "The :attribute field is required when :other is :value.",
            Rule::Nullable | Rule::Closure(_) | Rule::Object(_) => "The :attribute is invalid.",
        }
    }
}

// ==========================================
// 规则集 (Rule Set)
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    entries: Vec<(String, Vec<Rule>)>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定规则（同一属性重复绑定时追加）
    pub fn rule(mut self, attribute: impl Into<String>, rules: Vec<Rule>) -> Self {
        let attribute = attribute.into();
        match self.entries.iter_mut().find(|(key, _)| *key == attribute) {
            Some((_, existing)) => existing.extend(rules),
            None => self.entries.push((attribute, rules)),
        }
        self
    }

    /// 绑定声明式规则串
    pub fn parse(self, attribute: impl Into<String>, definition: &str) -> ImportResult<Self> {
        Ok(self.rule(attribute, Rule::parse(definition)?))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Rule])> {
        self.entries.iter().map(|(k, r)| (k.as_str(), r.as_slice()))
    }
}

// ==========================================
// 行校验器 (Row Validator)
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct RowValidator {
    rules: RuleSet,
    custom_attributes: HashMap<String, String>,
    custom_messages: HashMap<String, String>,
}

impl RowValidator {
    pub fn new(
        rules: RuleSet,
        custom_attributes: HashMap<String, String>,
        custom_messages: HashMap<String, String>,
    ) -> Self {
        Self {
            rules,
            custom_attributes,
            custom_messages,
        }
    }

    pub fn has_rules(&self) -> bool {
        !self.rules.is_empty()
    }

    /// 校验单行
    ///
    /// # 返回
    /// - 空: 校验通过
    /// - 非空: 每个失败属性一个 Failure（按规则集顺序）
    pub fn validate(&self, row: &Row) -> Vec<Failure> {
        let mut failures = Vec::new();

        for (attribute, rules) in self.rules.iter() {
            let value = row.get(attribute).cloned().unwrap_or(CellValue::Empty);
            let messages = self.check_attribute(row, attribute, &value, rules);
            if !messages.is_empty() {
                failures.push(Failure::new(
                    row.index(),
                    self.display_name(attribute),
                    messages,
                    row.cells().to_vec(),
                ));
            }
        }

        failures
    }

    fn check_attribute(
        &self,
        row: &Row,
        attribute: &str,
        value: &CellValue,
        rules: &[Rule],
    ) -> Vec<String> {
        let empty = value.is_empty();
        if empty && rules.iter().any(|r| matches!(r, Rule::Nullable)) {
            return Vec::new();
        }

        let numeric = rules
            .iter()
            .any(|r| matches!(r, Rule::Numeric | Rule::Integer));
        let mut messages = Vec::new();

        for rule in rules {
            if empty && !rule.is_implicit() {
                continue;
            }

            match rule {
                Rule::Closure(check) => {
                    let mut fail = |message: String| {
                        messages.push(self.render(&message, attribute, value, &[]));
                    };
                    check(attribute, value, &mut fail);
                }
                Rule::Object(object) => {
                    if !object.passes(attribute, value) {
                        messages.push(self.render(&object.message(), attribute, value, &[]));
                    }
                }
                _ => {
                    if !self.passes(row, rule, value, numeric) {
                        let template = self.message_template(attribute, rule, numeric);
                        let replacements = self.replacements(rule);
                        messages.push(self.render(&template, attribute, value, &replacements));
                    }
                }
            }
        }

        messages
    }

    fn passes(&self, row: &Row, rule: &Rule, value: &CellValue, numeric: bool) -> bool {
        match rule {
            Rule::Required | Rule::Filled => !value.is_empty(),
            Rule::Nullable => true,
            Rule::In(allowed) => allowed.iter().any(|a| *a == value.as_text()),
            Rule::NotIn(denied) => !denied.iter().any(|d| *d == value.as_text()),
            Rule::Numeric => !matches!(value, CellValue::Bool(_)) && value.as_f64().is_some(),
            Rule::Integer => is_integer(value),
            Rule::Boolean => is_boolean(value),
            Rule::Email => is_email(&value.as_text()),
            Rule::Date => is_date(value),
            Rule::Min(min) => size_of(value, numeric).map(|s| s >= *min).unwrap_or(false),
            Rule::Max(max) => size_of(value, numeric).map(|s| s <= *max).unwrap_or(false),
            Rule::Between(min, max) => size_of(value, numeric)
                .map(|s| s >= *min && s <= *max)
                .unwrap_or(false),
            Rule::RequiredIf { other, values } => {
                let other_value = row.get(other).map(CellValue::as_text).unwrap_or_default();
                !values.iter().any(|v| *v == other_value) || !value.is_empty()
            }
            Rule::Closure(_) | Rule::Object(_) => true,
        }
    }

    /// 消息模板：属性级自定义 > 规则级自定义 > 默认
    fn message_template(&self, attribute: &str, rule: &Rule, numeric: bool) -> String {
        let specific = format!("{}.{}", attribute, rule.name());
        self.custom_messages
            .get(&specific)
            .or_else(|| self.custom_messages.get(rule.name()))
            .cloned()
            .unwrap_or_else(|| rule.default_message(numeric).to_string())
    }

    fn replacements(&self, rule: &Rule) -> Vec<(&'static str, String)> {
        match rule {
            Rule::In(values) | Rule::NotIn(values) => vec![(":values", values.join(", "))],
            Rule::Min(min) => vec![(":min", format_number(*min))],
            Rule::Max(max) => vec![(":max", format_number(*max))],
            Rule::Between(min, max) => vec![
                (":min", format_number(*min)),
                (":max", format_number(*max)),
            ],
            Rule::RequiredIf { other, values } => vec![
                (":other", self.message_name(other)),
                (":value", values.join(", ")),
            ],
            _ => Vec::new(),
        }
    }

    fn render(
        &self,
        template: &str,
        attribute: &str,
        value: &CellValue,
        replacements: &[(&str, String)],
    ) -> String {
        let mut message = template.to_string();
        for (placeholder, replacement) in replacements {
            message = message.replace(placeholder, replacement);
        }
        message
            .replace(":attribute", &self.message_name(attribute))
            .replace(":input", &value.as_text())
    }

    /// Failure.attribute 使用的名称（自定义属性名优先）
    fn display_name(&self, attribute: &str) -> String {
        self.custom_attributes
            .get(attribute)
            .cloned()
            .unwrap_or_else(|| attribute.to_string())
    }

    /// 消息中使用的名称（无自定义时下划线替换为空格）
    fn message_name(&self, attribute: &str) -> String {
        match self.custom_attributes.get(attribute) {
            Some(name) => name.clone(),
            None => attribute.replace('_', " "),
        }
    }
}

// ===== 规则判定辅助 =====

fn format_number(n: f64) -> String {
    CellValue::Float(n).as_text()
}

fn is_integer(value: &CellValue) -> bool {
    match value {
        CellValue::Int(_) => true,
        CellValue::Float(f) => f.fract() == 0.0,
        CellValue::String(s) => s.trim().parse::<i64>().is_ok(),
        _ => false,
    }
}

fn is_boolean(value: &CellValue) -> bool {
    match value {
        CellValue::Bool(_) => true,
        CellValue::Int(i) => *i == 0 || *i == 1,
        CellValue::Float(f) => *f == 0.0 || *f == 1.0,
        CellValue::String(s) => matches!(s.trim(), "0" | "1"),
        _ => false,
    }
}

fn is_email(text: &str) -> bool {
    let text = text.trim();
    if text.chars().any(char::is_whitespace) {
        return false;
    }
    match text.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

fn is_date(value: &CellValue) -> bool {
    match value {
        CellValue::DateTime(_) => true,
        CellValue::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s).is_ok()
                || ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"]
                    .iter()
                    .any(|f| NaiveDateTime::parse_from_str(s, f).is_ok())
                || ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y", "%Y%m%d"]
                    .iter()
                    .any(|f| NaiveDate::parse_from_str(s, f).is_ok())
        }
        _ => false,
    }
}

/// min/max/between 的比较量：数值规则下取数值，否则取字符长度
fn size_of(value: &CellValue, numeric: bool) -> Option<f64> {
    if numeric {
        value.as_f64()
    } else {
        Some(value.as_text().chars().count() as f64)
    }
}
