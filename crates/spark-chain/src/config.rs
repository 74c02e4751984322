//! Pipeline 装配配置。
//!
//! 配置只影响观测行为（标签、链尾通知级别、Stage Span），不改变调度语义。

use serde::Deserialize;

use crate::error::Result;

/// 链尾通知（消息到达最后一个 Stage 且无下游可转发）的日志级别。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    /// 不输出日志，仅回调 [`EndOfChainObserver`](crate::EndOfChainObserver)。
    Off,
    Trace,
    #[default]
    Debug,
    Info,
}

/// Pipeline 配置。
///
/// # 契约说明（What）
/// - `label`：写入每个 Stage 的 [`StageInfo::pipeline`](crate::StageInfo) 与所有日志字段；
/// - `end_notice`：链尾通知的级别，默认 `debug`；
/// - `stage_spans`：为每次 `process` 调用开启一个 `chain.stage` trace span，默认关闭。
///
/// 未出现在 TOML 中的字段取默认值；未知字段视为配置错误。
///
/// ```rust
/// use spark_chain::{NoticeLevel, PipelineConfig};
///
/// let config = PipelineConfig::from_toml_str(
///     r#"
///     label = "ingress"
///     end_notice = "info"
///     "#,
/// )
/// .unwrap();
/// assert_eq!(config.label, "ingress");
/// assert_eq!(config.end_notice, NoticeLevel::Info);
/// assert!(!config.stage_spans);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub label: String,
    pub end_notice: NoticeLevel,
    pub stage_spans: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            label: String::from("pipeline"),
            end_notice: NoticeLevel::default(),
            stage_spans: false,
        }
    }
}

impl PipelineConfig {
    /// 从 TOML 文本解析配置，解析失败映射为 [`ChainError::Config`](crate::ChainError::Config)。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// 以默认值为基础设置标签。
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// 设置链尾通知级别。
    pub fn with_end_notice(mut self, level: NoticeLevel) -> Self {
        self.end_notice = level;
        self
    }

    /// 开启或关闭逐 Stage 的 trace span。
    pub fn with_stage_spans(mut self, enabled: bool) -> Self {
        self.stage_spans = enabled;
        self
    }
}
