//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 汇总责任链在装配期与调度期可能出现的失败，对外暴露单一的 [`ChainError`]；
//! - 每个变体携带稳定错误码（见 [`codes`]），日志与告警按错误码聚合，而不是解析消息文本。
//!
//! ## 设计要求（What）
//! - 类型兼容性错误只会在 `finalize` 阶段出现，调度期不会再次校验；
//! - Handler 自身的失败通过 [`ChainError::Handler`] 包装后原样冒泡到 `handle` 的调用方，
//!   责任链不做逐级隔离；
//! - “到达链尾”与“重复 attach”都不是错误：前者是正常终止，后者仅降级 introspection。

use std::{borrow::Cow, error::Error as StdError, fmt};

use thiserror::Error;

/// 责任链统一的 `Result` 别名。
pub type Result<T, E = ChainError> = core::result::Result<T, E>;

/// 稳定错误码，遵循 `<域>.<语义>` 命名约定。
pub mod codes {
    /// 相邻 Stage 的输出/输入类型不一致。
    pub const TYPE_MISMATCH: &str = "chain.type_mismatch";
    /// 链路首尾与 `finalize::<In, Out>()` 声明的类型不一致。
    pub const BOUNDARY_MISMATCH: &str = "chain.boundary_mismatch";
    /// 尝试封装一条没有任何 Stage 的链路。
    pub const EMPTY: &str = "chain.empty";
    /// Handler 在 `process` 中返回了错误。
    pub const HANDLER_FAILED: &str = "chain.handler_failed";
    /// 通过弱句柄调度时，Pipeline 已被释放。
    pub const RELEASED: &str = "chain.released";
    /// 配置文本无法解析。
    pub const CONFIG_INVALID: &str = "chain.config_invalid";
}

/// 责任链错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把“装配失败”和“调度失败”放进同一个枚举，调用方只需处理一种错误类型，
///   并且能够用 `?` 从 Handler 内部一路传播到 `handle` 的调用点。
/// - **契约 (What)**：
///   - [`TypeMismatch`](Self::TypeMismatch) 的 `handler` 字段总是指向出错位置上游一侧的 Handler 标签；
///   - 所有变体均为 `Send + Sync + 'static`，可跨线程移动；
///   - [`code`](Self::code) 对每个变体返回固定字符串，可作为指标维度。
/// - **执行逻辑 (How)**：`thiserror` 派生 `Display`/`Error`，`Handler` 变体通过 `#[source]`
///   暴露底层原因，保持错误链完整。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChainError {
    /// 相邻 Stage 的输出/输入类型不一致。
    ///
    /// - `handler`：出错位置的 Handler 标签；
    /// - `expected`：下游期望接收的类型名；
    /// - `found`：上游实际产出的类型名。
    #[error("type mismatch at `{handler}`: expected `{expected}`, found `{found}`")]
    TypeMismatch {
        handler: Cow<'static, str>,
        expected: &'static str,
        found: &'static str,
    },

    /// 首个 Stage 的输入或最后一个 Stage 的输出与 Pipeline 声明的 `In` / `Out` 不一致。
    ///
    /// - `handler`：位于该端点的 Handler 标签；
    /// - `declared`：`finalize` 时声明的类型名；
    /// - `actual`：该 Handler 实际接收（入口）或产出（出口）的类型名。
    #[error("declared pipeline {boundary} `{declared}` does not match `{handler}` ({actual})")]
    BoundaryMismatch {
        handler: Cow<'static, str>,
        boundary: Boundary,
        declared: &'static str,
        actual: &'static str,
    },

    /// 没有任何 Stage 的链路不允许封装为 Pipeline。
    #[error("pipeline has no stages")]
    EmptyPipeline,

    /// Handler 在处理消息时失败。
    #[error("handler `{stage}` failed: {source}")]
    Handler {
        stage: Cow<'static, str>,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    /// 弱句柄升级失败：Pipeline 的最后一个强引用已经释放。
    #[error("pipeline has been released")]
    PipelineReleased,

    /// 配置文本解析失败。
    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl ChainError {
    /// 供 Handler 实现包装业务错误的便捷构造函数。
    ///
    /// # 契约说明（What）
    /// - `stage`：建议传入 Handler 的标签，便于在日志中定位；
    /// - `source`：任意可转换为 `Box<dyn Error + Send + Sync>` 的错误，包括 `&str` 与 `String`。
    ///
    /// ```rust
    /// use spark_chain::{ChainError, error::codes};
    ///
    /// let err = ChainError::handler("decoder", "truncated frame");
    /// assert_eq!(err.code(), codes::HANDLER_FAILED);
    /// assert_eq!(err.to_string(), "handler `decoder` failed: truncated frame");
    /// ```
    pub fn handler(
        stage: impl Into<Cow<'static, str>>,
        source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        ChainError::Handler {
            stage: stage.into(),
            source: source.into(),
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ChainError::TypeMismatch { .. } => codes::TYPE_MISMATCH,
            ChainError::BoundaryMismatch { .. } => codes::BOUNDARY_MISMATCH,
            ChainError::EmptyPipeline => codes::EMPTY,
            ChainError::Handler { .. } => codes::HANDLER_FAILED,
            ChainError::PipelineReleased => codes::RELEASED,
            ChainError::Config(_) => codes::CONFIG_INVALID,
        }
    }

    /// 是否属于装配期（配置类）错误。调度期错误只有 `Handler` 与 `PipelineReleased` 两种。
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ChainError::TypeMismatch { .. }
                | ChainError::BoundaryMismatch { .. }
                | ChainError::EmptyPipeline
                | ChainError::Config(_)
        )
    }
}

/// Pipeline 的两个端点。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Boundary {
    /// 首个 Stage 的输入。
    Input,
    /// 最后一个 Stage 的输出。
    Output,
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::Input => f.write_str("input"),
            Boundary::Output => f.write_str("output"),
        }
    }
}
