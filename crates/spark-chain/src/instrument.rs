use std::any::Any;

use tracing::{Span, debug, info, trace, trace_span};

use crate::{config::NoticeLevel, context::DispatchSettings, handler::StageInfo};

/// 链尾通知：消息到达最后一个 Stage 后被丢弃。
///
/// # 契约说明（What）
/// - `stage`：发出通知的 Stage；
/// - `value_type`：被丢弃消息的类型名；
/// - `value`：被丢弃的消息本身，观察者可按需向下转型读取。
///
/// 通知只在回调期间有效，观察者若需保留内容应自行克隆。
#[derive(Clone, Copy)]
pub struct EndOfChainNotice<'a> {
    pub stage: &'a StageInfo,
    pub value_type: &'static str,
    pub value: &'a dyn Any,
}

impl<'a> EndOfChainNotice<'a> {
    /// 尝试把被丢弃的消息视为 `T`。
    pub fn downcast_ref<T: Any>(&self) -> Option<&'a T> {
        self.value.downcast_ref::<T>()
    }
}

/// 链尾通知的接收方。
///
/// # 教案式说明
/// - **意图（Why）**：到达链尾不是错误，但测试与诊断场景需要观察“最后交出了什么”；
///   观察者在日志之外提供一个结构化的出口。
/// - **契约（What）**：回调在调度线程上同步执行，必须无阻塞；不得在回调中再次调度同一 Pipeline。
///   任意 `Fn(&EndOfChainNotice<'_>) + Send + Sync + 'static` 闭包都自动实现该 Trait。
pub trait EndOfChainObserver: Send + Sync + 'static {
    fn on_end_of_chain(&self, notice: &EndOfChainNotice<'_>);
}

impl<F> EndOfChainObserver for F
where
    F: Fn(&EndOfChainNotice<'_>) + Send + Sync + 'static,
{
    fn on_end_of_chain(&self, notice: &EndOfChainNotice<'_>) {
        self(notice)
    }
}

/// 按配置级别输出链尾日志，并回调观察者。
pub(crate) fn notify_end_of_chain<T: Any>(
    stage: &StageInfo,
    settings: &DispatchSettings,
    value: &T,
) {
    let value_type = core::any::type_name::<T>();
    match settings.end_notice {
        NoticeLevel::Off => {}
        NoticeLevel::Trace => trace!(
            pipeline = %stage.pipeline(),
            stage = %stage.label(),
            index = stage.index(),
            value_type,
            "reached end of pipeline"
        ),
        NoticeLevel::Debug => debug!(
            pipeline = %stage.pipeline(),
            stage = %stage.label(),
            index = stage.index(),
            value_type,
            "reached end of pipeline"
        ),
        NoticeLevel::Info => info!(
            pipeline = %stage.pipeline(),
            stage = %stage.label(),
            index = stage.index(),
            value_type,
            "reached end of pipeline"
        ),
    }

    if let Some(observer) = settings.observer.as_deref() {
        observer.on_end_of_chain(&EndOfChainNotice {
            stage,
            value_type,
            value,
        });
    }
}

/// 为一次 `process` 调用创建 `chain.stage` span。
pub(crate) fn stage_span(stage: &StageInfo) -> Span {
    trace_span!(
        "chain.stage",
        pipeline = %stage.pipeline(),
        stage = %stage.label(),
        index = stage.index(),
    )
}
