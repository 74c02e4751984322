use std::{borrow::Cow, ops::Deref, sync::Arc};

use spin::Mutex;
use tracing::warn;

use crate::{context::HandlerContext, error::Result};

/// 单个处理阶段的合约：消费一个 `In`，向下游转发零个或多个 `Out`。
///
/// # 教案式说明
/// - **意图（Why）**：责任链中的每个 Stage 只关心“收到什么、交出什么”，与邻居的连接由
///   [`HandlerContext`] 代理；Handler 因而可以在不同链路之间复用。
/// - **契约（What）**：
///   - `process` 对每条入站消息恰好调用一次；
///   - 在 `process` 内调用 `ctx.forward(out)`：零次表示吞掉消息，一次为常规转发，多次则每条消息
///     都会在 `forward` 返回前完整走完剩余链路（同步、按序、不交错）；
///   - `on_attach` / `on_detach` 在 Handler 被接入 / 移出一条已封装链路时各触发一次；
///     `on_attach` 触发时下游已全部 attach，可直接 `forward`；
///   - 返回的错误不会被责任链拦截，原样传播回 [`Pipeline::handle`](crate::Pipeline::handle) 的调用方。
/// - **并发（Trade-offs）**：方法均以 `&self` 调用，同一 Pipeline 被多线程并发 `handle` 时责任链不提供互斥，
///   Handler 若持有可变状态需自行加锁。
pub trait Handler: Send + Sync + 'static {
    /// 入站消息类型。
    type In: Send + 'static;
    /// 转发给下一阶段的消息类型。
    type Out: Send + 'static;

    /// 处理一条消息。
    fn process(&self, ctx: &dyn HandlerContext<Self::Out>, input: Self::In) -> Result<()>;

    /// Handler 被接入链路。
    fn on_attach(&self, _ctx: &dyn HandlerContext<Self::Out>) {}

    /// Handler 被移出链路。
    fn on_detach(&self, _ctx: &dyn HandlerContext<Self::Out>) {}

    /// 返回 Handler 元数据；默认以类型名作为标签。
    fn describe(&self) -> HandlerDescriptor {
        HandlerDescriptor::of::<Self>()
    }
}

/// Handler 的静态描述，用于错误信息、日志字段与链路快照。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerDescriptor {
    label: Cow<'static, str>,
    type_name: &'static str,
}

impl HandlerDescriptor {
    /// 以类型名构造描述，标签取去掉模块路径与泛型参数后的短名。
    pub fn of<H: ?Sized>() -> Self {
        let type_name = core::any::type_name::<H>();
        Self {
            label: Cow::Borrowed(short_type_name(type_name)),
            type_name,
        }
    }

    /// 以类型名构造描述，并覆盖标签。
    pub fn named<H: ?Sized>(label: impl Into<Cow<'static, str>>) -> Self {
        Self {
            label: label.into(),
            type_name: core::any::type_name::<H>(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn label_cow(&self) -> Cow<'static, str> {
        self.label.clone()
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    let head = full.split('<').next().unwrap_or(full);
    head.rsplit("::").next().unwrap_or(head)
}

/// Stage 在已封装链路中的位置信息。
///
/// `finalize` 时为每个 Stage 生成一次，之后不再变化。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageInfo {
    index: usize,
    label: Cow<'static, str>,
    pipeline: Cow<'static, str>,
    pipeline_id: u64,
}

impl StageInfo {
    pub(crate) fn new(
        index: usize,
        label: Cow<'static, str>,
        pipeline: Cow<'static, str>,
        pipeline_id: u64,
    ) -> Self {
        Self {
            index,
            label,
            pipeline,
            pipeline_id,
        }
    }

    /// 尚未封装（或已被移出）的 Stage 使用的占位信息。
    pub(crate) const fn unplaced() -> Self {
        Self {
            index: usize::MAX,
            label: Cow::Borrowed("<unplaced>"),
            pipeline: Cow::Borrowed(""),
            pipeline_id: 0,
        }
    }

    /// Stage 在链路中的下标，从 0 开始。
    pub fn index(&self) -> usize {
        self.index
    }

    /// Handler 标签。
    pub fn label(&self) -> &str {
        &self.label
    }

    /// 所属 Pipeline 的标签。
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// 所属 Pipeline 的进程内唯一编号。
    pub fn pipeline_id(&self) -> u64 {
        self.pipeline_id
    }
}

/// 可被外部继续持有的共享 Handler。
///
/// # 教案式说明
/// - **意图（Why）**：拥有型的 `add_back(handler)` 会把 Handler 移入 Stage，调用方随后无法再访问它；
///   当测试或管理面需要在封装后继续观察 Handler 时，以 `Arc<SharedHandler<H>>` 形式接入。
/// - **逻辑（How）**：`Arc<SharedHandler<H>>` 自身实现 [`Handler`]，在 `on_attach` / `on_detach` 中维护
///   Handler 级别的 attach 计数与所在 Stage 信息，然后委托给内部 Handler。
/// - **契约（What）**：
///   - 计数为 1 时 [`context`](Self::context) 返回所在 Stage；
///   - 同一个共享 Handler 被接入多个 Stage 时计数超过 1，`context()` 返回 `None` 并输出一条
///     `warn` 日志；消息处理不受影响；
///   - 计数从 2 回落到 1 时不会恢复 Stage 信息，需要重新 attach。
pub struct SharedHandler<H> {
    inner: H,
    attachment: Mutex<HandlerAttachment>,
}

#[derive(Default)]
struct HandlerAttachment {
    count: u64,
    stage: Option<StageInfo>,
}

impl<H: Handler> SharedHandler<H> {
    /// 包装 Handler 并返回共享句柄。
    pub fn new(handler: H) -> Arc<Self> {
        Arc::new(Self {
            inner: handler,
            attachment: Mutex::new(HandlerAttachment::default()),
        })
    }

    /// 当前接入的 Stage 数量。
    pub fn attach_count(&self) -> u64 {
        self.attachment.lock().count
    }

    /// 仅在恰好接入一个 Stage 时返回其位置信息。
    pub fn context(&self) -> Option<StageInfo> {
        let attachment = self.attachment.lock();
        if attachment.count != 1 {
            return None;
        }
        attachment.stage.clone()
    }
}

impl<H> Deref for SharedHandler<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.inner
    }
}

impl<H: Handler> Handler for Arc<SharedHandler<H>> {
    type In = H::In;
    type Out = H::Out;

    fn process(&self, ctx: &dyn HandlerContext<Self::Out>, input: Self::In) -> Result<()> {
        self.inner.process(ctx, input)
    }

    fn on_attach(&self, ctx: &dyn HandlerContext<Self::Out>) {
        {
            let mut attachment = self.attachment.lock();
            attachment.count += 1;
            if attachment.count == 1 {
                attachment.stage = Some(ctx.stage().clone());
            } else {
                attachment.stage = None;
                warn!(
                    handler = %self.inner.describe().label(),
                    pipeline = %ctx.stage().pipeline(),
                    stage = ctx.stage().index(),
                    attach_count = attachment.count,
                    "shared handler attached to more than one stage; context introspection disabled"
                );
            }
        }
        self.inner.on_attach(ctx);
    }

    fn on_detach(&self, ctx: &dyn HandlerContext<Self::Out>) {
        self.inner.on_detach(ctx);
        let mut attachment = self.attachment.lock();
        if attachment.count >= 1 {
            attachment.count -= 1;
        }
        attachment.stage = None;
    }

    fn describe(&self) -> HandlerDescriptor {
        self.inner.describe()
    }
}
