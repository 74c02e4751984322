// 教案级说明：已封装的 Pipeline
//
// ## 意图（Why）
// - `Pipeline` 只能由构建器的 `finalize` 产生，因此“封装前调度”与“封装后追加 Handler”
//   在类型层面不可表达；
// - 对外句柄是 `Arc` 共享的：克隆句柄不会复制链路，所有句柄与调度守卫释放后链路才会析构。
//
// ## 解析逻辑（How）
// - `PipelineCore` 持有全部 Stage 的强引用；Stage 之间、Stage 指回核心的引用都是 `Weak`；
// - 每次 `receive` 都会把 Stage 指回核心的弱引用升级为强引用，调用栈上存在调度时核心不会被析构；
// - 核心析构时按从前到后的顺序 detach，与 `finalize` 的逆序 attach 相对。
use std::{
    borrow::Cow,
    fmt,
    marker::PhantomData,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::debug;

use crate::{
    builder::{DynPipelineBuilder, EmptyBuilder},
    context::{ErasedStage, Link},
    error::{ChainError, Result},
};

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_pipeline_id() -> u64 {
    NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed)
}

/// 单个 Stage 的只读快照，顺序与执行顺序一致。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageSnapshot {
    pub index: usize,
    pub label: String,
    pub handler_type: &'static str,
    pub input_type: &'static str,
    pub output_type: &'static str,
    pub attached: bool,
    /// `receive` 被调用的次数。
    pub received: u64,
    /// 成功交给下游的消息数。
    pub forwarded: u64,
    /// 到达链尾后被丢弃的消息数。
    pub dropped_at_end: u64,
}

/// 链路核心：独占所有 Stage。
pub(crate) struct PipelineCore {
    id: u64,
    label: Cow<'static, str>,
    stages: Vec<Arc<dyn ErasedStage>>,
}

impl PipelineCore {
    pub(crate) fn new(id: u64, label: Cow<'static, str>, stages: Vec<Arc<dyn ErasedStage>>) -> Self {
        Self { id, label, stages }
    }

    /// 逆序 attach：下游先就绪，上游在 `on_attach` 中立即转发也不会落到未 attach 的邻居上。
    pub(crate) fn attach_all(self: &Arc<Self>) {
        let back_reference = Arc::downgrade(self);
        for stage in self.stages.iter().rev() {
            stage.attach(back_reference.clone());
        }
    }

    fn snapshot(&self) -> Vec<StageSnapshot> {
        self.stages.iter().map(|stage| stage.snapshot()).collect()
    }
}

impl Drop for PipelineCore {
    fn drop(&mut self) {
        for stage in &self.stages {
            stage.detach();
        }
        debug!(
            pipeline = %self.label,
            id = self.id,
            stages = self.stages.len(),
            "pipeline released; stages detached"
        );
    }
}

/// Handler 视角下的所属链路：不携带 `In` / `Out` 类型参数，只提供只读信息。
///
/// # 教案式说明
/// - **意图（Why）**：Handler 只知道自己的 `In` / `Out`，无法写出所属 `Pipeline` 的完整类型；
///   通过 [`HandlerContext::pipeline`](crate::HandlerContext::pipeline) 拿到的类型擦除句柄，
///   足以在 `process` 或钩子中读取标签、编号与快照。
/// - **契约（What）**：
///   - 句柄持有链路核心的强引用，存活期间链路不会析构；
///   - Stage 未 attach、或链路已进入析构时，上下文返回 `None`。
/// - **风险提示（Trade-offs）**：Handler 不应把句柄保存在自身字段里，否则 Handler 与链路互相持有，
///   链路永远不会释放。
#[derive(Clone)]
pub struct PipelineHandle {
    core: Arc<PipelineCore>,
}

impl PipelineHandle {
    pub(crate) fn new(core: Arc<PipelineCore>) -> Self {
        Self { core }
    }

    pub fn label(&self) -> &str {
        &self.core.label
    }

    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn len(&self) -> usize {
        self.core.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.stages.is_empty()
    }

    /// 链路快照，与 [`Pipeline::snapshot`] 一致。
    pub fn snapshot(&self) -> Vec<StageSnapshot> {
        self.core.snapshot()
    }
}

impl fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("id", &self.core.id)
            .field("label", &self.core.label)
            .finish()
    }
}

/// 已封装、可调度的责任链。
///
/// # 教案式说明
/// - **意图（Why）**：把“装配完毕、类型已校验、Stage 已 attach”的链路表示为独立类型，
///   调用方拿到它即可直接 `handle`。
/// - **契约（What）**：
///   - `In` 为首个 Stage 的输入类型，`Out` 为最后一个 Stage 的输出类型，二者均已在封装时校验；
///   - [`handle`](Self::handle) 在调用线程上同步执行整条链路，返回路径上第一个 Handler 错误；
///   - `Clone` 得到指向同一链路的新句柄。
/// - **风险提示（Trade-offs）**：链路深度决定 `handle` 的栈深度；Handler 内部持有本 Pipeline 的强句柄会形成
///   引用环，应改用 [`WeakPipeline`]。
///
/// ```rust
/// use spark_chain::{ChainError, Handler, HandlerContext, Pipeline};
///
/// struct Double;
///
/// impl Handler for Double {
///     type In = u32;
///     type Out = u32;
///
///     fn process(&self, ctx: &dyn HandlerContext<u32>, input: u32) -> Result<(), ChainError> {
///         ctx.forward(input * 2)
///     }
/// }
///
/// let pipeline = Pipeline::builder().add_back(Double).add_back(Double).finalize()?;
/// pipeline.handle(3)?;
/// assert_eq!(pipeline.snapshot()[1].received, 1);
/// # Ok::<(), ChainError>(())
/// ```
pub struct Pipeline<In, Out> {
    core: Arc<PipelineCore>,
    front: Weak<dyn Link<In>>,
    _out: PhantomData<fn() -> Out>,
}

impl Pipeline<(), ()> {
    /// 开始一条静态类型检查的链路：相邻 Stage 的类型在编译期匹配。
    pub fn builder() -> EmptyBuilder {
        EmptyBuilder::new()
    }

    /// 开始一条运行期类型检查的链路：Stage 数量或类型在编译期未知时使用，
    /// 类型不一致在 `finalize` 时以 [`ChainError::TypeMismatch`] 报告。
    pub fn create() -> DynPipelineBuilder {
        DynPipelineBuilder::new()
    }
}

impl<In: Send + 'static, Out: Send + 'static> Pipeline<In, Out> {
    pub(crate) fn from_parts(core: Arc<PipelineCore>, front: Weak<dyn Link<In>>) -> Self {
        Self {
            core,
            front,
            _out: PhantomData,
        }
    }

    /// 将一条输入送入链路首个 Stage，并同步等待整条链路处理完毕。
    pub fn handle(&self, input: In) -> Result<()> {
        let front = self.front.upgrade().ok_or(ChainError::PipelineReleased)?;
        front.receive(input)
    }

    /// 生成不持有链路的弱句柄。
    pub fn downgrade(&self) -> WeakPipeline<In, Out> {
        WeakPipeline {
            core: Arc::downgrade(&self.core),
            front: self.front.clone(),
            _out: PhantomData,
        }
    }

    /// Stage 数量，封装后恒大于 0。
    pub fn len(&self) -> usize {
        self.core.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.stages.is_empty()
    }

    pub fn label(&self) -> &str {
        &self.core.label
    }

    /// 进程内唯一编号。
    pub fn id(&self) -> u64 {
        self.core.id
    }

    /// 返回链路快照，顺序与执行顺序一致。
    pub fn snapshot(&self) -> Vec<StageSnapshot> {
        self.core.snapshot()
    }
}

impl<In, Out> Clone for Pipeline<In, Out> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            front: self.front.clone(),
            _out: PhantomData,
        }
    }
}

impl<In, Out> fmt::Debug for Pipeline<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.core.id)
            .field("label", &self.core.label)
            .field("stages", &self.core.stages.len())
            .field("input", &core::any::type_name::<In>())
            .field("output", &core::any::type_name::<Out>())
            .finish()
    }
}

/// 不延长链路生命周期的弱句柄，适合被 Handler 自身持有。
pub struct WeakPipeline<In, Out> {
    core: Weak<PipelineCore>,
    front: Weak<dyn Link<In>>,
    _out: PhantomData<fn() -> Out>,
}

impl<In: Send + 'static, Out: Send + 'static> WeakPipeline<In, Out> {
    /// 若链路仍存活，返回新的强句柄。
    pub fn upgrade(&self) -> Option<Pipeline<In, Out>> {
        let core = self.core.upgrade()?;
        Some(Pipeline::from_parts(core, self.front.clone()))
    }

    /// 直接调度首个 Stage；链路已释放时返回 [`ChainError::PipelineReleased`]。
    ///
    /// 本方法不持有链路的强引用：调度期间链路由各 Stage 的调度守卫保活，
    /// 其他句柄在此期间全部释放时，detach 推迟到本次调用返回之后。
    pub fn handle(&self, input: In) -> Result<()> {
        if self.core.strong_count() == 0 {
            return Err(ChainError::PipelineReleased);
        }
        let front = self.front.upgrade().ok_or(ChainError::PipelineReleased)?;
        front.receive(input)
    }
}

impl<In, Out> Clone for WeakPipeline<In, Out> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            front: self.front.clone(),
            _out: PhantomData,
        }
    }
}

impl<In, Out> fmt::Debug for WeakPipeline<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPipeline")
            .field("alive", &(self.core.strong_count() > 0))
            .finish()
    }
}
