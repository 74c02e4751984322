use std::{borrow::Cow, collections::VecDeque, fmt, marker::PhantomData, sync::Arc};

use tracing::debug;

use crate::{
    config::PipelineConfig,
    context::{DispatchSettings, ErasedStage, Link, StageContext, TypeTag},
    error::{Boundary, ChainError, Result},
    handler::{Handler, SharedHandler, StageInfo},
    instrument::EndOfChainObserver,
    pipeline::{Pipeline, PipelineCore, next_pipeline_id},
};

/// 构建期的 Stage 序列，两种构建器共用。
///
/// # 教案式说明
/// - **逻辑（How）**：`add_*` 时即创建 Stage 上下文；`finalize` 依次完成
///   1. 校验链路首尾类型；
///   2. 写入每个 Stage 的位置信息与调度设置；
///   3. 正向连接相邻 Stage，最后一个 Stage 的下游置空；
///   4. 生成核心并逆序 attach。
/// - **契约（What）**：任何一步失败都不会 attach 任何 Stage，已创建的上下文随错误一起释放。
struct StageChain {
    stages: VecDeque<Arc<dyn ErasedStage>>,
    config: PipelineConfig,
    observer: Option<Arc<dyn EndOfChainObserver>>,
}

impl StageChain {
    fn new() -> Self {
        Self {
            stages: VecDeque::new(),
            config: PipelineConfig::default(),
            observer: None,
        }
    }

    fn push_back<H: Handler>(&mut self, handler: H) {
        self.stages.push_back(Arc::new(StageContext::new(handler)));
    }

    fn push_front<H: Handler>(&mut self, handler: H) {
        self.stages.push_front(Arc::new(StageContext::new(handler)));
    }

    fn finalize<In, Out>(self) -> Result<Pipeline<In, Out>>
    where
        In: Send + 'static,
        Out: Send + 'static,
    {
        let StageChain {
            stages,
            config,
            observer,
        } = self;
        let stages: Vec<Arc<dyn ErasedStage>> = stages.into();
        if stages.is_empty() {
            return Err(ChainError::EmptyPipeline);
        }
        let last_index = stages.len() - 1;

        let entry = TypeTag::of::<In>();
        let first = &stages[0];
        if first.input_type() != entry {
            return Err(ChainError::BoundaryMismatch {
                handler: first.descriptor().label_cow(),
                boundary: Boundary::Input,
                declared: entry.name(),
                actual: first.input_type().name(),
            });
        }
        let exit = TypeTag::of::<Out>();
        let last = &stages[last_index];
        if last.output_type() != exit {
            return Err(ChainError::BoundaryMismatch {
                handler: last.descriptor().label_cow(),
                boundary: Boundary::Output,
                declared: exit.name(),
                actual: last.output_type().name(),
            });
        }

        let id = next_pipeline_id();
        let label: Cow<'static, str> = Cow::Owned(config.label);
        let settings = Arc::new(DispatchSettings {
            end_notice: config.end_notice,
            stage_spans: config.stage_spans,
            observer,
        });
        for (index, stage) in stages.iter().enumerate() {
            let info = StageInfo::new(index, stage.descriptor().label_cow(), label.clone(), id);
            stage.place(info, Arc::clone(&settings));
        }

        for pair in stages.windows(2) {
            pair[0].set_next(Some(&pair[1]))?;
        }
        stages[last_index].set_next(None)?;

        let front = Arc::clone(&stages[0])
            .inbound_link()
            .downcast::<std::sync::Weak<dyn Link<In>>>()
            .map(|link| *link)
            .map_err(|_| ChainError::BoundaryMismatch {
                handler: stages[0].descriptor().label_cow(),
                boundary: Boundary::Input,
                declared: entry.name(),
                actual: stages[0].input_type().name(),
            })?;

        let stage_count = stages.len();
        let core = Arc::new(PipelineCore::new(id, label, stages));
        core.attach_all();

        let pipeline = Pipeline::from_parts(core, front);
        debug!(
            pipeline = %pipeline.label(),
            id,
            stages = stage_count,
            input = entry.name(),
            output = exit.name(),
            "pipeline finalized"
        );
        Ok(pipeline)
    }
}

/// 尚未追加任何 Handler 的静态构建器，由 [`Pipeline::builder`] 返回。
///
/// 追加第一个 Handler 后即转为 [`PipelineBuilder`]，链路的输入类型由该 Handler 决定。
pub struct EmptyBuilder {
    chain: StageChain,
}

impl EmptyBuilder {
    pub(crate) fn new() -> Self {
        Self {
            chain: StageChain::new(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.chain.config = config;
        self
    }

    /// 注册链尾观察者。闭包需显式标注参数类型 `&EndOfChainNotice<'_>`。
    pub fn with_observer(mut self, observer: impl EndOfChainObserver) -> Self {
        self.chain.observer = Some(Arc::new(observer));
        self
    }

    /// 追加第一个 Handler。
    pub fn add_back<H: Handler>(mut self, handler: H) -> PipelineBuilder<H::In, H::Out> {
        self.chain.push_back(handler);
        PipelineBuilder::from_chain(self.chain)
    }

    /// 对空构建器而言与 [`add_back`](Self::add_back) 等价。
    pub fn add_front<H: Handler>(self, handler: H) -> PipelineBuilder<H::In, H::Out> {
        self.add_back(handler)
    }

    /// 以共享方式追加第一个 Handler，调用方保留的 `Arc` 可继续观察其 attach 状态。
    pub fn add_back_shared<H: Handler>(
        self,
        handler: Arc<SharedHandler<H>>,
    ) -> PipelineBuilder<H::In, H::Out> {
        self.add_back(handler)
    }

    /// 空链路不能封装，始终返回 [`ChainError::EmptyPipeline`]。
    pub fn finalize<In, Out>(self) -> Result<Pipeline<In, Out>>
    where
        In: Send + 'static,
        Out: Send + 'static,
    {
        self.chain.finalize()
    }
}

impl fmt::Debug for EmptyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmptyBuilder")
            .field("config", &self.chain.config)
            .finish()
    }
}

/// 静态类型检查的构建器：`In` 为链路输入类型，`Out` 为当前最后一个 Stage 的输出类型。
///
/// # 契约说明（What）
/// - `add_back` 要求新 Handler 的 `In` 等于当前 `Out`；
/// - `add_front` 要求新 Handler 的 `Out` 等于当前 `In`；
/// - 不满足时无法通过编译，`finalize` 不会因相邻类型不一致而失败。
///
/// ```compile_fail
/// use spark_chain::{ChainError, Handler, HandlerContext, Pipeline};
///
/// struct ToText;
/// impl Handler for ToText {
///     type In = u32;
///     type Out = String;
///     fn process(&self, ctx: &dyn HandlerContext<String>, input: u32) -> Result<(), ChainError> {
///         ctx.forward(input.to_string())
///     }
/// }
///
/// // String 不能流向接收 u32 的 Stage。
/// let _ = Pipeline::builder().add_back(ToText).add_back(ToText);
/// ```
pub struct PipelineBuilder<In, Out> {
    chain: StageChain,
    _types: PhantomData<fn(In) -> Out>,
}

impl<In, Out> PipelineBuilder<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    fn from_chain(chain: StageChain) -> Self {
        Self {
            chain,
            _types: PhantomData,
        }
    }

    /// 在链尾追加 Handler。
    pub fn add_back<H>(mut self, handler: H) -> PipelineBuilder<In, H::Out>
    where
        H: Handler<In = Out>,
    {
        self.chain.push_back(handler);
        PipelineBuilder::from_chain(self.chain)
    }

    /// 以共享方式在链尾追加 Handler。
    pub fn add_back_shared<H>(self, handler: Arc<SharedHandler<H>>) -> PipelineBuilder<In, H::Out>
    where
        H: Handler<In = Out>,
    {
        self.add_back(handler)
    }

    /// 在链首插入 Handler。
    pub fn add_front<H>(mut self, handler: H) -> PipelineBuilder<H::In, Out>
    where
        H: Handler<Out = In>,
    {
        self.chain.push_front(handler);
        PipelineBuilder::from_chain(self.chain)
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.chain.config = config;
        self
    }

    pub fn with_observer(mut self, observer: impl EndOfChainObserver) -> Self {
        self.chain.observer = Some(Arc::new(observer));
        self
    }

    /// 已追加的 Stage 数量。
    pub fn len(&self) -> usize {
        self.chain.stages.len()
    }

    /// 静态构建器至少包含一个 Stage，恒为 `false`。
    pub fn is_empty(&self) -> bool {
        self.chain.stages.is_empty()
    }

    /// 连接、attach 并返回可调度的 Pipeline。
    pub fn finalize(self) -> Result<Pipeline<In, Out>> {
        self.chain.finalize()
    }
}

impl<In, Out> fmt::Debug for PipelineBuilder<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("stages", &self.chain.stages.len())
            .field("input", &core::any::type_name::<In>())
            .field("output", &core::any::type_name::<Out>())
            .finish()
    }
}

/// 运行期类型检查的构建器，由 [`Pipeline::create`] 返回。
///
/// # 教案式说明
/// - **意图（Why）**：Stage 数量或类型只有在运行期才能确定时（例如按配置循环追加），
///   静态构建器无法表达，改由 `finalize` 逐对比较类型标签。
/// - **契约（What）**：
///   - `finalize::<In, Out>()` 校验首个 Stage 接收 `In`、最后一个 Stage 产出 `Out`，
///     以及每对相邻 Stage 的输出/输入类型一致；
///   - 相邻 Stage 不一致返回 [`ChainError::TypeMismatch`]，`handler` 字段为出错位置上游一侧的 Handler；
///   - 首尾与声明的 `In` / `Out` 不一致返回 [`ChainError::BoundaryMismatch`]，`handler` 字段为端点上的 Handler；
///   - 空链路返回 [`ChainError::EmptyPipeline`]。
pub struct DynPipelineBuilder {
    chain: StageChain,
}

impl Default for DynPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DynPipelineBuilder {
    pub fn new() -> Self {
        Self {
            chain: StageChain::new(),
        }
    }

    /// 在链尾追加 Handler，返回自身以便链式调用。
    pub fn add_back<H: Handler>(mut self, handler: H) -> Self {
        self.chain.push_back(handler);
        self
    }

    /// 以共享方式在链尾追加 Handler。
    pub fn add_back_shared<H: Handler>(self, handler: Arc<SharedHandler<H>>) -> Self {
        self.add_back(handler)
    }

    /// 在链首插入 Handler。
    pub fn add_front<H: Handler>(mut self, handler: H) -> Self {
        self.chain.push_front(handler);
        self
    }

    /// 借用形式的 `add_back`，便于在循环中追加。
    pub fn push_back<H: Handler>(&mut self, handler: H) -> &mut Self {
        self.chain.push_back(handler);
        self
    }

    /// 借用形式的 `add_front`。
    pub fn push_front<H: Handler>(&mut self, handler: H) -> &mut Self {
        self.chain.push_front(handler);
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.chain.config = config;
        self
    }

    pub fn with_observer(mut self, observer: impl EndOfChainObserver) -> Self {
        self.chain.observer = Some(Arc::new(observer));
        self
    }

    pub fn len(&self) -> usize {
        self.chain.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.stages.is_empty()
    }

    /// 校验类型、连接、attach 并返回可调度的 Pipeline。
    pub fn finalize<In, Out>(self) -> Result<Pipeline<In, Out>>
    where
        In: Send + 'static,
        Out: Send + 'static,
    {
        self.chain.finalize()
    }
}

impl fmt::Debug for DynPipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self
            .chain
            .stages
            .iter()
            .map(|stage| stage.descriptor().label())
            .collect();
        f.debug_struct("DynPipelineBuilder")
            .field("stages", &labels)
            .field("config", &self.chain.config)
            .finish()
    }
}
