// 教案级说明：Stage 上下文
//
// ## 意图（Why）
// - 每个 Handler 被包进一个 `StageContext`，由它负责三件事：接收上游消息（`Link`）、
//   把 Handler 的输出交给下游（`HandlerContext::forward`）、维护 attach 生命周期；
// - 上下文之间只通过 `Weak<dyn Link<T>>` 互相指向，所有强引用都由 Pipeline 核心持有。
//
// ## 解析逻辑（How）
// - 装配期：`place` 写入位置信息，`set_next` 把下游上下文导出的 `Weak<dyn Link<_>>` 以
//   `Box<dyn Any>` 形式取回并按本 Handler 的输出类型向下转型，转型失败即类型不一致；
// - 调度期：`receive` 先把指向 Pipeline 的弱引用升级为强引用作为守卫，再调用 Handler；
//   `forward` 升级下游弱引用并同步调用其 `receive`，没有下游时丢弃消息并发出链尾通知。
//
// ## 契约（What）
// - `place` 与 `set_next` 各只生效一次，均发生在 Pipeline 发布之前；
// - `attach` 在已 attach 时为空操作，`detach` 在未 attach 时为空操作，钩子因此各触发一次。
use std::{
    any::{Any, TypeId},
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use spin::{Mutex, Once};

use crate::{
    config::NoticeLevel,
    error::{ChainError, Result},
    handler::{Handler, HandlerDescriptor, StageInfo},
    instrument::{self, EndOfChainObserver},
    pipeline::{PipelineCore, PipelineHandle, StageSnapshot},
    sealed::Sealed,
};

/// Handler 在 `process` 与生命周期钩子中看到的上下文。
///
/// # 契约说明（What）
/// - `forward`：把一条输出同步交给下一阶段，返回时该消息已走完剩余链路；
///   若当前为最后一个 Stage，消息被丢弃并发出链尾通知，返回 `Ok(())`；
/// - `stage`：当前 Stage 的位置信息；
/// - `has_next`：是否存在下游 Stage；
/// - `pipeline`：所属链路的类型擦除句柄，Stage 未 attach 或链路正在析构时为 `None`。
pub trait HandlerContext<Out>: Sealed {
    /// 向下游转发一条消息。
    fn forward(&self, msg: Out) -> Result<()>;

    /// 当前 Stage 的位置信息。
    fn stage(&self) -> &StageInfo;

    /// 是否存在下游 Stage。
    fn has_next(&self) -> bool;

    /// 升级指向所属链路的弱引用。
    fn pipeline(&self) -> Option<PipelineHandle>;
}

/// 上下文向上游暴露的最小转发能力：接受一个 `In`。
pub trait Link<In>: Send + Sync + Sealed {
    /// 接收上游转发的消息。
    fn receive(&self, msg: In) -> Result<()>;
}

/// 运行期类型标签，用于装配时比较相邻 Stage 的类型。
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: core::any::type_name::<T>(),
        }
    }

    /// 类型的完整路径名。
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// 所有 Stage 共享的调度设置，由配置与观察者在 `finalize` 时生成。
pub(crate) struct DispatchSettings {
    pub(crate) end_notice: NoticeLevel,
    pub(crate) stage_spans: bool,
    pub(crate) observer: Option<Arc<dyn EndOfChainObserver>>,
}

struct Placement {
    info: StageInfo,
    settings: Arc<DispatchSettings>,
}

struct AttachState {
    count: u64,
    pipeline: Weak<PipelineCore>,
}

#[derive(Default)]
struct StageCounters {
    received: AtomicU64,
    forwarded: AtomicU64,
    dropped_at_end: AtomicU64,
}

static UNPLACED: StageInfo = StageInfo::unplaced();

/// 类型擦除后的 Stage，供构建器与 Pipeline 核心以统一方式装配、attach 与快照。
pub(crate) trait ErasedStage: Send + Sync {
    fn descriptor(&self) -> &HandlerDescriptor;

    fn input_type(&self) -> TypeTag;

    fn output_type(&self) -> TypeTag;

    /// 导出 `Box<Weak<dyn Link<In>>>`，由上游按自身输出类型向下转型。
    fn inbound_link(self: Arc<Self>) -> Box<dyn Any>;

    fn place(&self, info: StageInfo, settings: Arc<DispatchSettings>);

    fn set_next(&self, next: Option<&Arc<dyn ErasedStage>>) -> Result<()>;

    fn attach(&self, pipeline: Weak<PipelineCore>);

    fn detach(&self);

    fn snapshot(&self) -> StageSnapshot;
}

/// 单个 Handler 的执行上下文，独占其 Handler。
pub(crate) struct StageContext<H: Handler> {
    handler: H,
    descriptor: HandlerDescriptor,
    placement: Once<Placement>,
    next: Once<Option<Weak<dyn Link<H::Out>>>>,
    attach: Mutex<AttachState>,
    counters: StageCounters,
}

impl<H: Handler> StageContext<H> {
    pub(crate) fn new(handler: H) -> Self {
        let descriptor = handler.describe();
        Self {
            handler,
            descriptor,
            placement: Once::new(),
            next: Once::new(),
            attach: Mutex::new(AttachState {
                count: 0,
                pipeline: Weak::new(),
            }),
            counters: StageCounters::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn attach_count(&self) -> u64 {
        self.attach.lock().count
    }

    /// 把指向 Pipeline 的弱引用升级为强引用，调度期间持有以阻止 Pipeline 被析构。
    fn pipeline_guard(&self) -> Option<Arc<PipelineCore>> {
        self.attach.lock().pipeline.upgrade()
    }

    fn next_link(&self) -> Option<Arc<dyn Link<H::Out>>> {
        self.next
            .get()
            .and_then(Option::as_ref)
            .and_then(Weak::upgrade)
    }

    fn settings(&self) -> Option<&DispatchSettings> {
        self.placement.get().map(|placement| placement.settings.as_ref())
    }
}

impl<H: Handler> HandlerContext<H::Out> for StageContext<H> {
    fn forward(&self, msg: H::Out) -> Result<()> {
        match self.next_link() {
            Some(next) => {
                self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
                next.receive(msg)
            }
            None => {
                self.counters.dropped_at_end.fetch_add(1, Ordering::Relaxed);
                if let Some(settings) = self.settings() {
                    instrument::notify_end_of_chain(self.stage(), settings, &msg);
                }
                Ok(())
            }
        }
    }

    fn stage(&self) -> &StageInfo {
        self.placement
            .get()
            .map(|placement| &placement.info)
            .unwrap_or(&UNPLACED)
    }

    fn has_next(&self) -> bool {
        matches!(self.next.get(), Some(Some(_)))
    }

    fn pipeline(&self) -> Option<PipelineHandle> {
        self.pipeline_guard().map(PipelineHandle::new)
    }
}

impl<H: Handler> Link<H::In> for StageContext<H> {
    fn receive(&self, msg: H::In) -> Result<()> {
        let _guard = self.pipeline_guard();
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let _span = self
            .placement
            .get()
            .filter(|placement| placement.settings.stage_spans)
            .map(|placement| instrument::stage_span(&placement.info).entered());
        self.handler.process(self, msg)
    }
}

impl<H: Handler> ErasedStage for StageContext<H> {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    fn input_type(&self) -> TypeTag {
        TypeTag::of::<H::In>()
    }

    fn output_type(&self) -> TypeTag {
        TypeTag::of::<H::Out>()
    }

    fn inbound_link(self: Arc<Self>) -> Box<dyn Any> {
        let link: Arc<dyn Link<H::In>> = self;
        Box::new(Arc::downgrade(&link))
    }

    fn place(&self, info: StageInfo, settings: Arc<DispatchSettings>) {
        self.placement.call_once(|| Placement { info, settings });
    }

    fn set_next(&self, next: Option<&Arc<dyn ErasedStage>>) -> Result<()> {
        let link = match next {
            None => None,
            Some(stage) => {
                let expected = stage.input_type();
                let exported = Arc::clone(stage).inbound_link();
                match exported.downcast::<Weak<dyn Link<H::Out>>>() {
                    Ok(link) => Some(*link),
                    Err(_) => {
                        return Err(ChainError::TypeMismatch {
                            handler: self.descriptor.label_cow(),
                            expected: expected.name(),
                            found: self.output_type().name(),
                        });
                    }
                }
            }
        };
        self.next.call_once(|| link);
        Ok(())
    }

    fn attach(&self, pipeline: Weak<PipelineCore>) {
        {
            let mut state = self.attach.lock();
            if state.count >= 1 {
                return;
            }
            state.count = 1;
            state.pipeline = pipeline;
        }
        self.handler.on_attach(self);
    }

    fn detach(&self) {
        if self.attach.lock().count == 0 {
            return;
        }
        self.handler.on_detach(self);
        let mut state = self.attach.lock();
        if state.count >= 1 {
            state.count -= 1;
        }
        state.pipeline = Weak::new();
    }

    fn snapshot(&self) -> StageSnapshot {
        let info = self.stage();
        StageSnapshot {
            index: info.index(),
            label: self.descriptor.label().to_owned(),
            handler_type: self.descriptor.type_name(),
            input_type: self.input_type().name(),
            output_type: self.output_type().name(),
            attached: self.attach.lock().count == 1,
            received: self.counters.received.load(Ordering::Relaxed),
            forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            dropped_at_end: self.counters.dropped_at_end.load(Ordering::Relaxed),
        }
    }
}
