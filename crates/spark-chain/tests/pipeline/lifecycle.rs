use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use spark_chain::{
    ChainError, Handler, HandlerContext, Pipeline, PipelineConfig, SharedHandler, StageInfo,
    error::codes,
};

use crate::support::{Journal, Logged, entries, journal, tail_collector};

/// 在生命周期钩子中记录位置信息的 Handler。
struct Hooks {
    name: &'static str,
    journal: Journal,
    stages: Arc<Mutex<Vec<StageInfo>>>,
}

impl Handler for Hooks {
    type In = u32;
    type Out = u32;

    fn process(&self, ctx: &dyn HandlerContext<u32>, input: u32) -> Result<(), ChainError> {
        ctx.forward(input)
    }

    fn on_attach(&self, ctx: &dyn HandlerContext<u32>) {
        self.stages
            .lock()
            .expect("stage lock")
            .push(ctx.stage().clone());
        self.journal
            .lock()
            .expect("journal lock")
            .push(format!("attach:{}:next={}", self.name, ctx.has_next()));
    }

    fn on_detach(&self, _ctx: &dyn HandlerContext<u32>) {
        self.journal
            .lock()
            .expect("journal lock")
            .push(format!("detach:{}", self.name));
    }
}

#[test]
fn hooks_see_their_final_position() {
    let log = journal();
    let stages = Arc::new(Mutex::new(Vec::new()));
    let hooks = |name| Hooks {
        name,
        journal: Arc::clone(&log),
        stages: Arc::clone(&stages),
    };

    let pipeline = Pipeline::builder()
        .with_config(PipelineConfig::default().with_label("hooks"))
        .add_back(hooks("first"))
        .add_back(hooks("last"))
        .finalize()
        .expect("相邻类型一致");

    assert_eq!(
        entries(&log),
        ["attach:last:next=false", "attach:first:next=true"]
    );
    let stages = stages.lock().expect("stage lock").clone();
    assert_eq!(stages[0].index(), 1);
    assert_eq!(stages[1].index(), 0);
    assert!(stages.iter().all(|stage| stage.pipeline() == "hooks"));
    assert!(stages.iter().all(|stage| stage.pipeline_id() == pipeline.id()));

    drop(pipeline);
    assert_eq!(entries(&log)[2..], ["detach:first", "detach:last"]);
}

/// 在 `on_attach` 中立即转发：下游已先行 attach，消息可以送达。
struct Greeter;

impl Handler for Greeter {
    type In = u32;
    type Out = u32;

    fn process(&self, ctx: &dyn HandlerContext<u32>, input: u32) -> Result<(), ChainError> {
        ctx.forward(input)
    }

    fn on_attach(&self, ctx: &dyn HandlerContext<u32>) {
        // 钩子无法返回错误；测试中的下游不会失败。
        let _ = ctx.forward(0);
    }
}

#[test]
fn forwarding_from_on_attach_reaches_attached_downstream() {
    let log = journal();
    let pipeline = Pipeline::builder()
        .add_back(Greeter)
        .add_back(Logged::<u32>::new("down", &log))
        .finalize()
        .expect("相邻类型一致");

    assert_eq!(entries(&log), ["down:0"]);
    pipeline.handle(9).expect("调度成功");
    assert_eq!(entries(&log), ["down:0", "down:9"]);
}

struct Counting {
    processed: AtomicUsize,
}

impl Handler for Counting {
    type In = u32;
    type Out = u32;

    fn process(&self, ctx: &dyn HandlerContext<u32>, input: u32) -> Result<(), ChainError> {
        self.processed.fetch_add(1, Ordering::SeqCst);
        ctx.forward(input)
    }
}

#[test]
fn shared_handler_tracks_attachment_across_pipelines() {
    let shared = SharedHandler::new(Counting {
        processed: AtomicUsize::new(0),
    });

    let first = Pipeline::builder()
        .with_config(PipelineConfig::default().with_label("first"))
        .add_back_shared(Arc::clone(&shared))
        .finalize()
        .expect("单个 Stage 即可封装");
    assert_eq!(shared.context().map(|stage| stage.pipeline().to_owned()).as_deref(), Some("first"));

    let second = Pipeline::builder()
        .add_back_shared(Arc::clone(&shared))
        .finalize()
        .expect("单个 Stage 即可封装");
    assert_eq!(shared.attach_count(), 2);
    assert!(shared.context().is_none());

    first.handle(1).expect("调度成功");
    second.handle(2).expect("调度成功");
    assert_eq!(shared.processed.load(Ordering::SeqCst), 2);

    drop(first);
    assert_eq!(shared.attach_count(), 1);
    assert!(shared.context().is_none(), "计数回落不会恢复 Stage 信息");

    drop(second);
    assert_eq!(shared.attach_count(), 0);
}

/// 调度过程中释放唯一的外部句柄：弱句柄调度不持有链路，此后链路只由 Stage 的调度守卫保活。
struct Releaser {
    slot: Arc<Mutex<Option<Pipeline<u32, u32>>>>,
    detached: Arc<AtomicUsize>,
    observed: Journal,
}

impl Handler for Releaser {
    type In = u32;
    type Out = u32;

    fn process(&self, ctx: &dyn HandlerContext<u32>, input: u32) -> Result<(), ChainError> {
        let released = self.slot.lock().expect("slot lock").take();
        assert!(released.is_some(), "外部句柄应仍在槽位中");
        drop(released);

        let label = ctx
            .pipeline()
            .map(|pipeline| pipeline.label().to_owned())
            .unwrap_or_else(|| String::from("<gone>"));
        self.observed.lock().expect("journal lock").push(format!(
            "released:{label}:detached={}",
            self.detached.load(Ordering::SeqCst)
        ));
        ctx.forward(input)
    }
}

struct DetachCounter {
    detached: Arc<AtomicUsize>,
    observed: Journal,
}

impl Handler for DetachCounter {
    type In = u32;
    type Out = u32;

    fn process(&self, ctx: &dyn HandlerContext<u32>, input: u32) -> Result<(), ChainError> {
        self.observed.lock().expect("journal lock").push(format!(
            "downstream:{input}:detached={}",
            self.detached.load(Ordering::SeqCst)
        ));
        ctx.forward(input)
    }

    fn on_detach(&self, _ctx: &dyn HandlerContext<u32>) {
        self.detached.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn releasing_during_dispatch_defers_teardown() {
    let slot = Arc::new(Mutex::new(None));
    let detached = Arc::new(AtomicUsize::new(0));
    let observed = journal();
    let (tail, observer) = tail_collector::<u32>();

    let pipeline = Pipeline::builder()
        .with_config(PipelineConfig::default().with_label("releasing"))
        .with_observer(observer)
        .add_back(Releaser {
            slot: Arc::clone(&slot),
            detached: Arc::clone(&detached),
            observed: Arc::clone(&observed),
        })
        .add_back(DetachCounter {
            detached: Arc::clone(&detached),
            observed: Arc::clone(&observed),
        })
        .finalize()
        .expect("相邻类型一致");
    let weak = pipeline.downgrade();
    *slot.lock().expect("slot lock") = Some(pipeline);

    weak.handle(6).expect("调度期间释放不影响本次调度");

    assert_eq!(
        entries(&observed),
        ["released:releasing:detached=0", "downstream:6:detached=0"],
        "返回前链路仍存活，下游照常收到消息"
    );
    assert_eq!(*tail.lock().expect("tail lock"), [6]);
    assert_eq!(detached.load(Ordering::SeqCst), 1, "调度返回后完成 detach");
    assert!(weak.upgrade().is_none());

    let err = weak.handle(7).expect_err("链路已释放");
    assert_eq!(err.code(), codes::RELEASED);
}
