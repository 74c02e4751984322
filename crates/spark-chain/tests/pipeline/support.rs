//! 集成测试共用的 Handler 与工具函数。

use std::{
    fmt::Debug,
    marker::PhantomData,
    sync::{Arc, Mutex},
};

use spark_chain::{ChainError, EndOfChainNotice, EndOfChainObserver, Handler, HandlerContext};

/// 共享事件日志，记录 `"<stage>:<value>"` 形式的条目。
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().expect("journal lock").clone()
}

/// 安装输出到测试捕获区的 fmt 订阅者，重复调用无副作用。
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// 收集链尾被丢弃的 `T`。
pub fn tail_collector<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl EndOfChainObserver) {
    let tail = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&tail);
    let observer = move |notice: &EndOfChainNotice<'_>| {
        if let Some(value) = notice.downcast_ref::<T>() {
            sink.lock().expect("tail lock").push(value.clone());
        }
    };
    (tail, observer)
}

/// `i32 -> String`。
pub struct Render;

impl Handler for Render {
    type In = i32;
    type Out = String;

    fn process(&self, ctx: &dyn HandlerContext<String>, input: i32) -> Result<(), ChainError> {
        ctx.forward(input.to_string())
    }
}

/// 在字符串末尾追加一个片段。
pub struct Suffix(pub &'static str);

impl Handler for Suffix {
    type In = String;
    type Out = String;

    fn process(&self, ctx: &dyn HandlerContext<String>, input: String) -> Result<(), ChainError> {
        ctx.forward(format!("{input} {}", self.0))
    }
}

/// 原样转发，并把收到的值写入事件日志。
pub struct Logged<T> {
    name: &'static str,
    journal: Journal,
    _value: PhantomData<fn(T)>,
}

impl<T> Logged<T> {
    pub fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: Arc::clone(journal),
            _value: PhantomData,
        }
    }
}

impl<T: Debug + Send + 'static> Handler for Logged<T> {
    type In = T;
    type Out = T;

    fn process(&self, ctx: &dyn HandlerContext<T>, input: T) -> Result<(), ChainError> {
        self.journal
            .lock()
            .expect("journal lock")
            .push(format!("{}:{input:?}", self.name));
        ctx.forward(input)
    }
}

/// 每条输入向下游转发 `copies` 条：`input * 10 + i`。
pub struct Fanout {
    pub copies: u32,
}

impl Handler for Fanout {
    type In = u32;
    type Out = u32;

    fn process(&self, ctx: &dyn HandlerContext<u32>, input: u32) -> Result<(), ChainError> {
        for i in 0..self.copies {
            ctx.forward(input * 10 + i)?;
        }
        Ok(())
    }
}

/// 只转发偶数，奇数被吞掉。
pub struct EvenOnly;

impl Handler for EvenOnly {
    type In = u32;
    type Out = u32;

    fn process(&self, ctx: &dyn HandlerContext<u32>, input: u32) -> Result<(), ChainError> {
        if input % 2 == 0 {
            ctx.forward(input)
        } else {
            Ok(())
        }
    }
}

/// 加上固定偏移。
pub struct Offset(pub u32);

impl Handler for Offset {
    type In = u32;
    type Out = u32;

    fn process(&self, ctx: &dyn HandlerContext<u32>, input: u32) -> Result<(), ChainError> {
        ctx.forward(input.wrapping_add(self.0))
    }
}

/// 遇到 `poison` 时返回错误，否则原样转发。
pub struct Reject {
    pub poison: u32,
}

impl Handler for Reject {
    type In = u32;
    type Out = u32;

    fn process(&self, ctx: &dyn HandlerContext<u32>, input: u32) -> Result<(), ChainError> {
        if input == self.poison {
            return Err(ChainError::handler("reject", format!("poisoned value {input}")));
        }
        ctx.forward(input)
    }
}
