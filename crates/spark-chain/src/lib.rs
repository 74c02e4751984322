#![deny(unsafe_code)]
#![allow(private_bounds)]

//! `spark-chain` 提供类型检查的同步 Handler 责任链。
//!
//! # 教案式说明
//! - **意图（Why）**：把“逐级处理一条消息”的流程拆成若干独立的 [`Handler`]，每个 Handler 只声明
//!   自己接收的 `In` 与转发的 `Out`，由责任链负责相邻 Stage 的连接、类型校验与生命周期通知。
//! - **逻辑（How）**：
//!   1. 通过 [`Pipeline::builder`]（编译期校验）或 [`Pipeline::create`]（运行期校验）追加 Handler；
//!   2. `finalize` 校验类型、正向连接各 Stage，并按从后到前的顺序触发 `on_attach`；
//!   3. [`Pipeline::handle`] 在调用线程上同步驱动整条链路，Handler 通过
//!      [`HandlerContext::forward`] 把输出交给下一阶段；
//!   4. 最后一个强句柄释放时按从前到后的顺序触发 `on_detach`。
//! - **契约（What）**：
//!   - 一次 `forward` 返回时，该消息已走完剩余链路；
//!   - 消息到达最后一个 Stage 后被丢弃，仅产生链尾通知（日志 + [`EndOfChainObserver`]），不视为错误；
//!   - Handler 返回的错误原样传播到 `handle` 的调用方。
//! - **风险与权衡（Trade-offs）**：责任链不提供排队、背压或跨线程调度；链路深度即调用栈深度。
//!
//! ```rust
//! use spark_chain::{ChainError, EndOfChainNotice, Handler, HandlerContext, Pipeline};
//! use std::sync::{Arc, Mutex};
//!
//! struct Render;
//! impl Handler for Render {
//!     type In = i32;
//!     type Out = String;
//!     fn process(&self, ctx: &dyn HandlerContext<String>, input: i32) -> Result<(), ChainError> {
//!         ctx.forward(input.to_string())
//!     }
//! }
//!
//! struct Suffix(&'static str);
//! impl Handler for Suffix {
//!     type In = String;
//!     type Out = String;
//!     fn process(&self, ctx: &dyn HandlerContext<String>, input: String) -> Result<(), ChainError> {
//!         ctx.forward(format!("{input} {}", self.0))
//!     }
//! }
//!
//! let tail = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&tail);
//! let pipeline = Pipeline::builder()
//!     .with_observer(move |notice: &EndOfChainNotice<'_>| {
//!         if let Some(text) = notice.downcast_ref::<String>() {
//!             sink.lock().unwrap().push(text.clone());
//!         }
//!     })
//!     .add_back(Render)
//!     .add_back(Suffix("H2"))
//!     .add_back(Suffix("H3"))
//!     .finalize()?;
//!
//! pipeline.handle(2)?;
//! assert_eq!(*tail.lock().unwrap(), ["2 H2 H3"]);
//! # Ok::<(), ChainError>(())
//! ```

mod builder;
mod config;
mod context;
pub mod error;
mod handler;
mod instrument;
mod pipeline;
mod sealed;

pub use builder::{DynPipelineBuilder, EmptyBuilder, PipelineBuilder};
pub use config::{NoticeLevel, PipelineConfig};
pub use context::{HandlerContext, Link, TypeTag};
pub use error::{Boundary, ChainError, Result};
pub use handler::{Handler, HandlerDescriptor, SharedHandler, StageInfo};
pub use instrument::{EndOfChainNotice, EndOfChainObserver};
pub use pipeline::{Pipeline, PipelineHandle, StageSnapshot, WeakPipeline};
