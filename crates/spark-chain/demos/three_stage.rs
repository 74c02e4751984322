//! 三段责任链演示：`i32 -> String -> String -> String`。
//!
//! 运行：`RUST_LOG=spark_chain=debug cargo run -p spark-chain --example three_stage`

use spark_chain::{
    ChainError, EndOfChainNotice, Handler, HandlerContext, NoticeLevel, Pipeline, PipelineConfig,
};
use tracing_subscriber::EnvFilter;

struct Render;

impl Handler for Render {
    type In = i32;
    type Out = String;

    fn process(&self, ctx: &dyn HandlerContext<String>, input: i32) -> Result<(), ChainError> {
        ctx.forward(input.to_string())
    }
}

struct Suffix(&'static str);

impl Handler for Suffix {
    type In = String;
    type Out = String;

    fn process(&self, ctx: &dyn HandlerContext<String>, input: String) -> Result<(), ChainError> {
        ctx.forward(format!("{input} {}", self.0))
    }
}

fn main() -> Result<(), ChainError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let pipeline = Pipeline::builder()
        .with_config(
            PipelineConfig::default()
                .with_label("three-stage")
                .with_end_notice(NoticeLevel::Info)
                .with_stage_spans(true),
        )
        .with_observer(|notice: &EndOfChainNotice<'_>| {
            if let Some(text) = notice.downcast_ref::<String>() {
                println!("stage {} produced {text:?}", notice.stage.index());
            }
        })
        .add_back(Render)
        .add_back(Suffix("H2"))
        .add_back(Suffix("H3"))
        .finalize()?;

    for value in [2, 40] {
        pipeline.handle(value)?;
    }
    for stage in pipeline.snapshot() {
        println!(
            "#{} {:<8} {} -> {} received={} forwarded={}",
            stage.index,
            stage.label,
            stage.input_type,
            stage.output_type,
            stage.received,
            stage.forwarded
        );
    }
    Ok(())
}
