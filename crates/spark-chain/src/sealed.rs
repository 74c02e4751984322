//! 内部 sealed 模块用于控制外部扩展边界。
//!
//! # 逻辑解析（How）
//! - 定义私有 Trait `Sealed`，并对所有类型提供 blanket 实现；
//! - [`HandlerContext`](crate::HandlerContext) 与 [`Link`](crate::Link) 通过 `: Sealed` 间接依赖该标记，
//!   后续为它们增加方法时无需顾虑下游实现。
//!
//! # 契约说明（What）
//! - `Sealed` 无需调用方显式实现；任意类型默认满足该约束。
//! - 若未来收紧 blanket 实现条件，需要同步发布兼容性公告。
pub(crate) trait Sealed {}

impl<T: ?Sized> Sealed for T {}
