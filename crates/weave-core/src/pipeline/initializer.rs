use std::sync::Arc;

use tracing::debug;

use crate::channel::Channel;

use super::{Handler, HandlerContext};

/// 注册时为通道装配 Handler，完成后把自己移出流水线。
///
/// # 教案式说明
/// - **意图（Why）**：`ServerBootstrap` 的子 Handler 是所有子通道共享的同一个实例；带私有状态的
///   Handler（例如解码缓冲）需要每个通道一份，因此在 `registered` 时按通道构造。
/// - **逻辑（How）**：执行初始化闭包 → 按名称移除自身 → 在新链路上从原前驱继续传播 `registered`，
///   让刚加入的 Handler 也能收到该事件。
/// - **契约（What）**：闭包应通过 `channel.pipeline().add_last(..)` 等方法追加 Handler。
pub struct ChannelInitializer<F> {
    init: F,
}

impl<F> ChannelInitializer<F>
where
    F: Fn(&Arc<Channel>) + Send + Sync + 'static,
{
    /// 用初始化闭包构造。
    pub fn new(init: F) -> Self {
        Self { init }
    }
}

impl<F> Handler for ChannelInitializer<F>
where
    F: Fn(&Arc<Channel>) + Send + Sync + 'static,
{
    fn registered(&self, ctx: &HandlerContext) {
        let Some(channel) = ctx.channel() else {
            ctx.fire_registered();
            return;
        };
        (self.init)(&channel);
        let pipeline = ctx.pipeline();
        pipeline.remove_by_name(ctx.name());
        debug!(channel = channel.id(), "channel initialized");

        // 变更后的链路里，原前驱之后紧跟着新加入的 Handler。
        match ctx.prev().and_then(|prev| pipeline.context(prev.name())) {
            Some(resume) => resume.fire_registered(),
            None => ctx.fire_registered(),
        }
    }
}
