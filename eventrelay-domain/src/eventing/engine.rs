//! 分发引擎（DispatchEngine）
//!
//! 统一编排两条长驻任务：
//! - 监听：订阅总线信封流，在信封携带的上下文中首次分发（`is_retry = false`），
//!   并发受信号量约束；
//! - 重试：按固定间隔调用 `RetryScheduler::tick`，错过的节拍直接跳过，同一引擎内的 tick 不会重叠。
//!
//! `EngineHandle` 用于关闭与等待；关闭时监听任务会等待已接收事件分发完成。
//!
use super::{EventBus, EventDispatcher, RetryScheduler};
use crate::event::EventEnvelope;
use bon::Builder;
use futures_util::StreamExt;
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Builder)]
pub struct DispatchEngine {
    event_bus: Arc<dyn EventBus>,
    scheduler: Arc<RetryScheduler>,
    #[builder(default)]
    config: DispatchEngineConfig,
}

impl DispatchEngine {
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        self.scheduler.dispatcher()
    }

    pub fn scheduler(&self) -> &Arc<RetryScheduler> {
        &self.scheduler
    }

    /// 启动引擎，返回可用于关闭/等待的句柄
    pub fn start(self: Arc<Self>) -> EngineHandle {
        let token = CancellationToken::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(2);

        // retry worker（周期任务）
        {
            let scheduler = self.scheduler.clone();
            let interval = self.config.retry_interval;

            tasks.push(Self::spawn_periodic(token.clone(), interval, move || {
                let scheduler = scheduler.clone();
                async move {
                    scheduler.tick().await;
                }
            }));
        }

        // listen worker（长循环）
        tasks.push(tokio::spawn(Self::listen_loop(self.clone(), token.clone())));

        info!(
            consumer_group = self.dispatcher().consumer_group(),
            retry_interval = ?self.config.retry_interval,
            "dispatch engine started"
        );
        EngineHandle { token, tasks }
    }

    fn spawn_periodic<F, Fut>(
        token: CancellationToken,
        interval: Duration,
        mut f: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
        })
    }

    async fn listen_loop(self: Arc<Self>, token: CancellationToken) {
        let mut stream = self.event_bus.subscribe().await;
        let permits = Arc::new(Semaphore::new(self.config.listener_concurrency.max(1)));
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    break;
                }
                maybe_envelope = stream.next() => {
                    match maybe_envelope {
                        Some(Ok(envelope)) => {
                            let permit = tokio::select! {
                                _ = token.cancelled() => break,
                                permit = permits.clone().acquire_owned() => permit,
                            };
                            let Ok(permit) = permit else { break };

                            let dispatcher = self.dispatcher().clone();
                            in_flight.spawn(async move {
                                let _permit = permit;
                                Self::dispatch_envelope(&dispatcher, envelope).await;
                            });
                            while in_flight.try_join_next().is_some() {}
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "event bus stream error");
                        }
                        None => {
                            debug!("event bus stream closed");
                            break;
                        }
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "dispatch task aborted");
            }
        }
        info!("dispatch engine listener stopped");
    }

    async fn dispatch_envelope(dispatcher: &EventDispatcher, envelope: EventEnvelope) {
        let EventEnvelope { event, context } = envelope;
        context.call(dispatcher.dispatch(&event, false)).await;
    }
}

/// 分发引擎配置
#[derive(Clone, Copy, Debug)]
pub struct DispatchEngineConfig {
    /// 重试调度的触发间隔
    pub retry_interval: Duration,
    /// 监听侧同时分发的事件数上限
    pub listener_concurrency: usize,
}

impl Default for DispatchEngineConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(60),
            listener_concurrency: 64,
        }
    }
}

/// 引擎运行句柄：用于优雅关闭与等待任务结束
pub struct EngineHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            if let Err(err) = t.await {
                error!(error = %err, "dispatch engine task aborted");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
