//! 重试调度器（RetryScheduler）
//!
//! 每次 `tick`：
//! - 按消费组认领到期（RETRYING 且 `next_retry_time <= now`）记录，最多 `batch_size` 条；
//! - 批次未满时再认领滞留记录：已登记为 CREATED、超过 `stranded_grace` 仍未开始首次
//!   尝试的事件（例如总线丢失了它）；
//! - 由记录的载荷原文与类型符号重建事件，在记录的 trace id 下以重试身份重新分发；
//!   无法重建的记录写为 FAILED，不再被扫描；
//! - 以 `replay_concurrency` 为上限并发执行整批重放，并等待全部完成后返回。
//!
//! 同一记录的并发认领由存储层的租约保证互斥，调度器本身不加锁。
//!
use super::dispatcher::{DispatchOutcome, EventDispatcher};
use crate::context::ExecutionContext;
use crate::error::{DomainError, DomainResult};
use crate::persist::{Claim, ConsumeRecord, ConsumeStatus};
use bon::Builder;
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::{StreamExt, stream};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// 调度器配置
#[derive(Clone, Copy, Debug)]
pub struct RetrySchedulerConfig {
    /// 单次扫描的最大记录数
    pub batch_size: usize,
    /// 单批重放的并发上限
    pub replay_concurrency: usize,
    /// CREATED 记录超过该时长仍未开始尝试即视为滞留
    pub stranded_grace: Duration,
}

impl Default for RetrySchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            replay_concurrency: 256,
            stranded_grace: Duration::from_secs(30),
        }
    }
}

/// 一次 tick 的汇总
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// 本次认领的记录数（到期与滞留）
    pub fetched: usize,
    pub succeeded: usize,
    pub retrying: usize,
    pub failed: usize,
    pub skipped: usize,
    pub dropped: usize,
    pub ignored: usize,
    pub store_unavailable: usize,
    /// 重放任务异常终止，或扫描本身失败
    pub aborted: usize,
}

impl TickReport {
    fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Succeeded => self.succeeded += 1,
            DispatchOutcome::Retrying { .. } => self.retrying += 1,
            DispatchOutcome::Failed => self.failed += 1,
            DispatchOutcome::Skipped(_) => self.skipped += 1,
            DispatchOutcome::Dropped => self.dropped += 1,
            DispatchOutcome::Ignored => self.ignored += 1,
            DispatchOutcome::StoreUnavailable => self.store_unavailable += 1,
            DispatchOutcome::Aborted => self.aborted += 1,
        }
    }

    /// 已完成重放的记录数
    pub fn completed(&self) -> usize {
        self.succeeded
            + self.retrying
            + self.failed
            + self.skipped
            + self.dropped
            + self.ignored
            + self.store_unavailable
            + self.aborted
    }
}

impl FromIterator<DispatchOutcome> for TickReport {
    fn from_iter<I: IntoIterator<Item = DispatchOutcome>>(iter: I) -> Self {
        let mut report = TickReport::default();
        for outcome in iter {
            report.fetched += 1;
            report.record(&outcome);
        }
        report
    }
}

#[derive(Builder)]
pub struct RetryScheduler {
    dispatcher: Arc<EventDispatcher>,
    #[builder(default)]
    config: RetrySchedulerConfig,
}

impl RetryScheduler {
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &RetrySchedulerConfig {
        &self.config
    }

    /// 扫描并重放一批到期与滞留记录，等待整批完成
    pub async fn tick(&self) -> TickReport {
        let group = self.dispatcher.consumer_group().to_string();
        let span = info_span!("retry_tick", consumer_group = %group);

        async {
            let store = self.dispatcher.store();
            let batch_size = self.config.batch_size;

            let mut records = match store.find_due_for_retry(&group, batch_size).await {
                Ok(records) => records,
                Err(err) => {
                    error!(error = %err, "failed to query due consume records");
                    return TickReport {
                        aborted: 1,
                        ..Default::default()
                    };
                }
            };

            let mut scan_failures = 0;
            let room = batch_size.saturating_sub(records.len());
            if room > 0 {
                let cutoff = self.stranded_cutoff(Utc::now());
                match store.find_stranded(&group, cutoff, room).await {
                    Ok(stranded) => {
                        if !stranded.is_empty() {
                            warn!(count = stranded.len(), "claimed stranded consume records");
                        }
                        records.extend(stranded);
                    }
                    Err(err) => {
                        error!(error = %err, "failed to query stranded consume records");
                        scan_failures = 1;
                    }
                }
            }

            if records.is_empty() {
                debug!("no consume records due for retry");
                return TickReport {
                    aborted: scan_failures,
                    ..Default::default()
                };
            }

            let fetched = records.len();
            info!(fetched, "replaying due consume records");

            let mut report: TickReport = stream::iter(records)
                .map(|record| self.replay_record(record))
                .buffer_unordered(self.config.replay_concurrency.max(1))
                .collect::<Vec<_>>()
                .await
                .into_iter()
                .collect();
            report.aborted += scan_failures;

            info!(
                fetched = report.fetched,
                succeeded = report.succeeded,
                retrying = report.retrying,
                failed = report.failed,
                aborted = report.aborted,
                "retry tick finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    /// 立即重放指定事件在本消费组下的记录
    ///
    /// 不检查 `next_retry_time`；终态、PROCESSING 或租约被他方持有的记录返回 `Skipped`。
    pub async fn replay(&self, event_id: &str) -> DomainResult<DispatchOutcome> {
        let group = self.dispatcher.consumer_group();
        let claim = self
            .dispatcher
            .store()
            .claim(
                event_id,
                group,
                &[ConsumeStatus::Created, ConsumeStatus::Retrying],
            )
            .await?;

        let record = match claim {
            Claim::Claimed(record) => record,
            Claim::Busy(record) => {
                debug!(
                    event_id,
                    status = %record.status(),
                    lease_until = ?record.lease_until(),
                    "consume record not claimable, skipping replay"
                );
                return Ok(DispatchOutcome::Skipped(record.status()));
            }
            Claim::Vacant => {
                return Err(DomainError::NotFound {
                    reason: format!("consume record: event_id={event_id}, consumer_group={group}"),
                });
            }
        };

        let event = match self.dispatcher.registry().rehydrate(&record) {
            Ok(event) => event,
            Err(err) => return Ok(self.discard_unreadable(record, err).await),
        };
        let context = record_context(&record);
        Ok(context
            .call(self.dispatcher.dispatch_claimed(&event, record))
            .await)
    }

    /// 在独立任务中重放单条已认领的记录，任务 panic 计为 `Aborted`
    async fn replay_record(&self, record: ConsumeRecord) -> DispatchOutcome {
        let event = match self.dispatcher.registry().rehydrate(&record) {
            Ok(event) => event,
            Err(err) => return self.discard_unreadable(record, err).await,
        };

        let event_id = record.event_id().to_string();
        let context = record_context(&record);
        let dispatcher = self.dispatcher.clone();
        let task = tokio::spawn(
            context.scope(async move { dispatcher.dispatch_claimed(&event, record).await }),
        );

        match task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(event_id, error = %err, "replay task aborted");
                DispatchOutcome::Aborted
            }
        }
    }

    /// 无法重建的记录计一次尝试并写为 FAILED
    async fn discard_unreadable(
        &self,
        mut record: ConsumeRecord,
        err: DomainError,
    ) -> DispatchOutcome {
        warn!(
            event_id = record.event_id(),
            event_type = record.event_type(),
            error = %err,
            "cannot rehydrate consume record, marking failed"
        );

        let message = format!("cannot rehydrate event: {err}");
        if let Err(err) = record
            .start_attempt()
            .and_then(|()| record.mark_failed(message))
        {
            error!(
                event_id = record.event_id(),
                error = %err,
                "failed to settle unreadable record"
            );
            return DispatchOutcome::Dropped;
        }

        match self.dispatcher.store().upsert(&record).await {
            Ok(()) => DispatchOutcome::Dropped,
            Err(err) => {
                error!(
                    event_id = record.event_id(),
                    error = %err,
                    "failed to persist unreadable record"
                );
                DispatchOutcome::StoreUnavailable
            }
        }
    }

    fn stranded_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.config.stranded_grace)
            .ok()
            .and_then(|grace| now.checked_sub_signed(grace))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

fn record_context(record: &ConsumeRecord) -> ExecutionContext {
    ExecutionContext::builder()
        .maybe_trace_id(record.trace_id())
        .build()
}
