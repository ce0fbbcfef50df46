//! 分批调度器 - 编排层
//!
//! ## 职责
//!
//! 把 N 个条目切成每批最多 `batch_size` 个，批与批之间严格串行，
//! 批内用 Semaphore 限制最多 `concurrency` 个条目同时执行。
//!
//! ## 设计特点
//!
//! - **失败隔离**：单个条目的错误或 panic 只变成该条目的错误结果
//! - **结果完整**：返回值与输入一一对应，顺序与输入一致
//! - **参数由调用方给出**：每次调用单独指定，不读全局配置

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

use crate::config::Config;
use crate::error::{ControlError, ControlResult};
use crate::utils::logging::{log_batch_complete, log_batch_start};

/// 分批参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchParams {
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for BatchParams {
    fn default() -> Self {
        Self {
            batch_size: 3,
            concurrency: 2,
        }
    }
}

impl BatchParams {
    /// 两个参数都至少为 1
    pub fn new(batch_size: usize, concurrency: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.batch_size, config.intra_batch_concurrency)
    }

    /// 条目数对应的批次数
    pub fn batch_count(&self, total: usize) -> usize {
        (total + self.batch_size - 1) / self.batch_size
    }
}

/// 分批执行
///
/// `worker` 接收条目下标（从 0 开始）和条目本身。返回的结果列表长度总是等于
/// `items.len()`，第 i 项对应第 i 个条目。
pub async fn run_batched<I, T, F, Fut>(items: Vec<I>, params: BatchParams, mut worker: F) -> Vec<ControlResult<T>>
where
    I: Send + 'static,
    T: Send + 'static,
    F: FnMut(usize, I) -> Fut,
    Fut: Future<Output = ControlResult<T>> + Send + 'static,
{
    let params = BatchParams::new(params.batch_size, params.concurrency);
    let total = items.len();
    let total_batches = params.batch_count(total);

    let mut results: Vec<Option<ControlResult<T>>> = (0..total).map(|_| None).collect();
    let mut remaining = items.into_iter().enumerate();

    for batch_num in 1..=total_batches {
        let batch: Vec<(usize, I)> = remaining.by_ref().take(params.batch_size).collect();
        let (first, last) = match (batch.first(), batch.last()) {
            (Some((first, _)), Some((last, _))) => (*first, *last),
            _ => break,
        };
        log_batch_start(batch_num, total_batches, first + 1, last + 1, total);

        let semaphore = Arc::new(Semaphore::new(params.concurrency));
        let mut tasks = JoinSet::new();

        for (index, item) in batch {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    results[index] = Some(Err(ControlError::Worker(e.to_string())));
                    continue;
                }
            };

            let fut = worker(index, item);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(fut).catch_unwind().await;
                (index, outcome)
            });
        }

        // 等待本批所有条目完成
        let mut success = 0;
        let mut finished = 0;
        while let Some(joined) = tasks.join_next().await {
            finished += 1;
            match joined {
                Ok((index, Ok(result))) => {
                    if result.is_ok() {
                        success += 1;
                    }
                    results[index] = Some(result);
                }
                Ok((index, Err(_panic))) => {
                    error!("[批次] 条目 {} 执行时 panic", index + 1);
                    results[index] = Some(Err(ControlError::Worker("条目执行时 panic".to_string())));
                }
                Err(e) => error!("[批次] 条目任务异常结束: {}", e),
            }
        }

        log_batch_complete(batch_num, success, finished);
    }

    results
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(ControlError::Worker("条目未返回结果".to_string()))))
        .collect()
}
