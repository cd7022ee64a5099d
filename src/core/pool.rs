//! 有界并发执行器
//!
//! 每个条目在独立的阻塞线程上执行，信号量限制同时进行的 IO 数量。

use crate::error::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// 对 `0..count` 中的每个下标执行 `work`，结果按下标顺序返回
pub async fn map_blocking<T, F>(count: usize, max_concurrent: usize, work: F) -> Result<Vec<T>>
where
    T: Send + 'static,
    F: Fn(usize) -> T + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let work = Arc::new(work);
    let mut handles = Vec::with_capacity(count);

    for index in 0..count {
        let permit = semaphore.clone().acquire_owned().await?;
        let work = work.clone();

        handles.push(tokio::task::spawn_blocking(move || {
            let result = work(index);
            drop(permit);
            result
        }));
    }

    let mut results = Vec::with_capacity(count);
    for handle in handles {
        results.push(handle.await?);
    }

    Ok(results)
}

/// 第 `done` 个条目完成后是否输出控制台报告
///
/// 每个阶段最多输出约 `report_count` 次；条目数少于报告次数时每次都输出。
pub fn should_report(done: usize, total: usize, report_count: usize) -> bool {
    let threshold = total.checked_div(report_count).unwrap_or(0);
    threshold == 0 || done % threshold == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_results_follow_index_order() {
        let results = map_blocking(50, 4, |i| i * 2).await.unwrap();
        assert_eq!(results, (0..50).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (running.clone(), peak.clone());

        map_blocking(32, 3, move |_| {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            r.fetch_sub(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_range() {
        let results: Vec<u8> = map_blocking(0, 4, |_| 1).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_report_threshold() {
        // 1000 个条目、报告 100 次：每 10 个报告一次
        assert!(should_report(10, 1000, 100));
        assert!(!should_report(11, 1000, 100));
        // 条目少于报告次数：每个都报告
        assert!(should_report(1, 5, 100));
        assert!(should_report(3, 5, 100));
        // 报告次数为 0：每个都报告
        assert!(should_report(7, 50, 0));
    }
}
