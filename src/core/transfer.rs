use crate::domain::ports::{RowHandler, RowSource};
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1000;

/// 將 RowSource 的資料逐筆推進 RowHandler
///
/// 一次只處理一筆，處理完才讀下一筆。錯誤會中止傳輸但不回滾已寫入的資料。
pub struct TransferEngine {
    progress_interval: u64,
    monitor: SystemMonitor,
}

impl TransferEngine {
    pub fn new() -> Self {
        Self::new_with_monitoring(false)
    }

    pub fn new_with_monitoring(monitor_enabled: bool) -> Self {
        Self {
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    /// 傳輸到 source 讀完為止，回傳處理筆數。
    ///
    /// `sink.complete()` 不論成功或失敗都恰好呼叫一次；迴圈本身失敗時回傳迴圈的錯誤。
    pub async fn transfer(
        &self,
        source: &mut dyn RowSource,
        sink: &mut dyn RowHandler,
    ) -> Result<u64> {
        tracing::info!("Starting transfer...");
        self.monitor.log_stats("Transfer start");

        let outcome = self.pump(source, sink).await;
        let completion = sink.complete().await;

        match (outcome, completion) {
            (Ok(count), Ok(())) => {
                tracing::info!("Transfer completed: {} records", count);
                self.monitor.log_final_stats();
                Ok(count)
            }
            (Ok(count), Err(e)) => {
                tracing::error!("Finalizing sink failed after {} records: {}", count, e);
                Err(e)
            }
            (Err(e), Ok(())) => {
                tracing::error!("Transfer aborted: {}", e);
                Err(e)
            }
            (Err(e), Err(completion_error)) => {
                tracing::error!("Transfer aborted: {}", e);
                tracing::warn!("Finalizing sink also failed: {}", completion_error);
                Err(e)
            }
        }
    }

    async fn pump(&self, source: &mut dyn RowSource, sink: &mut dyn RowHandler) -> Result<u64> {
        let mut count = 0u64;
        while let Some(row) = source.next_row().await? {
            sink.process_row(row).await?;
            count += 1;

            if count % self.progress_interval == 0 {
                tracing::info!("Processed {} records", count);
                self.monitor.log_stats("Transfer progress");
            }
        }
        Ok(count)
    }
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new()
    }
}
