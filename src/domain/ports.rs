use crate::domain::model::Row;
use crate::utils::error::Result;
use async_trait::async_trait;

/// 傳輸的寫入端。每次傳輸只使用一個 handler，它獨占下游資源
/// (HTTP 批次或開啟中的檔案)，並在 `complete` 中釋放。
#[async_trait]
pub trait RowHandler: Send {
    async fn process_row(&mut self, row: Row) -> Result<()>;

    /// 清空緩衝並釋放資源；每次傳輸恰好呼叫一次，失敗路徑也一樣
    async fn complete(&mut self) -> Result<()>;
}

/// 傳輸的讀取端：惰性地逐筆產生資料，`None` 代表已讀完
#[async_trait]
pub trait RowSource: Send {
    async fn next_row(&mut self) -> Result<Option<Row>>;
}
