//! Reads transaction commands line by line and totally-ordered multicasts
//! them to the group.

use {
    crate::{error::Result, transaction::Transaction},
    groupcast_multicast::TotalOrderMulticast,
    log::{debug, info, warn},
    std::sync::Arc,
    tokio::io::{AsyncBufRead, AsyncBufReadExt},
};

/// Submit every valid command read from `reader` until EOF.
///
/// Malformed lines are logged and skipped. Returns the number of submitted
/// transactions.
pub async fn run_input<R>(reader: R, group: Arc<TotalOrderMulticast>) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut submitted: usize = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let transaction = match line.parse::<Transaction>() {
            Ok(transaction) => transaction,
            Err(e) => {
                warn!("encode input msg failed with err: {}, skip", e);
                continue;
            }
        };
        let msg_id = group
            .multicast(transaction.path(), transaction.encode()?)
            .await?;
        debug!("submitted [{}] as {}", transaction, msg_id);
        submitted = submitted.saturating_add(1);
    }
    info!("input reach EOF after {} transactions", submitted);
    Ok(submitted)
}
