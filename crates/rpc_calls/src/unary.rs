use std::future::Future;

use tonic::Status;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::deadline::Deadline;
use crate::error::CallError;

/// Drive a unary exchange: one request already handed to `call`, exactly one
/// response or a classified error, never later than `deadline`.
pub async fn invoke<Resp, F>(deadline: Deadline, call: F) -> Result<Resp, CallError>
where
    F: Future<Output = Result<Resp, Status>>,
{
    let call_id = Uuid::new_v4();
    debug!(call_id = %call_id, timeout = ?deadline.remaining(), "Unary call started");

    let result = deadline
        .run(async { call.await.map_err(CallError::from) })
        .await;

    match &result {
        Ok(_) => debug!(call_id = %call_id, "Unary call completed"),
        Err(e) => warn!(call_id = %call_id, error = %e, "Unary call failed"),
    }

    result
}
