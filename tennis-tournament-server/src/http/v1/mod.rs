mod cron;
mod matches;
mod settle;

use crate::http::{Request, RequestUri, Result, StatusCodeError};

pub async fn route(req: Request, mut uri: RequestUri<'_>) -> Result {
    match uri.take_str() {
        Some("settleMatch") => settle::route(req, uri).await,
        Some("matches") => matches::route(req, uri).await,
        Some("cron") => cron::route(req, uri).await,
        _ => Err(StatusCodeError::not_found().into()),
    }
}
