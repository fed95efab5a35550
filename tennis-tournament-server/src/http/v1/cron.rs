use hyper::Method;
use tennis_tournament_api::settle::ReconcileResponse;

use crate::auth;
use crate::http::{Request, RequestUri, Response, Result, StatusCodeError};
use crate::method;
use crate::settlement::SettlementError;

/// Header carrying the scheduler's shared secret.
const CRON_SECRET_HEADER: &str = "x-cron-secret";

pub async fn route(req: Request, mut uri: RequestUri<'_>) -> Result {
    match (uri.take_str(), uri.is_empty()) {
        (Some("rankings"), true) => method!(req, {
            Method::GET => rankings(req).await,
            Method::POST => rankings(req).await,
        }),
        _ => Err(StatusCodeError::not_found().into()),
    }
}

async fn rankings(req: Request) -> Result {
    let state = req.state();

    let secret = req
        .headers()
        .get(CRON_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .or_else(|| req.query("secret"));

    auth::verify_secret(&state.config.cron.secret, secret).map_err(SettlementError::from)?;

    let report = state.reconciler.run().await?;

    #[cfg(feature = "metrics")]
    state
        .metrics
        .reconciled_matches_total
        .add(report.processed as usize);

    Ok(Response::ok().json(&ReconcileResponse {
        success: true,
        message: format!(
            "Ratings reconciled: {} matches processed, {} players updated",
            report.processed, report.players_updated
        ),
        report,
    }))
}
