use hyper::Method;
use tennis_tournament_api::settle::{SettleMatchRequest, SettleResponse};

use crate::http::{Request, RequestUri, Response, Result, StatusCodeError};
use crate::method;
use crate::settlement::SettleMatch;
use crate::State;

pub async fn route(req: Request, uri: RequestUri<'_>) -> Result {
    if !uri.is_empty() {
        return Err(StatusCodeError::not_found().into());
    }

    method!(req, {
        Method::POST => settle_match(req).await,
    })
}

async fn settle_match(mut req: Request) -> Result {
    req.require_admin()?;

    let body: SettleMatchRequest = req.json().await?;
    let cmd = SettleMatch::try_from(body)?;

    settle(req.state(), cmd).await
}

/// Runs a settlement and renders its outcome.
pub(super) async fn settle(state: &State, cmd: SettleMatch) -> Result {
    match state.settlement.settle(cmd).await {
        Ok(settled) => {
            #[cfg(feature = "metrics")]
            {
                state.metrics.settlements_total.inc();
                if settled.ladder.is_failed() {
                    state.metrics.ladder_failures_total.inc();
                }
            }

            Ok(Response::ok().json(&SettleResponse::from(&settled)))
        }
        Err(err) => {
            #[cfg(feature = "metrics")]
            state.metrics.settlements_rejected_total.inc();

            Err(err.into())
        }
    }
}
