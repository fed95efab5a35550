use hyper::Method;
use tennis_tournament_api::settle::MatchResult;
use tennis_tournament_api::MatchId;

use super::settle::settle;
use crate::http::{Request, RequestUri, Result, StatusCodeError};
use crate::method;
use crate::settlement::SettleMatch;

pub async fn route(req: Request, mut uri: RequestUri<'_>) -> Result {
    let id: MatchId = match uri.take() {
        Some(part) => part.parse()?,
        None => return Err(StatusCodeError::not_found().into()),
    };

    match (uri.take_str(), uri.is_empty()) {
        (Some("result"), true) => method!(req, {
            Method::POST => result(req, id).await,
        }),
        _ => Err(StatusCodeError::not_found().into()),
    }
}

async fn result(mut req: Request, id: MatchId) -> Result {
    req.require_admin()?;

    let body: MatchResult = req.json().await?;
    let cmd = SettleMatch::try_from(body.into_request(id))?;

    settle(req.state(), cmd).await
}
