use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::Method;

use crate::http::{Request, RequestUri, Response, Result, StatusCodeError};
use crate::method;

pub async fn route(req: Request, uri: RequestUri<'_>) -> Result {
    if !uri.is_empty() {
        return Err(StatusCodeError::not_found().into());
    }

    method!(req, {
        Method::GET => get(req).await,
    })
}

async fn get(req: Request) -> Result {
    let body = req.state().metrics.serialize();

    Ok(Response::ok()
        .body(body)
        .header(CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4")))
}
