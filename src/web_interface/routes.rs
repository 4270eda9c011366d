use std::sync::Arc;

use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::{ApiError, StatusResponse};
use crate::controller::state::ProxyState;

/// GET /
pub fn dashboard_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::end().and(warp::get()).and_then(|| async move {
        let html = r#"<html><head><title>pop3bayes</title></head>
                <body><h1>pop3bayes is running</h1><p>See /status for JSON.</p></body></html>"#;
        Ok::<_, Rejection>(reply::html(html))
    })
}

/// GET /status
pub fn status_route(
    state: Arc<ProxyState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let state = state.clone();
            async move { Ok::<_, Rejection>(status_reply(&state)) }
        })
}

fn status_reply(state: &ProxyState) -> reply::Response {
    let proxy = &state.config.pop3proxy;
    let endpoints = match state.config.endpoints() {
        Ok(endpoints) => endpoints,
        Err(e) => {
            return reply::with_status(
                reply::json(&ApiError {
                    message: e.to_string(),
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
            .into_response()
        }
    };
    let status = StatusResponse {
        counters: state.registry.snapshot(),
        servers: endpoints.iter().map(|e| e.upstream.to_string()).collect(),
        listen_ports: proxy.listen_ports.clone(),
        caching: state.corpora().is_some() && state.config.storage.cache_messages,
    };
    reply::with_status(reply::json(&status), StatusCode::OK).into_response()
}

pub fn routes(
    state: Arc<ProxyState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    dashboard_route().or(status_route(state))
}
