use tracing::debug;

use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    debug!(id = %req.id, method = %req.method, "dispatch");

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::subjects::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::grades::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::attendance::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::calendar::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::notes::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::finance::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::analytics::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::reports::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::settings::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::snapshot::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::backup::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
