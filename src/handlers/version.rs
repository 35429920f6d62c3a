// Copyright 2025 Cowboy AI, LLC.

//! Version endpoint

use crate::commands::Version;
use crate::handlers::{Handler, HandlerResult};
use crate::responses::VersionResponse;
use async_trait::async_trait;

/// Reports the crate version
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionHandler;

#[async_trait]
impl Handler<Version> for VersionHandler {
    type Response = VersionResponse;

    async fn handle(&self, _query: Version) -> HandlerResult<VersionResponse> {
        Ok(VersionResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}
