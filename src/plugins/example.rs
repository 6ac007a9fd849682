//! Minimal plugin exercising the plugin interface.
//!
//! Routes:
//! - `/example-plugin/test` answers with a small JSON document
//! - `/example-plugin/auth-required/test` does the same behind `require_token`
//! - `/example-plugin/fake-error` fails, to exercise error handling

use std::sync::OnceLock;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::auth::AuthRecord;
use crate::http::handler::{self, handler_fn, Handler};
use crate::plugins::{Dispatch, Plugin, PluginContext, PluginError, PluginInfo};

pub struct ExamplePlugin {
    auth_required: OnceLock<Handler>,
}

impl ExamplePlugin {
    pub const ID: &'static str = "example-plugin";

    pub fn new() -> Self {
        Self {
            auth_required: OnceLock::new(),
        }
    }
}

impl Default for ExamplePlugin {
    fn default() -> Self {
        Self::new()
    }
}

async fn test_handler(req: Request<Body>) -> Response {
    let subject = req.extensions().get::<AuthRecord>().map(|r| r.subject.clone());
    Json(json!({
        "plugin": ExamplePlugin::ID,
        "path": req.uri().path(),
        "subject": subject,
    }))
    .into_response()
}

#[async_trait]
impl Plugin for ExamplePlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo::builtin(Self::ID)
    }

    async fn initialize(&self, ctx: PluginContext) -> Result<(), PluginError> {
        let protected = ctx.services.require_token(handler_fn(test_handler), Vec::new());
        let _ = self.auth_required.set(protected);
        tracing::debug!(plugin = Self::ID, "Plugin initialize");
        Ok(())
    }

    async fn close(&self) -> Result<(), PluginError> {
        tracing::debug!(plugin = Self::ID, "Plugin close");
        Ok(())
    }

    async fn serve_http(&self, req: Request<Body>) -> Result<Dispatch, PluginError> {
        let path = req.uri().path().to_string();
        match path.as_str() {
            "/example-plugin/test" => Ok(Dispatch::Handled(test_handler(req).await)),
            "/example-plugin/auth-required/test" => match self.auth_required.get() {
                Some(protected) => Ok(Dispatch::Handled(handler::call(protected, req).await)),
                None => Err(PluginError::Runtime("example-plugin is not initialized".into())),
            },
            "/example-plugin/fake-error" => Err(PluginError::Runtime("fake error".into())),
            _ => Ok(Dispatch::Declined(req)),
        }
    }
}
