use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::Valid;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(length(
        min = 1,
        max = 255,
        message = "Username must contain between 1 and 255 characters."
    ))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub uid: String,
}

/// Handler to authenticate against the directory.
///
/// Mattermost synchronization runs in background and never changes the
/// response.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let uid = state.ldap.authenticate(&body.username, &body.password).await?;

    tracing::info!(%uid, "user authenticated");

    if let Some(sync) = &state.sync {
        let sync = Arc::clone(sync);
        let uid = uid.clone();
        state.tasks.spawn(async move {
            sync.sync_user(&uid).await;
        });
    }

    Ok(Json(Response { uid }))
}
