//! Web side of the authorization flow
//!
//! - `GET /oauth/start` redirects to the instance's consent page
//! - `GET /oauth/verify` receives the redirect back, exchanges the code and
//!   registers the subscriber
//! - `GET /health` answers `OK`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Result;
use crate::onboarding::{complete_authorization, OnboardingSettings};
use crate::platforms::{ApiConnector, AuthorizationProvider, SocialApi};
use crate::state::BotState;

/// Everything the handlers need
pub struct OAuthContext {
    pub state: BotState,
    pub bot_api: Arc<dyn SocialApi>,
    pub connector: Arc<dyn ApiConnector>,
    pub authorizer: Arc<dyn AuthorizationProvider>,
    pub onboarding: OnboardingSettings,
    pub redirect_success: Option<String>,
    pub redirect_canceled: Option<String>,
    pub admin_contact: Option<String>,
}

pub type SharedContext = Arc<OAuthContext>;

/// Query parameters of the redirect back from the instance
#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    pub code: Option<String>,
    pub error: Option<String>,
}

pub fn router(context: SharedContext) -> Router {
    Router::new()
        .route("/oauth/start", get(start))
        .route("/oauth/verify", get(verify))
        .route("/health", get(health))
        .with_state(context)
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn error_page(context: &OAuthContext) -> Response {
    Html(
        context
            .onboarding
            .texts
            .error_page(context.admin_contact.as_deref()),
    )
    .into_response()
}

pub async fn start(State(context): State<SharedContext>) -> Response {
    match context.authorizer.authorize_url() {
        Ok(url) => found(&url),
        Err(e) => {
            error!("Failed to build authorization URL: {}", e);
            error_page(&context)
        }
    }
}

pub async fn verify(
    State(context): State<SharedContext>,
    Query(params): Query<VerifyParams>,
) -> Response {
    if let Some(reason) = params.error {
        info!(reason = %reason, "Authorization canceled by user");
        return match &context.redirect_canceled {
            Some(url) => found(url),
            None => Html("Authorization canceled.".to_string()).into_response(),
        };
    }

    let Some(code) = params.code else {
        error!("Authorization callback without code");
        return error_page(&context);
    };

    let credentials = match context.authorizer.exchange_code(&code).await {
        Ok(credentials) => credentials,
        Err(e) => {
            error!("Failed to get access token: {}", e);
            return error_page(&context);
        }
    };

    match complete_authorization(
        &context.state,
        &context.bot_api,
        &context.connector,
        credentials,
        &context.onboarding,
    )
    .await
    {
        Ok(_) => match &context.redirect_success {
            Some(url) => found(url),
            None => Html(format!(
                "Thank you for joining {}!",
                context.onboarding.texts.app_name
            ))
            .into_response(),
        },
        Err(e) => {
            error!("Failed to complete authorization: {}", e);
            error_page(&context)
        }
    }
}

pub async fn health() -> &'static str {
    "OK"
}

/// Serve the router until `shutdown` is set
pub async fn serve(listener: TcpListener, router: Router, shutdown: Arc<AtomicBool>) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Authorization flow listening on http://{}", addr);
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            while !shutdown.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        })
        .await?;

    info!("Web server stopped");
    Ok(())
}
