mod api;

use std::net::SocketAddr;

use anyhow::Result;
use poem::listener::TcpListener;
use poem::middleware::AddData;
use poem::{Endpoint, EndpointExt, IntoResponse, Request, Response, Route, Server};
use poem_openapi::OpenApiService;
use tracing::*;

use reaper_common::consts::TOKEN_HEADER;
use reaper_core::Services;

pub struct AdminServer {
    services: Services,
}

impl AdminServer {
    pub fn new(services: &Services) -> Self {
        AdminServer {
            services: services.clone(),
        }
    }

    pub async fn run(self, address: SocketAddr) -> Result<()> {
        let api_service = OpenApiService::new(
            api::get(),
            "Reaper control plane",
            env!("CARGO_PKG_VERSION"),
        )
        .server("/api");

        let token = self.services.admin_token.clone();

        let app = Route::new()
            .nest("/api", api_service)
            .with(AddData::new(self.services.clone()))
            .with(AddData::new(self.services.db.clone()))
            .around(move |endpoint, request| {
                let token = token.clone();
                async move { Ok(guard_request(endpoint, request, &token).await) }
            });

        info!(%address, "Control-plane API listening");
        Server::new(TcpListener::bind(address)).run(app).await?;
        Ok(())
    }
}

/// All requests must originate from loopback and carry the shared secret.
/// The GUI client is the only intended consumer.
async fn guard_request<E: Endpoint>(
    endpoint: E,
    request: Request,
    token: &reaper_common::Secret<String>,
) -> Response {
    let is_loopback = request
        .remote_addr()
        .as_socket_addr()
        .map(|addr| addr.ip().is_loopback())
        .unwrap_or(false);
    if !is_loopback {
        return poem::http::StatusCode::FORBIDDEN.into_response();
    }

    let provided = request
        .header(TOKEN_HEADER)
        .map(str::to_owned)
        .unwrap_or_default();
    if provided != *token.expose_secret() {
        return poem::http::StatusCode::UNAUTHORIZED.into_response();
    }

    match endpoint.call(request).await {
        Ok(response) => response.into_response(),
        Err(error) => error.into_response(),
    }
}
