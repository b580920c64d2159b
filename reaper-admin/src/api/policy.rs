use std::sync::Arc;
use std::time::Duration;

use poem::web::Data;
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, Object, OpenApi};
use sea_orm::DatabaseConnection;
use tokio::sync::Mutex;

use reaper_common::PolicyConfig;
use reaper_core::Services;

use super::{record_audit, TokenSecurityScheme};

pub struct Api;

/// Wire shape of the policy snapshot. Durations travel as whole seconds;
/// the server clamps every numeric field before applying.
#[derive(Object)]
struct PolicyDto {
    ip_failure_threshold: u32,
    ip_window_seconds: u64,
    ip_ban_duration_seconds: u64,
    subnet_failure_threshold: u32,
    subnet_window_seconds: u64,
    subnet_ban_duration_seconds: u64,
    subnet_min_unique_ips: u32,
    allow_ips: Vec<String>,
    block_ips: Vec<String>,
    allow_subnets: Vec<String>,
    block_subnets: Vec<String>,
    allow_countries: Vec<String>,
    block_countries: Vec<String>,
    firewall_enabled: bool,
}

impl PolicyDto {
    fn from_policy(policy: &PolicyConfig, firewall_enabled: bool) -> Self {
        Self {
            ip_failure_threshold: policy.ip_failure_threshold,
            ip_window_seconds: policy.ip_window.as_secs(),
            ip_ban_duration_seconds: policy.ip_ban_duration.as_secs(),
            subnet_failure_threshold: policy.subnet_failure_threshold,
            subnet_window_seconds: policy.subnet_window.as_secs(),
            subnet_ban_duration_seconds: policy.subnet_ban_duration.as_secs(),
            subnet_min_unique_ips: policy.subnet_min_unique_ips,
            allow_ips: policy.allow_ips.clone(),
            block_ips: policy.block_ips.clone(),
            allow_subnets: policy.allow_subnets.clone(),
            block_subnets: policy.block_subnets.clone(),
            allow_countries: policy.allow_countries.clone(),
            block_countries: policy.block_countries.clone(),
            firewall_enabled,
        }
    }

    fn into_policy(self) -> PolicyConfig {
        PolicyConfig {
            ip_failure_threshold: self.ip_failure_threshold,
            ip_window: Duration::from_secs(self.ip_window_seconds),
            ip_ban_duration: Duration::from_secs(self.ip_ban_duration_seconds),
            subnet_failure_threshold: self.subnet_failure_threshold,
            subnet_window: Duration::from_secs(self.subnet_window_seconds),
            subnet_ban_duration: Duration::from_secs(self.subnet_ban_duration_seconds),
            subnet_min_unique_ips: self.subnet_min_unique_ips,
            allow_ips: self.allow_ips,
            block_ips: self.block_ips,
            allow_subnets: self.allow_subnets,
            block_subnets: self.block_subnets,
            allow_countries: self.allow_countries,
            block_countries: self.block_countries,
        }
    }
}

#[derive(ApiResponse)]
enum GetPolicyResponse {
    #[oai(status = 200)]
    Ok(Json<PolicyDto>),
}

#[derive(ApiResponse)]
enum PutPolicyResponse {
    #[oai(status = 200)]
    Ok(Json<PolicyDto>),
}

#[OpenApi]
impl Api {
    #[oai(path = "/policy", method = "get", operation_id = "get_policy")]
    async fn api_get_policy(
        &self,
        services: Data<&Services>,
        _auth: TokenSecurityScheme,
    ) -> poem::Result<GetPolicyResponse> {
        let config = services.config.lock().await;
        Ok(GetPolicyResponse::Ok(Json(PolicyDto::from_policy(
            &config.store.policy,
            config.store.firewall.enable,
        ))))
    }

    #[oai(path = "/policy", method = "put", operation_id = "put_policy")]
    async fn api_put_policy(
        &self,
        services: Data<&Services>,
        db: Data<&Arc<Mutex<DatabaseConnection>>>,
        body: Json<PolicyDto>,
        _auth: TokenSecurityScheme,
    ) -> poem::Result<PutPolicyResponse> {
        let firewall_enabled = body.0.firewall_enabled;
        let applied = services
            .replace_policy(body.0.into_policy())
            .await
            .map_err(poem::error::InternalServerError)?;

        services.config.lock().await.store.firewall.enable = firewall_enabled;

        {
            let db = db.lock().await;
            record_audit(&db, "policy_update", "policy", String::new()).await;
        }

        Ok(PutPolicyResponse::Ok(Json(PolicyDto::from_policy(
            &applied,
            firewall_enabled,
        ))))
    }
}
