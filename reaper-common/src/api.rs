use poem_openapi::auth::ApiKey;
use poem_openapi::SecurityScheme;

#[derive(SecurityScheme)]
#[oai(ty = "api_key", key_name = "X-Reaper-Token", key_in = "header")]
#[allow(dead_code)]
pub struct TokenSecurityScheme(ApiKey);
