//! JWT 认证模块
//!
//! WebSocket 握手通过 `?token=` 查询参数携带 JWT；令牌声明中
//! 包含身份与其所属门店——门店是租户边界，握手后不可变更。

use config::JwtConfig;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use domain::{IdentityContext, IdentityId, StoreId};

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub identity_id: Uuid,
    pub store_id: Uuid,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

impl Claims {
    pub fn identity_context(&self) -> IdentityContext {
        IdentityContext {
            identity_id: IdentityId::new(self.identity_id),
            store_id: StoreId::new(self.store_id),
        }
    }
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 生成 JWT token
    pub fn generate_token(
        &self,
        identity_id: IdentityId,
        store_id: StoreId,
    ) -> Result<String, ApiError> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            identity_id: identity_id.into(),
            store_id: store_id.into(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::unauthorized(format!("Token generation failed: {}", err)))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| ApiError::unauthorized(format!("Invalid token: {}", err)))
    }
}
