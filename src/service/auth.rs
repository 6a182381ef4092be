//! 令牌校验：`<account>.<expires_ms>.<hex(hmac-sha256)>`。
//! 签发属于外部鉴权中心，这里只为连接引导提供一个本地实现。
//! Token validation: `<account>.<expires_ms>.<hex(hmac-sha256)>`.
//! Issuance belongs to the external auth center; a local signer is kept
//! for the connection bootstrap endpoint.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ImError;

type HmacSha256 = Hmac<Sha256>;

fn sign(secret: &str, payload: &str) -> Result<Vec<u8>, ImError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ImError::Auth(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn issue_token(secret: &str, account_id: u64, ttl_ms: i64) -> Result<String, ImError> {
    let expires = chrono::Utc::now().timestamp_millis() + ttl_ms;
    let payload = format!("{account_id}.{expires}");
    let sig = sign(secret, &payload)?;
    Ok(format!("{payload}.{}", hex::encode(sig)))
}

/// 校验通过返回账号ID，任何问题都直接拒绝连接
/// Returns the account ID on success; any problem rejects the connection
pub fn validate_token(secret: &str, token: &str) -> Result<u64, ImError> {
    if token.is_empty() {
        return Err(ImError::Auth("missing token".to_string()));
    }
    let mut parts = token.splitn(3, '.');
    let (Some(account), Some(expires), Some(sig)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ImError::Auth("malformed token".to_string()));
    };
    let account_id: u64 = account
        .parse()
        .map_err(|_| ImError::Auth("malformed token".to_string()))?;
    let expires_ms: i64 = expires
        .parse()
        .map_err(|_| ImError::Auth("malformed token".to_string()))?;
    if expires_ms < chrono::Utc::now().timestamp_millis() {
        return Err(ImError::Auth("token expired".to_string()));
    }
    let payload = format!("{account_id}.{expires_ms}");
    let raw_sig = hex::decode(sig).map_err(|_| ImError::Auth("malformed token".to_string()))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ImError::Auth(e.to_string()))?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&raw_sig)
        .map_err(|_| ImError::Auth("invalid token".to_string()))?;
    Ok(account_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_validates() {
        let token = issue_token("s3cret", 42, 60_000).unwrap();
        assert_eq!(validate_token("s3cret", &token).unwrap(), 42);
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue_token("s3cret", 42, -1000).unwrap();
        assert!(matches!(
            validate_token("s3cret", &token),
            Err(ImError::Auth(_))
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token("s3cret", 42, 60_000).unwrap();
        assert!(validate_token("other", &token).is_err());
    }

    #[test]
    fn tampered_account_is_rejected() {
        let token = issue_token("s3cret", 42, 60_000).unwrap();
        let forged = token.replacen("42", "43", 1);
        assert!(validate_token("s3cret", &forged).is_err());
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(validate_token("s3cret", "").is_err());
    }
}
