use std::time::Duration;

use base64::prelude::*;
use chrono::Utc;
use ring::hmac;
use thiserror::Error;

use crate::jobs::JobId;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("token required")]
    Missing,
    #[error("malformed token")]
    Malformed,
    #[error("token expired")]
    Expired,
    #[error("token doesn't match the job")]
    BadSignature,
}

/// Issues and checks short-lived tokens that bind a subscriber to one job.
///
/// Token layout: `<expiry unix seconds>.<base64url HMAC-SHA256("<jobId>\n<expiry>")>`
pub struct SubscribeAuthorizer {
    key: hmac::Key,
    ttl: Duration,
}

impl std::fmt::Debug for SubscribeAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeAuthorizer").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl SubscribeAuthorizer {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self { key: hmac::Key::new(hmac::HMAC_SHA256, secret), ttl }
    }

    pub fn issue(&self, job_id: &JobId) -> String {
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        self.issue_until(job_id, Utc::now().timestamp().saturating_add(ttl))
    }

    fn issue_until(&self, job_id: &JobId, expiry: i64) -> String {
        let tag = hmac::sign(&self.key, signing_input(job_id, expiry).as_bytes());
        format!("{expiry}.{}", BASE64_URL_SAFE_NO_PAD.encode(tag.as_ref()))
    }

    pub fn verify(&self, job_id: &JobId, token: &str) -> Result<(), TokenError> {
        self.verify_at(job_id, token, Utc::now().timestamp())
    }

    fn verify_at(&self, job_id: &JobId, token: &str, now: i64) -> Result<(), TokenError> {
        let (expiry, tag) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let expiry: i64 = expiry.parse().map_err(|_| TokenError::Malformed)?;
        let tag = BASE64_URL_SAFE_NO_PAD.decode(tag).map_err(|_| TokenError::Malformed)?;

        hmac::verify(&self.key, signing_input(job_id, expiry).as_bytes(), &tag)
            .map_err(|_| TokenError::BadSignature)?;
        if expiry <= now {
            return Err(TokenError::Expired);
        }
        Ok(())
    }
}

fn signing_input(job_id: &JobId, expiry: i64) -> String {
    format!("{job_id}\n{expiry}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorizer() -> SubscribeAuthorizer {
        SubscribeAuthorizer::new(b"correct horse battery staple", Duration::from_secs(60))
    }

    fn job(id: &str) -> JobId {
        JobId::new(id).unwrap()
    }

    #[test]
    fn issued_token_verifies_for_its_job_only() {
        let auth = authorizer();
        let token = auth.issue(&job("job-42"));
        assert_eq!(auth.verify(&job("job-42"), &token), Ok(()));
        assert_eq!(auth.verify(&job("job-99"), &token), Err(TokenError::BadSignature));
    }

    #[test]
    fn other_secret_is_rejected() {
        let token = authorizer().issue(&job("job-42"));
        let stranger = SubscribeAuthorizer::new(b"another secret", Duration::from_secs(60));
        assert_eq!(stranger.verify(&job("job-42"), &token), Err(TokenError::BadSignature));
    }

    #[test]
    fn expiry_is_enforced_and_signed() {
        let auth = authorizer();
        let token = auth.issue_until(&job("job-1"), 1_000);
        assert_eq!(auth.verify_at(&job("job-1"), &token, 999), Ok(()));
        assert_eq!(auth.verify_at(&job("job-1"), &token, 1_000), Err(TokenError::Expired));

        // Moving the expiry forward breaks the signature
        let (_, tag) = token.split_once('.').unwrap();
        let forged = format!("2000.{tag}");
        assert_eq!(auth.verify_at(&job("job-1"), &forged, 1_500), Err(TokenError::BadSignature));
    }

    #[test]
    fn malformed_tokens() {
        let auth = authorizer();
        for token in ["", "no-dot", "abc.def", "100.***"] {
            assert_eq!(auth.verify(&job("job-1"), token), Err(TokenError::Malformed), "{token}");
        }
    }
}
