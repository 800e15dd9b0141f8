//! Request guard identifying the caller.
//!
//! This core has no notion of API tokens or login sessions of its own — the
//! purchase certificate (see `tollbooth_core::verifier`) is the only
//! cryptographic credential it understands, and that's checked inside
//! `purchase_credits` itself, not at the transport layer. A tool host is
//! expected to sit in front of this service and assert which of its own
//! users a request is for; this guard just reads that assertion off a
//! header and applies the rate limiter, the same way the teacher's grant
//! guards did after looking up a token.

use okapi::openapi3::{Object, SecurityRequirement, SecurityScheme, SecuritySchemeData};
use rocket::{
    async_trait,
    http::Status,
    request::{FromRequest, Outcome},
    Request,
};
use rocket_okapi::{
    gen::OpenApiGenerator,
    request::{OpenApiFromRequest, RequestHeaderInput},
};
use thiserror::Error;
use tollbooth_core::ids::UserId;

use crate::state::RocketState;

const USER_HEADER: &str = "X-User-Id";

pub struct UserGuard(pub UserId);

impl UserGuard {
    pub fn user_id(&self) -> &UserId {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing {USER_HEADER} header")]
    MissingUser,
    #[error("rate limit exceeded")]
    RateLimited,
}

#[async_trait]
impl<'r> FromRequest<'r> for UserGuard {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match req.headers().get_one(USER_HEADER) {
            Some(raw) if !raw.trim().is_empty() => {
                let user_id = UserId::from(raw);
                let state = req.rocket().state::<RocketState>().unwrap();
                if state.rate_limit.limit(&user_id) {
                    log::info!("rate limiting user {:?}", user_id);
                    Outcome::Failure((Status::TooManyRequests, Error::RateLimited))
                } else {
                    Outcome::Success(UserGuard(user_id))
                }
            }
            _ => Outcome::Failure((Status::BadRequest, Error::MissingUser)),
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for UserGuard {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(openapi_auth())
    }
}

fn openapi_auth() -> RequestHeaderInput {
    let security_scheme = SecurityScheme {
        description: Some(format!(
            "Identifies the caller on whose behalf the request is made: \"{}\".",
            USER_HEADER
        )),
        data: SecuritySchemeData::ApiKey {
            name: USER_HEADER.to_owned(),
            location: "header".to_owned(),
        },
        extensions: Object::default(),
    };
    let mut security_req = SecurityRequirement::new();
    security_req.insert(USER_HEADER.to_owned(), Vec::new());
    RequestHeaderInput::Security(USER_HEADER.to_owned(), security_scheme, security_req)
}
