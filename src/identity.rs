use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http, Error, HttpMessage, HttpRequest, HttpResponse,
};
use futures::future::{ok, Ready};
use jsonwebtoken::{decode, DecodingKey, Validation};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{WorkflowError, WorkflowResult};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    pub exp: usize,
}

/// Who is calling, as vouched for by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
    pub picture_url: Option<String>,
}

/// Verifies HS256 bearer tokens issued by the identity provider.
pub struct IdentityVerifier {
    secret: String,
}

impl IdentityVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Identity, jsonwebtoken::errors::Error> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_ref()),
            &Validation::default(),
        )?;
        Ok(Identity {
            email: token_data.claims.email,
            picture_url: token_data.claims.picture,
        })
    }

    /// Signs a token the way the identity provider does.
    #[cfg(test)]
    pub fn issue(
        &self,
        subject: &str,
        email: &str,
        picture: Option<&str>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let expiration = chrono::Utc::now() + chrono::Duration::hours(24);
        let claims = Claims {
            sub: subject.to_string(),
            email: email.to_string(),
            picture: picture.map(str::to_string),
            exp: expiration.timestamp() as usize,
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(self.secret.as_ref()),
        )
    }
}

/// The identity the `Authentication` middleware attached to this request.
pub fn current_identity(req: &HttpRequest) -> WorkflowResult<Identity> {
    req.extensions()
        .get::<Identity>()
        .cloned()
        .ok_or(WorkflowError::Unauthorized)
}

/// Resolves `Authorization: Bearer <token>` into an `Identity` extension.
/// Requests without the header pass through untouched; invalid tokens are
/// answered with 401 right away.
pub struct Authentication {
    verifier: Arc<IdentityVerifier>,
}

impl Authentication {
    pub fn new(verifier: Arc<IdentityVerifier>) -> Self {
        Self { verifier }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service: Rc::new(service),
            verifier: self.verifier.clone(),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: Rc<S>,
    verifier: Arc<IdentityVerifier>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let bearer = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string());

        if let Some(token) = bearer {
            match self.verifier.verify(&token) {
                Ok(identity) => {
                    debug!("Request authenticated as {}", identity.email);
                    req.extensions_mut().insert(identity);
                }
                Err(e) => {
                    let (req_parts, _payload) = req.into_parts();
                    let resp = HttpResponse::Unauthorized()
                        .body(format!("Invalid token: {}", e))
                        .map_into_boxed_body();
                    let srv_resp = ServiceResponse::new(req_parts, resp);
                    return Box::pin(async move { Ok(srv_resp) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}
