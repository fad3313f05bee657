use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::models::actor::{Actor, Role};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_NAME_HEADER: &str = "x-actor-name";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Reads the identity established by the upstream gateway.
///
/// # Arguments
///
/// * `headers` - The request headers.
///
/// # Returns
///
/// The `Actor`, or `None` if any identity header is missing or malformed.
fn extract_actor(headers: &HeaderMap) -> Option<Actor> {
    let id = header(headers, ACTOR_ID_HEADER)?;
    let name = header(headers, ACTOR_NAME_HEADER)?;
    let role = Role::parse(header(headers, ACTOR_ROLE_HEADER)?)?;

    Some(Actor {
        id: id.to_string(),
        name: name.to_string(),
        role,
    })
}

async fn require_role(
    role: Role,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let actor = extract_actor(request.headers()).ok_or_else(|| {
        tracing::warn!("❌ Missing or malformed actor headers");
        StatusCode::UNAUTHORIZED
    })?;

    if actor.role != role {
        tracing::warn!(
            "❌ {} ({:?}) tried to reach a {:?} route",
            actor.id,
            actor.role,
            role
        );
        return Err(StatusCode::FORBIDDEN);
    }

    tracing::debug!("✅ Actor authenticated: {} ({:?})", actor.id, actor.role);
    request.extensions_mut().insert(actor);

    Ok(next.run(request).await)
}

/// A middleware that admits teachers only.
pub async fn require_teacher(request: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    require_role(Role::Teacher, request, next).await
}

/// A middleware that admits reviewers only.
pub async fn require_reviewer(request: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    require_role(Role::Reviewer, request, next).await
}

/// A middleware that admits parents only.
pub async fn require_parent(request: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    require_role(Role::Parent, request, next).await
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(*v));
        }
        map
    }

    #[test]
    fn complete_headers_yield_actor() {
        let actor = extract_actor(&headers(&[
            (ACTOR_ID_HEADER, "teacher-1"),
            (ACTOR_NAME_HEADER, "Fatou Sow"),
            (ACTOR_ROLE_HEADER, "Teacher"),
        ]))
        .unwrap();
        assert_eq!(actor.role, Role::Teacher);
        assert_eq!(actor.name, "Fatou Sow");
    }

    #[test]
    fn missing_or_unknown_fields_yield_none() {
        assert!(extract_actor(&headers(&[(ACTOR_ID_HEADER, "t")])).is_none());
        assert!(extract_actor(&headers(&[
            (ACTOR_ID_HEADER, "t"),
            (ACTOR_NAME_HEADER, "T"),
            (ACTOR_ROLE_HEADER, "admin"),
        ]))
        .is_none());
        assert!(extract_actor(&headers(&[
            (ACTOR_ID_HEADER, "  "),
            (ACTOR_NAME_HEADER, "T"),
            (ACTOR_ROLE_HEADER, "teacher"),
        ]))
        .is_none());
    }
}
