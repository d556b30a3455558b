use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};

use crate::app_error::AppError;

/// Header carrying the authenticated customer id, set by the upstream gateway.
pub const CUSTOMER_ID_HEADER: &str = "x-customer-id";
/// Header marking a request as coming from staff tooling.
pub const STAFF_HEADER: &str = "x-staff";

fn customer_id(headers: &HeaderMap) -> Option<i32> {
    headers
        .get(CUSTOMER_ID_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Makes the caller's customer id available as `Extension<i32>`.
pub async fn customer_identity(mut req: Request, next: Next) -> Result<Response, AppError> {
    let id = customer_id(req.headers())
        .ok_or_else(|| AppError::Unauthorized("Missing or invalid customer identity".into()))?;
    req.extensions_mut().insert(id);
    Ok(next.run(req).await)
}

pub async fn staff_authorization(req: Request, next: Next) -> Result<Response, AppError> {
    let is_staff = req
        .headers()
        .get(STAFF_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("true"));
    if !is_staff {
        return Err(AppError::ForbiddenResource("Staff only".into()));
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn parses_customer_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(customer_id(&headers), None);

        headers.insert(CUSTOMER_ID_HEADER, HeaderValue::from_static(" 42 "));
        assert_eq!(customer_id(&headers), Some(42));

        headers.insert(CUSTOMER_ID_HEADER, HeaderValue::from_static("forty-two"));
        assert_eq!(customer_id(&headers), None);
    }
}
