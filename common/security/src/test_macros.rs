//! Shared test helper macro for attaching access headers to a request.
//! Usage: test_request_headers!(req, bearer="<jwt>", operator="t1", forwarded_for="1.2.3.4");
#[macro_export]
macro_rules! test_request_headers {
    ($req:expr, bearer=$token:expr, operator=$operator:expr, forwarded_for=$ip:expr) => {{
        $crate::test_request_headers!($req, bearer=$token, operator=$operator);
        $req.headers_mut().insert(
            "X-Forwarded-For",
            ::axum::http::HeaderValue::from_str($ip).unwrap(),
        );
    }};
    ($req:expr, bearer=$token:expr, operator=$operator:expr) => {{
        $crate::test_request_headers!($req, bearer=$token);
        $req.headers_mut().insert(
            $crate::TENANT_HINT_HEADER,
            ::axum::http::HeaderValue::from_str($operator).unwrap(),
        );
    }};
    ($req:expr, bearer=$token:expr) => {{
        let value = format!("Bearer {}", $token);
        $req.headers_mut().insert(
            ::axum::http::header::AUTHORIZATION,
            ::axum::http::HeaderValue::from_str(&value).unwrap(),
        );
    }};
}
