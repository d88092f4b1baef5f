//! Static header names and values used in proxy responses.
//!
//! Built with `from_static` so no call site needs `.parse().unwrap()`.

use hyper::header::{HeaderName, HeaderValue};
use hyper::Response;

pub static CONTENT_TYPE: HeaderName = HeaderName::from_static("content-type");
pub static CACHE_CONTROL: HeaderName = HeaderName::from_static("cache-control");
pub static CONNECTION: HeaderName = HeaderName::from_static("connection");
pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

pub static VALUE_TEXT_PLAIN: HeaderValue = HeaderValue::from_static("text/plain");
pub static VALUE_NO_CACHE: HeaderValue = HeaderValue::from_static("no-cache, no-store");
pub static VALUE_CLOSE: HeaderValue = HeaderValue::from_static("close");

/// Extension trait for inserting static headers into responses.
pub trait ProxyHeadersExt {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue);
}

impl<B> ProxyHeadersExt for Response<B> {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.headers_mut().insert(name.clone(), value.clone());
    }
}
