//! Append-only tables that give repeated values a stable id.
//!
//! New entries are published to the recording while the table lock is
//! held, so a reader of the recording never sees an id before its
//! definition.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::proxy::recording::{
    BaseUrl, BasicAuthorization, CommonHeaders, Header, Recording, RequestHeaders, Scheme,
};

/// Headers factored out into shared [`CommonHeaders`] sets.
pub(super) const COMMON_HEADERS: [&str; 7] = [
    "Accept",
    "Accept-Charset",
    "Accept-Encoding",
    "Accept-Language",
    "Cache-Control",
    "Referer",
    "User-Agent",
];

#[derive(Default)]
pub(super) struct BaseUrlMap {
    entries: Mutex<HashMap<(Scheme, String, u16), String>>,
}

impl BaseUrlMap {
    /// The id of the base URL for `scheme://host:port`, created on first use.
    pub(super) fn intern(
        &self,
        scheme: Scheme,
        host: &str,
        port: u16,
        recording: &dyn Recording,
    ) -> String {
        let Ok(mut entries) = self.entries.lock() else {
            return String::new();
        };
        let key = (scheme, host.to_owned(), port);
        if let Some(url_id) = entries.get(&key) {
            return url_id.clone();
        }

        let url_id = format!("url{}", entries.len());
        recording.add_base_url(BaseUrl {
            url_id: url_id.clone(),
            scheme,
            host: host.to_owned(),
            port,
        });
        entries.insert(key, url_id.clone());
        url_id
    }
}

#[derive(Default)]
pub(super) struct CommonHeadersMap {
    entries: Mutex<HashMap<Vec<Header>, String>>,
}

impl CommonHeadersMap {
    /// Splits `headers` into the shared set (interned) and the headers
    /// specific to one request.
    pub(super) fn extract(
        &self,
        headers: Vec<Header>,
        authorization: Option<BasicAuthorization>,
        recording: &dyn Recording,
    ) -> RequestHeaders {
        let (common, specific): (Vec<Header>, Vec<Header>) = headers
            .into_iter()
            .partition(|header| COMMON_HEADERS.contains(&header.name.as_str()));

        RequestHeaders {
            extends: self.intern(common, recording),
            headers: specific,
            authorization,
        }
    }

    fn intern(&self, common: Vec<Header>, recording: &dyn Recording) -> String {
        let Ok(mut entries) = self.entries.lock() else {
            return String::new();
        };
        if let Some(headers_id) = entries.get(&common) {
            return headers_id.clone();
        }

        let headers_id = format!("headers{}", entries.len());
        recording.add_common_headers(CommonHeaders {
            headers_id: headers_id.clone(),
            headers: common.clone(),
        });
        entries.insert(common, headers_id.clone());
        headers_id
    }
}
