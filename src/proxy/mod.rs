//! Intercepting TCP proxy that records HTTP traffic.
//!
//! Bytes from the client are passed through a [`TcpProxyFilter`] on their way
//! to the server, and the server's replies through another. The
//! [`HttpRequestFilter`] reassembles requests into a [`Recording`]; the
//! [`HttpResponseFilter`] notes when responses arrive so think times can be
//! recorded.

mod connection;
mod filter;
mod http_request;
mod recording;
mod response;
mod server;

pub use connection::{ConnectionDetails, EndPoint};
pub use filter::{EchoFilter, NullFilter, TcpProxyFilter, render_fragment};
pub use http_request::HttpRequestFilter;
pub use recording::{
    BaseUrl, BasicAuthorization, Body, BodyContent, CommonHeaders, Header, HttpMethod,
    HttpRecording, NameValue, QueryString, Recording, RecordingDocument, RelativeUrl,
    RequestHeaders, RequestRecord, Scheme,
};
pub use response::HttpResponseFilter;
pub use server::{ProxySettings, TcpProxy, run_proxy};

#[cfg(test)]
mod tests;
