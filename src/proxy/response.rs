use std::sync::Arc;

use super::connection::ConnectionDetails;
use super::filter::TcpProxyFilter;
use super::recording::Recording;

/// Watches server to client traffic so the next request can be given a
/// sleep time.
pub struct HttpResponseFilter {
    recording: Arc<dyn Recording>,
}

impl HttpResponseFilter {
    #[must_use]
    pub const fn new(recording: Arc<dyn Recording>) -> Self {
        Self { recording }
    }
}

impl TcpProxyFilter for HttpResponseFilter {
    fn handle(&self, _connection: &ConnectionDetails, _buffer: &[u8]) -> Option<Vec<u8>> {
        self.recording.mark_last_response_time();
        None
    }
}
