//! The `Channel` trait a Channel Instance wraps: a script-backed
//! `AdapterInstance` or a built-in static implementation, addressed through
//! the same four proxy-path hooks (§2 data flow).

use chanrt_adapter::AdapterInstance;
use chanrt_core::context::{AdapterRequest, RequestContext};
use chanrt_core::error::ChannelError;
use chanrt_core::group::Group;

/// The subset of the adapter contract (§3) the Factory and proxy path need:
/// the four synchronous hooks called on every request.
pub trait Channel: Send + Sync {
    fn build_upstream_url(&self, original_url: &str, group: &Group) -> Result<String, ChannelError>;
    fn modify_request(&self, request: &mut AdapterRequest, api_key: &str, group: &Group) -> Result<(), ChannelError>;
    fn is_stream_request(&self, context: &RequestContext) -> bool;
    fn extract_model(&self, context: &RequestContext) -> String;

    /// Lets the Reload Controller recover the concrete `AdapterInstance`
    /// behind a script-backed channel (e.g. to read its log ring buffer for
    /// `GET /scripts/:id/logs`) without widening this trait's hook surface.
    fn as_any(&self) -> &dyn std::any::Any;
}

impl Channel for AdapterInstance {
    fn build_upstream_url(&self, original_url: &str, group: &Group) -> Result<String, ChannelError> {
        AdapterInstance::build_upstream_url(self, original_url, group)
    }

    fn modify_request(&self, request: &mut AdapterRequest, api_key: &str, group: &Group) -> Result<(), ChannelError> {
        AdapterInstance::modify_request(self, request, api_key, group)
    }

    fn is_stream_request(&self, context: &RequestContext) -> bool {
        AdapterInstance::is_stream_request(self, context)
    }

    fn extract_model(&self, context: &RequestContext) -> String {
        AdapterInstance::extract_model(self, context)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
