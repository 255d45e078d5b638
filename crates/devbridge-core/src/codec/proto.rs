//! Protobuf messages exchanged with the instrumented runtime.

/// Outer frame on the debug endpoint.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DebugMessage {
    #[prost(uint32, tag = "1")]
    pub seq: u32,
    #[prost(string, tag = "2")]
    pub category: String,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
    #[prost(int32, tag = "4")]
    pub compress_algo: i32,
    #[prost(uint32, tag = "5")]
    pub original_size: u32,
}

/// Inner payload of `chromeDevtools` and `chromeDevtoolsResult` frames.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DevtoolsPayload {
    #[prost(string, tag = "1")]
    pub jscontext_id: String,
    #[prost(uint32, tag = "2")]
    pub op_id: u32,
    #[prost(string, tag = "3")]
    pub payload: String,
}
