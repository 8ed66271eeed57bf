// V8 wire client for the debugger session core
//
// Implements the debugger protocol contract over the JSON debug-agent
// protocol of a V8 process started with --debug:
// - Content-Length frame codec
// - Background transport loop with response correlation
// - Handle graph / frame / scope decoding
// - Command encodings for execution control and breakpoints

pub mod client;
pub mod decode;
pub mod eventloop;
pub mod framing;
pub mod wire;

pub use client::V8Protocol;
pub use eventloop::NETWORK_READ_ERROR;
