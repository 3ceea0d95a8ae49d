pub mod stdio_server;

pub use stdio_server::StdioServer;
