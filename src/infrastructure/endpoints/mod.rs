//! Endpoint client adapters: the pool of tool-providing servers the
//! mediator discovers tools from and invokes them against.

pub mod http_client;
pub mod mock_client;

pub use http_client::{HttpEndpointClient, HttpEndpointConfig};
pub use mock_client::{MockEndpointClient, MockInvocationResult};
