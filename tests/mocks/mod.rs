pub mod mock_endpoint;
pub mod mock_namer;
