//! Integration tests: whole sessions driven through the public engine API.

mod mock_venue;
mod scenarios;
