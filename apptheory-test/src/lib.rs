//! Test harness for AppTheory: a deterministic environment (manual clock
//! and sequential ids), recording fakes for the socket management client,
//! a string-keyed registry of fixture handlers, and the fixture replay
//! runner.

pub mod env;
pub mod fixtures;
pub mod registry;
pub mod ws;

pub use env::TestEnv;
pub use fixtures::{load_fixtures, run_fixture, run_fixture_dir, Fixture};
pub use ws::{RecordingClientFactory, WsCall};
