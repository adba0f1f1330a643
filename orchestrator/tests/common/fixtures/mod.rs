//! This module provides reusable test utilities:
//! - A scripted fleet standing in for remote hosts
//! - A mock command agent (HTTP)
//! - Test configuration builders
//! - A harness wiring config, in-memory database and patch service together
//! - Common test data

// Not every test binary uses every fixture
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod fake_fleet;
pub mod harness;
pub mod mock_agent;
pub mod test_config;
pub mod test_data;

pub use fake_fleet::{exit, out, FakeFleet, Invocation};
pub use harness::{standard_cluster, Harness};
pub use mock_agent::MockAgentServer;
pub use test_config::{ClusterBuilder, TestConfig, TestConfigBuilder};
pub use test_data::*;
