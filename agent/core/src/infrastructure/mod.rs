// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod collector;
pub mod docker;

pub use collector::{CollectorConfig, CollectorTransport};
pub use docker::{DockerStateProbe, DockerTrafficProbe};
