// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock adapters for deterministic Palaver tests.

pub mod mock_channel;
pub mod mock_sandbox;

pub use mock_channel::MockChannel;
pub use mock_sandbox::{MockOutcome, MockSandbox};
